//! Text List Replay
//!
//! The protocol can only move one text per round trip, so rebuilding the
//! device's list means inserting every entry in order, each one waiting for
//! the previous reply.

use crate::domain::models::{Command, TextOp};
use crate::infrastructure::bluetooth::session::{SessionError, SessionManager};
use tracing::{info, warn};

pub struct TextSynchronizer<'a> {
    session: &'a SessionManager,
}

impl<'a> TextSynchronizer<'a> {
    pub fn new(session: &'a SessionManager) -> Self {
        Self { session }
    }

    /// Insert `texts[i]` at index `i` for every entry, stopping at the first
    /// failure. Entries already inserted stay on the device.
    pub async fn replay_all(&self, texts: &[String]) -> Result<(), SessionError> {
        info!("Replaying {} texts to the device", texts.len());
        for (index, text) in texts.iter().enumerate() {
            let command = Command::TextOp(TextOp::insert(index, text.clone()));
            if let Err(e) = self.session.issue(command).await {
                warn!(
                    "Replay stopped at text {}/{}: {}",
                    index + 1,
                    texts.len(),
                    e
                );
                return Err(e);
            }
        }
        info!("Replay finished");
        Ok(())
    }
}
