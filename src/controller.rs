//! LED Matrix Controller
//!
//! High-level operations on the matrix: each one issues a command through the
//! session, and on success folds the reply into the [`DeviceState`] mirror.
//! Failures come back as typed errors so a front end can show the device's
//! reason string.

use crate::domain::models::{Command, Response, Rgb, TextOp};
use crate::domain::state::{DeviceState, StateDelta};
use crate::domain::text_store::{KeyValueStore, TEXTS_KEY};
use crate::infrastructure::bluetooth::session::{SessionError, SessionManager};
use crate::infrastructure::bluetooth::sync::TextSynchronizer;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("no text `{0}` in the list")]
    UnknownText(String),

    #[error("visual index {0} is not in the catalog")]
    UnknownVisual(usize),

    /// Text store failure
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl ControllerError {
    /// Message for a user-facing alert
    pub fn alert_message(&self) -> String {
        match self {
            Self::Session(e) => match e.device_reason() {
                Some(reason) => format!("Received {}", reason),
                None => e.to_string(),
            },
            other => other.to_string(),
        }
    }
}

pub struct LedController<S: KeyValueStore> {
    session: Arc<SessionManager>,
    state: DeviceState,
    store: S,
    refreshing: watch::Sender<bool>,
}

impl<S: KeyValueStore> LedController<S> {
    /// Build a controller, loading the persisted text list
    pub fn new(session: Arc<SessionManager>, store: S) -> Result<Self, ControllerError> {
        let texts = store.load_list(TEXTS_KEY)?.unwrap_or_default();
        info!("Loaded {} stored texts", texts.len());
        Ok(Self {
            session,
            state: DeviceState::with_texts(texts),
            store,
            refreshing: watch::Sender::new(false),
        })
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn is_refreshing(&self) -> bool {
        *self.refreshing.borrow()
    }

    /// Follow the refreshing flag while a replay runs
    pub fn subscribe_refreshing(&self) -> watch::Receiver<bool> {
        self.refreshing.subscribe()
    }

    /// Pull brightness, speed, color and active selections from the device
    pub async fn sync_now(&mut self) -> Result<StateDelta, ControllerError> {
        self.run(Command::Sync).await
    }

    pub async fn set_brightness(&mut self, value: u8) -> Result<StateDelta, ControllerError> {
        self.run(Command::SetBrightness(value)).await
    }

    pub async fn set_speed(&mut self, value: u8) -> Result<StateDelta, ControllerError> {
        self.run(Command::SetSpeed(value)).await
    }

    pub async fn set_repeats(&mut self, value: u8) -> Result<StateDelta, ControllerError> {
        self.run(Command::SetRepeats(value)).await
    }

    pub async fn set_color(&mut self, rgb: Rgb) -> Result<StateDelta, ControllerError> {
        self.run(Command::SetColor(rgb)).await
    }

    pub async fn activate_visual(&mut self, index: usize) -> Result<StateDelta, ControllerError> {
        if index >= self.state.visuals.len() {
            return Err(ControllerError::UnknownVisual(index));
        }
        self.run(Command::ActivateVisual(index)).await
    }

    /// Append a text on the device and in the local list
    pub async fn insert_text(&mut self, text: &str) -> Result<StateDelta, ControllerError> {
        let index = self.state.texts.len();
        let delta = self.run(Command::TextOp(TextOp::insert(index, text))).await?;
        self.persist_texts()?;
        Ok(delta)
    }

    pub async fn delete_text(&mut self, text: &str) -> Result<StateDelta, ControllerError> {
        let index = self.index_of(text)?;
        let delta = self.run(Command::TextOp(TextOp::delete(index))).await?;
        self.persist_texts()?;
        Ok(delta)
    }

    pub async fn activate_text(&mut self, text: &str) -> Result<StateDelta, ControllerError> {
        let index = self.index_of(text)?;
        self.run(Command::TextOp(TextOp::activate(index))).await
    }

    /// Set how often the active text scrolls before moving on
    pub async fn set_text_repeats(&mut self, repeats: u8) -> Result<StateDelta, ControllerError> {
        let index = self.state.active_text_index.unwrap_or(0);
        self.run(Command::TextOp(TextOp::set_repeats(index, repeats)))
            .await
    }

    /// Rebuild the device's text list from the local one
    pub async fn refresh_texts(&mut self) -> Result<(), ControllerError> {
        self.refreshing.send_replace(true);
        let result = TextSynchronizer::new(&self.session)
            .replay_all(&self.state.texts)
            .await;
        self.refreshing.send_replace(false);
        Ok(result?)
    }

    async fn run(&mut self, command: Command) -> Result<StateDelta, ControllerError> {
        let response: Response = self.session.issue(command.clone()).await?;
        let delta = self
            .state
            .apply(&command, &response)
            .map_err(SessionError::from)?;
        Ok(delta)
    }

    fn index_of(&self, text: &str) -> Result<usize, ControllerError> {
        self.state
            .texts
            .iter()
            .position(|t| t == text)
            .ok_or_else(|| ControllerError::UnknownText(text.to_string()))
    }

    fn persist_texts(&mut self) -> Result<(), ControllerError> {
        if let Err(e) = self.store.store_list(TEXTS_KEY, &self.state.texts) {
            warn!("Failed to persist text list: {:#}", e);
            return Err(e.into());
        }
        Ok(())
    }
}
