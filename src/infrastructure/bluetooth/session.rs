//! Session Manager
//!
//! Owns the characteristic and keeps exactly one command in flight. The wire
//! protocol has no request id, so the next inbound payload is by construction
//! the reply to the last command sent. Issuing while a request is outstanding
//! fails with [`SessionError::Busy`] instead of queueing.
//!
//! ```text
//!  issue(cmd) ──encode──► Transport::send_bytes
//!      │                        │
//!      │ pending slot           ▼
//!      └──── oneshot ◄── on_bytes_received ◄── notification
//! ```
//!
//! The pending slot is freed on reply, timeout, cancel, connection loss, or
//! when the issuing future is dropped.

use crate::domain::models::{Command, CommandError, ConnectionState, DeviceError, Response};
use crate::infrastructure::bluetooth::protocol::{self, CodecError};
use crate::infrastructure::bluetooth::transport::{Transport, TransportError, TransportEvents};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("another command is still waiting for its reply")]
    Busy,

    #[error("device is not ready")]
    NotReady,

    #[error("invalid command: {0}")]
    InvalidCommand(#[from] CommandError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    ProtocolError(#[from] CodecError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("connection lost before the reply arrived")]
    ConnectionLost,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("request cancelled")]
    Cancelled,
}

impl SessionError {
    /// Reason string reported by the device, if this is a device-side failure
    pub fn device_reason(&self) -> Option<&str> {
        match self {
            Self::Device(e) => Some(e.reason()),
            _ => None,
        }
    }
}

type Completion = oneshot::Sender<Result<Response, SessionError>>;

/// The single in-flight request
struct PendingRequest {
    id: u64,
    command: Command,
    issued_at: Instant,
    completion: Completion,
}

#[derive(Default)]
struct SessionSlot {
    state: ConnectionState,
    pending: Option<PendingRequest>,
    next_id: u64,
}

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    slot: Mutex<SessionSlot>,
    state_tx: watch::Sender<ConnectionState>,
    response_timeout: Option<Duration>,
}

impl SessionManager {
    /// Create a session over `transport`. `None` waits forever for replies.
    pub fn new(transport: Arc<dyn Transport>, response_timeout: Option<Duration>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            slot: Mutex::new(SessionSlot::default()),
            state_tx,
            response_timeout,
        }
    }

    /// Send one command and wait for its reply
    pub async fn issue(&self, command: Command) -> Result<Response, SessionError> {
        let (completion, reply) = oneshot::channel();

        let (id, payload) = {
            let mut slot = self.lock_slot();
            if slot.state != ConnectionState::Ready {
                return Err(SessionError::NotReady);
            }
            if let Some(pending) = &slot.pending {
                debug!(
                    "Rejecting {}: request #{} ({}) still outstanding",
                    command.op(),
                    pending.id,
                    pending.command.op()
                );
                return Err(SessionError::Busy);
            }
            command.validate()?;
            let payload = protocol::encode(&command)?;

            slot.next_id += 1;
            let id = slot.next_id;
            slot.pending = Some(PendingRequest {
                id,
                command: command.clone(),
                issued_at: Instant::now(),
                completion,
            });
            (id, payload)
        };
        let _guard = PendingGuard { session: self, id };

        debug!(
            "Sending request #{}: {}",
            id,
            String::from_utf8_lossy(&payload)
        );
        if let Err(e) = self.transport.send_bytes(&payload).await {
            error!("Request #{} ({}) write failed: {}", id, command.op(), e);
            return Err(e.into());
        }
        if let Err(e) = self.transport.request_notification().await {
            error!("Request #{} ({}) read request failed: {}", id, command.op(), e);
            return Err(e.into());
        }

        let outcome = match self.response_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("Request #{} ({}) timed out after {:?}", id, command.op(), limit);
                    return Err(SessionError::Timeout(limit));
                }
            },
            None => reply.await,
        };
        // A dropped sender means the slot was cleared without a verdict
        outcome.unwrap_or(Err(SessionError::Cancelled))
    }

    /// Abandon the outstanding request. The command may already be on the air.
    pub fn cancel(&self) -> bool {
        match self.take_pending() {
            Some(pending) => {
                info!("Cancelling request #{} ({})", pending.id, pending.command.op());
                let _ = pending.completion.send(Err(SessionError::Cancelled));
                true
            }
            None => false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_slot().state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Record a lifecycle step owned by the link (scanning, connecting)
    pub fn observe_state(&self, state: ConnectionState) {
        self.lock_slot().state = state;
        self.state_tx.send_replace(state);
    }

    pub fn is_busy(&self) -> bool {
        self.lock_slot().pending.is_some()
    }

    /// Op name of the outstanding request, if any
    pub fn outstanding(&self) -> Option<&'static str> {
        self.lock_slot().pending.as_ref().map(|p| p.command.op())
    }

    pub fn on_connection_lost(&self) {
        self.observe_state(ConnectionState::Disconnected);
        if let Some(pending) = self.take_pending() {
            warn!(
                "Connection lost while request #{} ({}) was outstanding",
                pending.id,
                pending.command.op()
            );
            let _ = pending.completion.send(Err(SessionError::ConnectionLost));
        }
    }

    fn lock_slot(&self) -> MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_pending(&self) -> Option<PendingRequest> {
        self.lock_slot().pending.take()
    }

    /// Drop the pending request if it is still `id`
    fn clear_pending(&self, id: u64) -> bool {
        let mut slot = self.lock_slot();
        if slot.pending.as_ref().is_some_and(|p| p.id == id) {
            slot.pending = None;
            true
        } else {
            false
        }
    }
}

impl TransportEvents for SessionManager {
    fn on_ready(&self) {
        info!("Characteristic ready, session accepting commands");
        self.observe_state(ConnectionState::Ready);
    }

    fn on_bytes_received(&self, bytes: &[u8]) {
        let pending = self.take_pending();
        let Some(pending) = pending else {
            warn!(
                "Discarding unsolicited payload: {}",
                String::from_utf8_lossy(bytes)
            );
            return;
        };

        debug!(
            "Reply to request #{} after {:?}: {}",
            pending.id,
            pending.issued_at.elapsed(),
            String::from_utf8_lossy(bytes)
        );
        let outcome = match protocol::decode(bytes, &pending.command) {
            Ok(response) => match response.confirm(&pending.command) {
                Ok(()) => Ok(response),
                Err(e) => {
                    warn!("Request #{} rejected by device: {}", pending.id, e);
                    Err(SessionError::Device(e))
                }
            },
            Err(e) => {
                warn!("Request #{} got an unreadable reply: {}", pending.id, e);
                Err(SessionError::ProtocolError(e))
            }
        };
        let _ = pending.completion.send(outcome);
    }

    fn on_disconnected(&self) {
        info!("Peripheral disconnected");
        self.on_connection_lost();
    }

    fn on_connect_failed(&self, reason: &str) {
        warn!("Failed to connect: {}", reason);
        self.on_connection_lost();
    }
}

/// Frees the slot when `issue` returns or its future is dropped
struct PendingGuard<'a> {
    session: &'a SessionManager,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.session.clear_pending(self.id) {
            debug!("Released request #{}", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Rgb, TextOp};
    use crate::infrastructure::bluetooth::testing::{ready_session, spawn_device, MockTransport};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_brightness_updated() {
        let (session, rx) = ready_session(None);
        spawn_device(session.clone(), rx, |_| Some(Response::new("updated")));

        let response = session.issue(Command::SetBrightness(50)).await.unwrap();
        assert_eq!(response.token, "updated");
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_issue_while_outstanding_is_busy() {
        let (session, mut rx) = ready_session(None);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.issue(Command::Sync).await })
        };
        // Once the payload is on the wire the slot is taken
        rx.recv().await.unwrap();
        assert_eq!(session.outstanding(), Some("sync"));

        let second = session.issue(Command::SetSpeed(10)).await;
        assert!(matches!(second, Err(SessionError::Busy)));
        assert!(rx.try_recv().is_err(), "busy request must not be sent");

        assert!(session.cancel());
        assert!(matches!(first.await.unwrap(), Err(SessionError::Cancelled)));
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_not_ready_before_link_is_up() {
        let (transport, mut rx) = MockTransport::new();
        let session = SessionManager::new(Arc::new(transport), None);

        assert!(matches!(
            session.issue(Command::Sync).await,
            Err(SessionError::NotReady)
        ));
        session.observe_state(ConnectionState::Connecting);
        assert!(matches!(
            session.issue(Command::Sync).await,
            Err(SessionError::NotReady)
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_command_never_sent() {
        let (session, mut rx) = ready_session(None);
        assert!(matches!(
            session.issue(Command::SetBrightness(101)).await,
            Err(SessionError::InvalidCommand(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_busy_wins_over_invalid_command() {
        let (session, mut rx) = ready_session(None);
        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.issue(Command::Sync).await })
        };
        rx.recv().await.unwrap();

        assert!(matches!(
            session.issue(Command::SetBrightness(101)).await,
            Err(SessionError::Busy)
        ));

        session.cancel();
        assert!(matches!(first.await.unwrap(), Err(SessionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_ok_token_to_non_sync_is_device_failure() {
        let (session, mut rx) = ready_session(None);
        let device = {
            let session = session.clone();
            tokio::spawn(async move {
                rx.recv().await.unwrap();
                session.on_bytes_received(br#"{"response":"ok","reason":"busy"}"#);
            })
        };

        let err = session.issue(Command::SetBrightness(50)).await.unwrap_err();
        assert!(matches!(err, SessionError::Device(_)));
        assert_eq!(err.device_reason(), Some("busy"));
        device.await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_token_is_device_failure() {
        let (session, rx) = ready_session(None);
        spawn_device(session.clone(), rx, |_| {
            Some(Response::failure("deleted", "wrong slot"))
        });

        let err = session
            .issue(Command::TextOp(TextOp::insert(0, "hi")))
            .await
            .unwrap_err();
        assert_eq!(err.device_reason(), Some("wrong slot"));
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_unreadable_reply_is_protocol_error() {
        let (session, mut rx) = ready_session(None);
        let device = {
            let session = session.clone();
            tokio::spawn(async move {
                rx.recv().await.unwrap();
                session.on_bytes_received(b"{\"response\":");
            })
        };

        let err = session.issue(Command::SetColor(Rgb::new(1, 2, 3))).await;
        assert!(matches!(err, Err(SessionError::ProtocolError(CodecError::Malformed(_)))));
        device.await.unwrap();
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_unsolicited_payload_is_discarded() {
        let (session, rx) = ready_session(None);
        session.on_bytes_received(br#"{"response":"updated"}"#);
        session.on_bytes_received(b"garbage");

        spawn_device(session.clone(), rx, |_| Some(Response::new("activated")));
        assert!(session.issue(Command::ActivateVisual(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_connection_lost_frees_slot() {
        let (session, mut rx) = ready_session(None);

        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.issue(Command::Sync).await })
        };
        rx.recv().await.unwrap();
        session.on_disconnected();

        assert!(matches!(first.await.unwrap(), Err(SessionError::ConnectionLost)));
        assert!(!session.is_busy());
        assert_eq!(session.state(), ConnectionState::Disconnected);

        session.on_ready();
        spawn_device(session.clone(), rx, |_| Some(Response::new("updated")));
        assert!(session.issue(Command::SetSpeed(20)).await.is_ok());
    }

    #[tokio::test]
    async fn test_connect_failure_reports_disconnected() {
        let (session, _rx) = ready_session(None);
        let mut states = session.subscribe_state();
        session.on_connect_failed("peripheral went away");
        assert_eq!(*states.borrow_and_update(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_timeout_frees_slot_and_late_reply_is_dropped() {
        let (session, mut rx) = ready_session(Some(Duration::from_millis(50)));

        let err = session.issue(Command::Sync).await;
        assert!(matches!(err, Err(SessionError::Timeout(_))));
        assert!(!session.is_busy());

        // The reply to the timed-out request shows up late
        rx.recv().await.unwrap();
        session.on_bytes_received(br#"{"response":"updated"}"#);
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_write_failure_surfaces_transport_error() {
        let (transport, _rx) = MockTransport::new();
        transport.fail_writes.store(true, Ordering::SeqCst);
        let session = SessionManager::new(Arc::new(transport), None);
        session.on_ready();

        let err = session.issue(Command::SetRepeats(2)).await;
        assert!(matches!(
            err,
            Err(SessionError::Transport(TransportError::WriteFailed(_)))
        ));
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_dropped_issue_future_frees_slot() {
        let (session, mut rx) = ready_session(None);
        {
            let pending = session.issue(Command::Sync);
            tokio::pin!(pending);
            tokio::select! {
                _ = &mut pending => panic!("no reply was sent"),
                sent = rx.recv() => assert!(sent.is_some()),
            }
            assert!(session.is_busy());
        }
        assert!(!session.is_busy());
    }

    #[tokio::test]
    async fn test_requests_are_answered_in_order() {
        let (session, rx) = ready_session(None);
        let seen = spawn_device(session.clone(), rx, |request| {
            Some(Response::new(match request["op"].as_str() {
                Some("visual") => "activated",
                _ => "updated",
            }))
        });

        session.issue(Command::SetBrightness(1)).await.unwrap();
        session.issue(Command::ActivateVisual(2)).await.unwrap();
        session.issue(Command::SetSpeed(3)).await.unwrap();

        let ops: Vec<String> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r["op"].as_str().unwrap_or_default().to_string())
            .collect();
        assert_eq!(ops, vec!["brightness", "visual", "speed"]);
    }
}
