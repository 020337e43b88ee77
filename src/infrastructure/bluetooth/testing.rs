//! In-process stand-ins for the BLE link used by unit tests

use crate::domain::models::{DeviceSnapshot, Response, Rgb};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::session::SessionManager;
use crate::infrastructure::bluetooth::transport::{Transport, TransportError, TransportEvents};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Forwards every written payload to a channel
pub struct MockTransport {
    sent: mpsc::UnboundedSender<Vec<u8>>,
    pub fail_writes: AtomicBool,
}

impl MockTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Vec<u8>>) {
        let (sent, rx) = mpsc::unbounded_channel();
        (
            Self {
                sent,
                fail_writes: AtomicBool::new(false),
            },
            rx,
        )
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_bytes(&self, payload: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::WriteFailed("mock write refused".to_string()));
        }
        self.sent
            .send(payload.to_vec())
            .map_err(|_| TransportError::NotConnected)
    }

    async fn request_notification(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Session over a [`MockTransport`] with the link already up
pub fn ready_session(
    timeout: Option<Duration>,
) -> (Arc<SessionManager>, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (transport, rx) = MockTransport::new();
    let session = Arc::new(SessionManager::new(Arc::new(transport), timeout));
    session.on_ready();
    (session, rx)
}

/// Answer each request with `reply`; `None` leaves the request unanswered.
/// Returns every request seen, in order.
pub fn spawn_device<F>(
    session: Arc<SessionManager>,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    reply: F,
) -> Arc<Mutex<Vec<Value>>>
where
    F: Fn(&Value) -> Option<Response> + Send + 'static,
{
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let request: Value = serde_json::from_slice(&payload).unwrap_or(Value::Null);
            let answer = reply(&request);
            log.lock().unwrap().push(request);
            if let Some(response) = answer {
                let bytes = protocol::encode_response(&response).unwrap();
                session.on_bytes_received(&bytes);
            }
        }
    });
    seen
}

/// Snapshot reported by [`firmware_reply`] on sync
pub fn firmware_snapshot() -> DeviceSnapshot {
    DeviceSnapshot {
        brightness: 70,
        speed: 90,
        repeats: Some(3),
        color: Rgb::new(10, 20, 30),
        active_text_index: None,
        active_visual_index: Some(1),
    }
}

/// Reply the way well-behaved firmware would
pub fn firmware_reply(request: &Value) -> Option<Response> {
    let token = match request["op"].as_str()? {
        "sync" => return Some(Response::synced(firmware_snapshot())),
        "brightness" | "speed" | "repeats" | "color" => "updated",
        "visual" => "activated",
        "text" => match request["action"].as_str()? {
            "insert" => "inserted",
            "delete" => "deleted",
            "activate" => "activated",
            "repeats" => "updated",
            _ => "error",
        },
        _ => "error",
    };
    Some(Response::new(token))
}
