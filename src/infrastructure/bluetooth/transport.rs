//! Transport Seam
//!
//! The session only ever talks to the characteristic through [`Transport`],
//! and the link reports back through [`TransportEvents`]. A BLE stack, a
//! serial bridge or a test double can sit behind either side.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("link not ready")]
    NotReady,

    #[error("no connected peripheral")]
    NotConnected,

    #[error("characteristic write failed: {0}")]
    WriteFailed(String),

    #[error("characteristic read failed: {0}")]
    ReadFailed(String),

    #[error("BLE adapter error: {0}")]
    Adapter(String),
}

/// Outbound half of the link
#[async_trait]
pub trait Transport: Send + Sync {
    /// Write one payload to the characteristic
    async fn send_bytes(&self, payload: &[u8]) -> Result<(), TransportError>;

    /// Ask for the next inbound value. It arrives later through
    /// [`TransportEvents::on_bytes_received`].
    async fn request_notification(&self) -> Result<(), TransportError>;
}

/// Inbound half of the link, called by whatever owns the connection
pub trait TransportEvents: Send + Sync {
    /// Characteristic discovered, reads and writes possible
    fn on_ready(&self);

    fn on_bytes_received(&self, bytes: &[u8]);

    fn on_disconnected(&self);

    fn on_connect_failed(&self, reason: &str);
}
