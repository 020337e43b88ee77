//! BLE Connection Module
//!
//! Connects to the peripheral, finds the read/write characteristic, and pumps
//! its notifications into the session. Adapter events are watched as well,
//! since some platforms report a dropped link there without ending the
//! notification stream.

use crate::infrastructure::bluetooth::scanner::adapter_error;
use crate::infrastructure::bluetooth::transport::{Transport, TransportError, TransportEvents};
use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Peripheral as _, WriteType,
};
use btleplug::platform::{Adapter, Peripheral};
use futures::{Stream, StreamExt};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub characteristic_uuid: Uuid,
    /// Read the characteristic after every write instead of waiting for a notification
    pub poll_read_after_write: bool,
}

/// A connected peripheral and its characteristic
struct ActiveLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
    write_type: WriteType,
    pump: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl ActiveLink {
    fn stop_tasks(&self) {
        self.pump.abort();
        self.watcher.abort();
    }
}

/// Report `on_disconnected` once `stream` yields `target`
///
/// Items are `None` for adapter events that are not disconnects.
pub(crate) async fn forward_disconnects<S, T>(
    mut stream: S,
    target: T,
    events: Arc<dyn TransportEvents>,
) where
    S: Stream<Item = Option<T>> + Unpin,
    T: PartialEq + Debug,
{
    while let Some(id) = stream.next().await {
        if id.as_ref() == Some(&target) {
            info!("Adapter reported {:?} disconnected", target);
            events.on_disconnected();
            return;
        }
    }
    debug!("Adapter event stream ended");
}

/// [`Transport`] over whichever peripheral is currently connected
pub struct BleTransport {
    link: RwLock<Option<ActiveLink>>,
    config: ConnectionConfig,
    events: RwLock<Option<Arc<dyn TransportEvents>>>,
}

impl BleTransport {
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            link: RwLock::new(None),
            config,
            events: RwLock::new(None),
        }
    }

    /// Route inbound values and lifecycle events to `events`
    pub async fn set_events(&self, events: Arc<dyn TransportEvents>) {
        *self.events.write().await = Some(events);
    }

    /// Connect to `peripheral` found through `adapter` and report readiness
    pub async fn connect(
        &self,
        adapter: &Adapter,
        peripheral: Peripheral,
    ) -> Result<(), TransportError> {
        let events = self
            .events
            .read()
            .await
            .clone()
            .ok_or(TransportError::NotReady)?;

        match self.open(adapter, peripheral, events.clone()).await {
            Ok(link) => {
                if let Some(old) = self.link.write().await.replace(link) {
                    old.stop_tasks();
                }
                events.on_ready();
                Ok(())
            }
            Err(e) => {
                events.on_connect_failed(&e.to_string());
                Err(e)
            }
        }
    }

    async fn open(
        &self,
        adapter: &Adapter,
        peripheral: Peripheral,
        events: Arc<dyn TransportEvents>,
    ) -> Result<ActiveLink, TransportError> {
        info!("Connecting to peripheral {}", peripheral.address());
        peripheral.connect().await.map_err(adapter_error)?;
        peripheral.discover_services().await.map_err(adapter_error)?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == self.config.characteristic_uuid)
            .ok_or_else(|| {
                TransportError::Adapter(format!(
                    "characteristic {} not found",
                    self.config.characteristic_uuid
                ))
            })?;
        info!("Discovered target characteristic, ready to read/write");

        let write_type = if characteristic.properties.contains(CharPropFlags::WRITE) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        if characteristic.properties.contains(CharPropFlags::NOTIFY) {
            peripheral
                .subscribe(&characteristic)
                .await
                .map_err(adapter_error)?;
        } else {
            warn!("Characteristic does not notify, relying on reads");
        }

        let mut notifications = peripheral.notifications().await.map_err(adapter_error)?;
        let central_events = adapter.events().await.map_err(adapter_error)?;
        let watcher = tokio::spawn(forward_disconnects(
            central_events.map(|event| match event {
                CentralEvent::DeviceDisconnected(id) => Some(id),
                _ => None,
            }),
            peripheral.id(),
            events.clone(),
        ));

        let uuid = characteristic.uuid;
        let pump = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid == uuid {
                    events.on_bytes_received(&notification.value);
                }
            }
            debug!("Notification stream ended");
            events.on_disconnected();
        });

        Ok(ActiveLink {
            peripheral,
            characteristic,
            write_type,
            pump,
            watcher,
        })
    }

    pub async fn disconnect(&self) -> Result<(), TransportError> {
        let link = self.link.write().await.take();
        let Some(link) = link else {
            return Err(TransportError::NotConnected);
        };
        link.stop_tasks();
        link.peripheral.disconnect().await.map_err(adapter_error)?;
        if let Some(events) = self.events.read().await.as_ref() {
            events.on_disconnected();
        }
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        match self.link.read().await.as_ref() {
            Some(link) => link.peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn send_bytes(&self, payload: &[u8]) -> Result<(), TransportError> {
        let guard = self.link.read().await;
        let link = guard.as_ref().ok_or(TransportError::NotConnected)?;
        debug!("Sending data: {}", String::from_utf8_lossy(payload));
        link.peripheral
            .write(&link.characteristic, payload, link.write_type)
            .await
            .map_err(|e| {
                error!("Characteristic write failed: {}", e);
                TransportError::WriteFailed(e.to_string())
            })
    }

    async fn request_notification(&self) -> Result<(), TransportError> {
        if !self.config.poll_read_after_write {
            return Ok(());
        }
        let value = {
            let guard = self.link.read().await;
            let link = guard.as_ref().ok_or(TransportError::NotConnected)?;
            link.peripheral
                .read(&link.characteristic)
                .await
                .map_err(|e| TransportError::ReadFailed(e.to_string()))?
        };
        if let Some(events) = self.events.read().await.as_ref() {
            events.on_bytes_received(&value);
        }
        Ok(())
    }
}
