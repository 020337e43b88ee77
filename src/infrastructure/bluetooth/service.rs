//! Bluetooth Service Module
//!
//! Main service that coordinates scanning, connection and the command session
//! for the LED matrix.

use crate::domain::models::{ConnectionState, ScannedDevice};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::{
    connection::{BleTransport, ConnectionConfig},
    scanner::BleScanner,
    session::SessionManager,
};
use anyhow::{Context, Result};
use btleplug::platform::Peripheral;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService {
    scanner: BleScanner,
    transport: Arc<BleTransport>,
    session: Arc<SessionManager>,
    service_uuid: Uuid,
    name_filter: Option<String>,
    scan_duration: Duration,
    found: Vec<(ScannedDevice, Peripheral)>,
}

impl BluetoothService {
    /// Create a new Bluetooth service
    pub async fn new(settings: &Settings) -> Result<Self> {
        let service_uuid = Uuid::parse_str(&settings.ble_service_uuid)
            .context("Invalid BLE service UUID in settings")?;
        let characteristic_uuid = Uuid::parse_str(&settings.ble_characteristic_uuid)
            .context("Invalid BLE characteristic UUID in settings")?;

        let transport = Arc::new(BleTransport::new(ConnectionConfig {
            characteristic_uuid,
            poll_read_after_write: settings.poll_read_after_write,
        }));
        let session = Arc::new(SessionManager::new(
            transport.clone(),
            settings.response_timeout(),
        ));
        transport.set_events(session.clone()).await;

        Ok(Self {
            scanner: BleScanner::new().await?,
            transport,
            session,
            service_uuid,
            name_filter: settings.ble_name_filter.clone(),
            scan_duration: Duration::from_millis(settings.scan_duration_ms),
            found: Vec::new(),
        })
    }

    /// Session that owns the characteristic
    pub fn session(&self) -> Arc<SessionManager> {
        self.session.clone()
    }

    /// Scan for devices
    pub async fn scan(&mut self) -> Result<Vec<ScannedDevice>> {
        self.session.observe_state(ConnectionState::Scanning);
        let result = self
            .scanner
            .scan(self.service_uuid, self.name_filter.as_deref(), self.scan_duration)
            .await;
        self.session.observe_state(ConnectionState::Disconnected);

        self.found = result?;
        Ok(self.found.iter().map(|(d, _)| d.clone()).collect())
    }

    /// Connect to a scanned device by address, or to the first one found
    pub async fn connect(&mut self, address: Option<&str>) -> Result<ScannedDevice> {
        if self.found.is_empty() {
            self.scan().await?;
        }
        let index = match address {
            Some(address) => self
                .found
                .iter()
                .position(|(d, _)| d.address.eq_ignore_ascii_case(address))
                .with_context(|| format!("Peripheral {} not found", address))?,
            None if !self.found.is_empty() => 0,
            None => anyhow::bail!("No LED matrix found"),
        };
        let (device, peripheral) = self.found.swap_remove(index);

        info!("Connecting to {} ({})", device.name, device.address);
        self.session.observe_state(ConnectionState::Connecting);
        self.transport
            .connect(self.scanner.adapter(), peripheral)
            .await?;
        Ok(device)
    }

    /// Disconnect from the current device
    pub async fn disconnect(&mut self) -> Result<()> {
        if !self.transport.is_connected().await {
            return Ok(());
        }
        self.transport.disconnect().await?;
        info!("Disconnected from device");
        Ok(())
    }
}
