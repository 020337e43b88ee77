//! BLE Scanner Module
//!
//! Handles Bluetooth LE discovery of LED matrix peripherals.

use crate::domain::models::ScannedDevice;
use crate::infrastructure::bluetooth::transport::TransportError;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub(crate) fn adapter_error(e: btleplug::Error) -> TransportError {
    TransportError::Adapter(e.to_string())
}

/// Scanner bound to the first local Bluetooth adapter
pub struct BleScanner {
    adapter: Adapter,
}

impl BleScanner {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new().await.map_err(adapter_error)?;
        let adapter = manager
            .adapters()
            .await
            .map_err(adapter_error)?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Adapter("No Bluetooth adapters found".to_string()))?;
        Ok(Self { adapter })
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Scan for `duration` and return matching peripherals
    ///
    /// # Arguments
    /// * `service_uuid` - Advertised service to match when no name filter is given
    /// * `name_filter` - Match on advertised local name instead (case-insensitive substring)
    pub async fn scan(
        &self,
        service_uuid: Uuid,
        name_filter: Option<&str>,
        duration: Duration,
    ) -> Result<Vec<(ScannedDevice, Peripheral)>, TransportError> {
        info!("Starting BLE scan for service UUID: {}", service_uuid);
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(adapter_error)?;
        tokio::time::sleep(duration).await;
        let peripherals = self.adapter.peripherals().await.map_err(adapter_error)?;
        self.adapter.stop_scan().await.map_err(adapter_error)?;

        let needle = name_filter.map(str::to_lowercase);
        let mut found = Vec::new();
        for peripheral in peripherals {
            let Some(props) = peripheral.properties().await.map_err(adapter_error)? else {
                continue;
            };
            let name = props.local_name.clone().unwrap_or_default();
            let matches = match &needle {
                Some(needle) => name.to_lowercase().contains(needle.as_str()),
                None => props.services.contains(&service_uuid),
            };
            debug!(
                "Saw {} ({}) rssi={:?} match={}",
                props.address, name, props.rssi, matches
            );
            if matches {
                let device = ScannedDevice {
                    name: if name.is_empty() {
                        "Unknown".to_string()
                    } else {
                        name
                    },
                    address: props.address.to_string(),
                    signal_strength: props.rssi,
                };
                found.push((device, peripheral));
            }
        }
        info!("Scan finished, {} matching peripherals", found.len());
        Ok(found)
    }
}
