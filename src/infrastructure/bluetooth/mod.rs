//! Bluetooth Module
//!
//! Command/response session with the LED matrix over one BLE characteristic.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    SessionManager                        │
//! │   (one command in flight, reply correlation, timeout)    │
//! └──────────┬───────────────────────────────▲──────────────┘
//!            │ Transport                     │ TransportEvents
//!            ▼                               │
//! ┌──────────────────────┐        ┌──────────┴───────────┐
//! │ BleTransport (ble)   │        │ notification pump     │
//! │ - write/read         │───────►│ - inbound values      │
//! │ - connect/disconnect │        │ - disconnects         │
//! └──────────────────────┘        └──────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Wire format, UUIDs, encoding and decoding
//! - [`transport`] - The seam between the session and the link
//! - [`session`] - Single-outstanding-request session manager
//! - [`sync`] - Sequential replay of the text list
//! - `scanner`, `connection`, `service` - btleplug link (feature `ble`)

pub mod protocol;
pub mod session;
pub mod sync;
pub mod transport;

#[cfg(feature = "ble")]
pub mod connection;
#[cfg(feature = "ble")]
pub mod scanner;
#[cfg(feature = "ble")]
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use session::{SessionError, SessionManager};
#[cfg(feature = "ble")]
pub use service::BluetoothService;
