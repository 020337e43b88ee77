//! Remote control for a BLE LED matrix.
//!
//! Commands travel as flat JSON records over a single read/write
//! characteristic with exactly one command in flight at a time. See
//! [`infrastructure::bluetooth`] for the session and wire format,
//! [`domain::state`] for the device mirror, and [`controller`] for the
//! high-level operations.

pub mod controller;
pub mod domain;
pub mod infrastructure;

pub use controller::{ControllerError, LedController};
pub use domain::models::{Command, ConnectionState, Response, Rgb, TextAction, TextOp};
pub use domain::state::{DeviceState, StateDelta};
pub use infrastructure::bluetooth::{SessionError, SessionManager};
