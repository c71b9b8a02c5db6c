//! BLE fleet connector daemon library: the roster, control link, BLE
//! adapter trait, per-device supervisor, and the assembled daemon tick
//! loop. The binary crate (`cointd`) wires these to real I/O.

pub mod ble;
pub mod clock;
pub mod config;
pub mod control_link;
pub mod daemon;
pub mod error;
pub mod roster;
pub mod supervisor;

pub use clock::{Clock, SystemClock};
pub use daemon::{Daemon, ShutdownReason};
pub use error::ConnectorError;
pub use roster::Roster;
