//! The BLE collaborator: a small async trait
//! covering exactly the GATT operations the supervisor needs, plus the
//! fixed characteristic UUIDs every device in the fleet shares.

pub mod mock;

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub mod btleplug_adapter;

use std::time::Duration;

use uuid::Uuid;

use crate::error::ConnectorError;

/// Per-call timeout applied around every [`BleAdapter`] method by the
/// supervisor, per the suggested 10 s bound on BLE operations.
pub const BLE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Device Serial Number (0x2A25), a standard GATT characteristic.
pub fn uuid_serial() -> Uuid {
    Uuid::parse_str("00002a25-0000-1000-8000-00805f9b34fb").expect("valid built-in UUID")
}

/// Nordic UART Service RX characteristic (write).
pub fn uuid_write() -> Uuid {
    Uuid::parse_str("6e400002-b5a3-f393-e0a9-e50e24dcca9e").expect("valid built-in UUID")
}

/// Nordic UART Service TX characteristic (notify).
pub fn uuid_notify() -> Uuid {
    Uuid::parse_str("6e400003-b5a3-f393-e0a9-e50e24dcca9e").expect("valid built-in UUID")
}

/// The BLE collaborator the supervisor drives. One connection handle per
/// device, owned exclusively by that device's `SlaveRecord` — no adapter
/// method here takes `&self` across devices without the handle identifying
/// which connection it addresses.
///
/// Implemented with an `async fn` in the trait rather than `async_trait`,
/// matching `reticulumd`'s `BleBackend`.
#[allow(async_fn_in_trait)]
pub trait BleAdapter {
    /// An open GATT connection. Dropping it should disconnect.
    type Handle: Send;

    /// Scan for and connect to `device_address`, resolving the serial,
    /// write, and notify characteristics.
    async fn connect(&mut self, device_address: &str) -> Result<Self::Handle, ConnectorError>;

    /// Tear down a connection. Best-effort; errors are logged, not
    /// propagated, since the caller is usually already cleaning up.
    async fn disconnect(&mut self, handle: Self::Handle);

    /// Read the device serial number characteristic.
    async fn read_serial(&mut self, handle: &Self::Handle) -> Result<String, ConnectorError>;

    /// Subscribe to notifications on the notify characteristic.
    async fn subscribe(&mut self, handle: &Self::Handle) -> Result<(), ConnectorError>;

    /// Unsubscribe from the notify characteristic. Called before
    /// `disconnect` on the watchdog and shutdown paths (the `Stale`
    /// transition and process-shutdown row); best-effort, like `disconnect`.
    async fn unsubscribe(&mut self, handle: &Self::Handle);

    /// Write `payload` to the write characteristic (the `"T"` poll token).
    async fn write(&mut self, handle: &Self::Handle, payload: &[u8]) -> Result<(), ConnectorError>;

    /// Non-blocking check for a queued notification. `Ok(None)` means no
    /// notification is currently available, matching the tick loop's
    /// one-shot-per-device poll rather than a background task per device.
    /// Takes the handle mutably: the real backend polls a `Stream` held
    /// inside it, which requires exclusive access.
    async fn poll_notification(
        &mut self,
        handle: &mut Self::Handle,
    ) -> Result<Option<Vec<u8>>, ConnectorError>;
}
