//! Error kinds for the connector daemon: one variant per failure surface,
//! with a `retryable()`/`is_fatal()` helper standing in for the recovery
//! column of the original design's error table.

/// Errors raised anywhere in the daemon.
///
/// No variant here is fatal to another device's session except
/// [`ConnectorError::SlaveFileMissing`], which aborts startup.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectorError {
    #[error("connect to {device_address} failed: {reason}")]
    BleConnectFailed { device_address: String, reason: String },

    #[error("BLE I/O on {device_address} failed: {reason}")]
    BleIoFailed { device_address: String, reason: String },

    #[error(
        "{device_address} watchdog fired: no notification for {elapsed_ms}ms (rewrite window {rewrite_ms}ms)"
    )]
    BleStale { device_address: String, elapsed_ms: u64, rewrite_ms: u64 },

    #[error("control link send failed: {reason}")]
    CtrlLinkSendFailed { reason: String },

    #[error("control link ingress parse failed: {reason}")]
    CtrlLinkParseFailed { reason: String },

    #[error("roster is full (max {max} slaves)")]
    RosterFull { max: usize },

    #[error("device {device_address} is already enrolled")]
    RosterDuplicate { device_address: String },

    #[error("maintenance config invalid: {reason}")]
    ConfigInvalid { reason: String },

    #[error("device list file missing or empty at {path}")]
    SlaveFileMissing { path: String },
}

impl ConnectorError {
    /// True for errors whose recovery path is "try again", matching the
    /// "no error is fatal to another device's session" rule — everything
    /// except a missing device-list file at startup is retryable somewhere
    /// in the tick loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::SlaveFileMissing { .. })
    }
}
