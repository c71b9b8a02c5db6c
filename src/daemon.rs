//! The assembled daemon (startup, master tick loop, shutdown),
//! binding the globals the original source kept in file-scope statics
//! (`g_connections`, `g_sockfd`, `m_main_loop`) into one owned value, per
//! the "actor-with-state" rewrite guidance.

use std::path::PathBuf;

use crate::ble::BleAdapter;
use crate::clock::Clock;
use crate::config::MaintenanceConfig;
use crate::control_link::ControlLink;
use crate::error::ConnectorError;
use crate::roster::{AddOutcome, Roster, MAX_SLAVE};
use crate::supervisor;

/// Default persisted device-list path.
pub const DEFAULT_DEVICE_LIST_PATH: &str = "/etc/coint/slave_list.txt";
/// Default maintenance-config path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/coint/bleserver.config";

/// How the process should exit once the tick loop returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT.
    Signal,
    /// The maintenance window elapsed.
    MaintenanceReboot,
}

impl ShutdownReason {
    /// Exit code: `0` for both normal and maintenance-reboot exit.
    pub fn exit_code(self) -> i32 {
        0
    }
}

pub struct Daemon<C: Clock, A: BleAdapter> {
    clock: C,
    adapter: A,
    roster: Roster<A::Handle>,
    control_link: ControlLink,
    maintenance_ms: u64,
    device_list_path: PathBuf,
    start_ms: u64,
}

impl<C: Clock, A: BleAdapter> Daemon<C, A> {
    /// Assemble a daemon from its already-constructed collaborators. This
    /// is the shape `bootstrap` in the binary crate calls into; it is kept
    /// free of filesystem/env access so tests can build one directly.
    pub fn new(
        clock: C,
        adapter: A,
        roster: Roster<A::Handle>,
        control_link: ControlLink,
        maintenance_ms: u64,
        device_list_path: PathBuf,
    ) -> Self {
        let start_ms = clock.now_ms();
        Self { clock, adapter, roster, control_link, maintenance_ms, device_list_path, start_ms }
    }

    pub fn roster(&self) -> &Roster<A::Handle> {
        &self.roster
    }

    /// Enroll a device from a control-link ingress tuple, persisting it to
    /// the device-list file unless the roster was itself loaded from that
    /// file (the roster's `persist` + "a device loaded from file is never
    /// persisted again" invariant).
    fn enroll(&mut self, device_address: &str, holding_ms: u64) {
        match self.roster.add(device_address, holding_ms) {
            AddOutcome::Added(_) => {
                log::info!("enrolled {device_address} holding_ms={holding_ms}");
                if let Err(err) = self.roster.persist(&self.device_list_path, device_address, holding_ms) {
                    log::warn!("failed to persist enrollment for {device_address}: {err}");
                }
            }
            AddOutcome::Duplicate => {
                log::debug!("ignoring duplicate enrollment for {device_address}");
            }
            AddOutcome::Full => {
                log::warn!(
                    "rejecting enrollment for {device_address}: roster full (max {MAX_SLAVE})"
                );
            }
        }
    }

    /// One master tick: pump the control link, check the maintenance
    /// window, drive due supervisors, and sweep for staleness. Returns
    /// `Some(reason)` once the loop should stop.
    pub async fn tick(&mut self) -> Option<ShutdownReason> {
        self.pump_control_link().await;

        let now = self.clock.now_ms();
        if now.saturating_sub(self.start_ms) >= self.maintenance_ms {
            log::info!("maintenance window elapsed; initiating reboot");
            return Some(ShutdownReason::MaintenanceReboot);
        }

        for index in 0..self.roster.len() {
            let record = self.roster.get_mut(index).expect("index within bounds");
            supervisor::step(record, &mut self.adapter, &mut self.control_link, &self.clock).await;
        }

        self.sweep_staleness(now).await;
        None
    }

    async fn pump_control_link(&mut self) {
        let requests = match self.control_link.poll_ingress().await {
            Ok(requests) => requests,
            Err(err) => {
                log::warn!("control link pump failed: {err}");
                Vec::new()
            }
        };
        for request in requests {
            if self.roster.loaded_from_file() {
                log::debug!(
                    "ignoring ingress enrollment for {} (roster loaded from file)",
                    request.device_address
                );
                continue;
            }
            self.enroll(&request.device_address, request.holding_ms);
        }
    }

    async fn sweep_staleness(&mut self, now_ms: u64) {
        for index in 0..self.roster.len() {
            let record = self.roster.get_mut(index).expect("index within bounds");
            if supervisor::is_stale(record, now_ms) {
                log::warn!(
                    "{}: watchdog fired (no update for {}ms, rewrite window {}ms)",
                    record.device_address,
                    now_ms.saturating_sub(record.last_update_ms),
                    record.rewrite_ms
                );
                supervisor::disconnect_to_idle(record, &mut self.adapter, &self.clock).await;
            }
        }
    }

    /// Tear down every live session. Called on SIGINT and before process
    /// exit on a maintenance reboot.
    pub async fn shutdown(&mut self) {
        for index in 0..self.roster.len() {
            if let Some(record) = self.roster.get_mut(index) {
                if record.is_connected() {
                    supervisor::disconnect_to_idle(record, &mut self.adapter, &self.clock).await;
                }
            }
        }
    }
}

/// Load the maintenance config and the persisted roster the way startup
/// specifies: config never fails (falls back), a missing/empty device
/// list is the one condition that aborts startup (`SlaveFileMissing`,
/// exit code 1).
pub fn load_maintenance_config(config_path: impl AsRef<std::path::Path>) -> MaintenanceConfig {
    MaintenanceConfig::from_path(config_path)
}

pub fn load_roster<H>(device_list_path: impl AsRef<std::path::Path>) -> Result<Roster<H>, ConnectorError> {
    let path = device_list_path.as_ref();
    let roster = Roster::load_from_path(path).map_err(|err| ConnectorError::SlaveFileMissing {
        path: format!("{}: {err}", path.display()),
    })?;
    if roster.is_empty() {
        return Err(ConnectorError::SlaveFileMissing { path: format!("{}: no devices enrolled", path.display()) });
    }
    Ok(roster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::mock::{DeviceScript, MockBleAdapter};
    use crate::clock::TestClock;
    use std::net::SocketAddr;

    fn unconnectable_link() -> ControlLink {
        ControlLink::new(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    #[tokio::test(start_paused = true)]
    async fn maintenance_window_triggers_reboot_shutdown() {
        let clock = TestClock::new(0);
        let adapter = MockBleAdapter::new();
        let roster = Roster::<crate::ble::mock::MockHandle>::new();
        let link = unconnectable_link();

        let mut daemon = Daemon::new(clock.clone(), adapter, roster, link, 30_000, PathBuf::from("/tmp/unused"));

        assert_eq!(daemon.tick().await, None);
        clock.advance(30_000);
        assert_eq!(daemon.tick().await, Some(ShutdownReason::MaintenanceReboot));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_enrollment_is_rejected_and_first_holding_value_survives() {
        let clock = TestClock::new(0);
        let adapter = MockBleAdapter::new();
        adapter.set_script("AA:BB:CC:DD:EE:01", DeviceScript::happy_path("SN-001"));
        let mut roster = Roster::<crate::ble::mock::MockHandle>::new();
        roster.add("AA:BB:CC:DD:EE:01", 2_000);
        let link = unconnectable_link();

        let mut daemon = Daemon::new(clock, adapter, roster, link, 2_592_000_000, PathBuf::from("/tmp/unused"));
        daemon.enroll("AA:BB:CC:DD:EE:01", 9_999);

        assert_eq!(daemon.roster().len(), 1);
        let record = daemon.roster().get(0).unwrap();
        assert_eq!(record.holding_ms, 2_000);
    }

    #[test]
    fn load_roster_rejects_an_empty_device_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slave_list.txt");
        std::fs::write(&path, "\n\n").unwrap();

        let err = load_roster::<crate::ble::mock::MockHandle>(&path).unwrap_err();
        assert!(matches!(err, ConnectorError::SlaveFileMissing { .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn load_roster_rejects_a_missing_device_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does_not_exist.txt");

        let err = load_roster::<crate::ble::mock::MockHandle>(&path).unwrap_err();
        assert!(matches!(err, ConnectorError::SlaveFileMissing { .. }));
    }
}
