use std::path::PathBuf;

use coint_daemon::ble::btleplug_adapter::BtleplugAdapter;
use coint_daemon::control_link::ControlLink;
use coint_daemon::daemon::{load_maintenance_config, load_roster, Daemon};
use coint_daemon::roster::Roster;
use coint_daemon::SystemClock;

use super::Args;

/// Assemble a production [`Daemon`] from parsed CLI arguments: load the
/// maintenance config (never fails), load the persisted roster (aborts
/// startup if missing/empty), and open the control link.
pub async fn bootstrap(args: Args) -> Result<Daemon<SystemClock, BtleplugAdapter>, i32> {
    let maintenance = load_maintenance_config(&args.config);
    log::info!("maintenance window set to {}ms", maintenance.maintenance_ms);

    let roster: Roster<<BtleplugAdapter as coint_daemon::ble::BleAdapter>::Handle> =
        match load_roster(&args.device_list) {
            Ok(roster) => roster,
            Err(err) => {
                log::error!("startup aborted: {err}");
                return Err(1);
            }
        };
    log::info!("loaded {} device(s) from {}", roster.len(), args.device_list.display());

    let control_addr = format!("{}:{}", args.control_host, args.control_port);
    let control_link = match control_addr.parse() {
        Ok(addr) => ControlLink::new(addr),
        Err(err) => {
            log::error!("invalid control link address {control_addr}: {err}");
            return Err(1);
        }
    };

    let daemon = Daemon::new(
        SystemClock::new(),
        BtleplugAdapter::new(),
        roster,
        control_link,
        maintenance.maintenance_ms,
        PathBuf::from(&args.device_list),
    );
    Ok(daemon)
}
