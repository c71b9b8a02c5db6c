#[path = "bootstrap.rs"]
mod bootstrap;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use coint_daemon::daemon::{DEFAULT_CONFIG_PATH, DEFAULT_DEVICE_LIST_PATH};
use coint_daemon::ShutdownReason;

#[derive(Parser, Debug)]
#[command(name = "cointd", about = "BLE fleet connector daemon")]
struct Args {
    /// Maintenance-window config file: one decimal integer, milliseconds.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Persisted device list: one `<mac> <holding_ms>` line per device.
    #[arg(long, default_value = DEFAULT_DEVICE_LIST_PATH)]
    device_list: PathBuf,

    /// Control-link backend host.
    #[arg(long, default_value = "127.0.0.1")]
    control_host: String,

    /// Control-link backend port.
    #[arg(long, default_value_t = coint_daemon::control_link::CONTROL_LINK_PORT)]
    control_port: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut daemon = match bootstrap::bootstrap(args).await {
        Ok(daemon) => daemon,
        Err(code) => return ExitCode::from(code as u8),
    };

    let shutdown_reason = loop {
        tokio::select! {
            reason = tick_until_due(&mut daemon) => break reason,
            _ = tokio::signal::ctrl_c() => {
                log::info!("received SIGINT; shutting down");
                break ShutdownReason::Signal;
            }
        }
    };

    daemon.shutdown().await;

    match shutdown_reason {
        ShutdownReason::Signal => log::info!("exit after signal"),
        ShutdownReason::MaintenanceReboot => {
            log::info!(
                "exit for maintenance reboot; a process supervisor should relaunch cointd \
                 (previously: fork/exec of /home/pi/InsightIoT/iot_ble_server/cmd_restart)"
            );
        }
    }
    ExitCode::from(shutdown_reason.exit_code() as u8)
}

/// Run ticks until one returns a shutdown reason, throttling to avoid a
/// busy loop when nothing in the roster is due.
async fn tick_until_due(
    daemon: &mut coint_daemon::Daemon<
        coint_daemon::SystemClock,
        coint_daemon::ble::btleplug_adapter::BtleplugAdapter,
    >,
) -> ShutdownReason {
    loop {
        if let Some(reason) = daemon.tick().await {
            return reason;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
