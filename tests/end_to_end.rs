//! End-to-end scenarios driving the assembled `Daemon` against a scripted
//! BLE adapter and a real loopback TCP peer standing in for the backend
//! collector.

use std::net::SocketAddr;
use std::path::PathBuf;

use coint_daemon::ble::mock::{DeviceScript, MockBleAdapter};
use coint_daemon::clock::TestClock;
use coint_daemon::control_link::ControlLink;
use coint_daemon::daemon::{Daemon, ShutdownReason};
use coint_daemon::roster::Roster;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;

async fn backend_peer() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn scratch_device_list_path() -> PathBuf {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("slave_list.txt");
    // keep the tempdir alive for the rest of the test's duration
    std::mem::forget(dir);
    path
}

#[tokio::test(start_paused = true)]
async fn single_device_happy_path_forwards_one_egress_line_and_one_ack() {
    let (listener, addr) = backend_peer().await;
    let accept_task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 256];
        let n = socket.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    });

    let adapter = MockBleAdapter::new();
    let mut script = DeviceScript::happy_path("SN-001");
    script.push_notification(b"DATA1".to_vec());
    adapter.set_script("AA:BB:CC:DD:EE:01", script);

    let mut roster = Roster::new();
    roster.add("AA:BB:CC:DD:EE:01", 2_000);

    let clock = TestClock::new(0);
    let control_link = ControlLink::new(addr);
    let mut daemon =
        Daemon::new(clock.clone(), adapter.clone(), roster, control_link, 2_592_000_000, PathBuf::from("/tmp/unused"));

    daemon.tick().await; // connect + identify
    clock.advance(2_000);
    daemon.tick().await; // poll write
    daemon.tick().await; // notification arrives, ack, forward to control link

    let received = accept_task.await.unwrap();
    assert_eq!(received, b"SN-001 DATA1 mac: AA:BB:CC:DD:EE:01");
    assert_eq!(adapter.writes_for("AA:BB:CC:DD:EE:01"), vec![b"T".to_vec(), b"R".to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn enrollment_via_control_link_adds_both_devices_in_order() {
    let (listener, addr) = backend_peer().await;
    let ingress_task = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        socket.writable().await.unwrap();
        socket.try_write(b",AA:BB:CC:DD:EE:02 1.5,AA:BB:CC:DD:EE:03 2.0").unwrap();
    });

    let adapter = MockBleAdapter::new();
    let roster = Roster::new();
    let clock = TestClock::new(0);
    let control_link = ControlLink::new(addr);
    let device_list_path = scratch_device_list_path();
    let mut daemon =
        Daemon::new(clock, adapter, roster, control_link, 2_592_000_000, device_list_path.clone());

    daemon.tick().await; // opens the connection, accepting the backend's side
    ingress_task.await.unwrap(); // backend writes its enrollment buffer
    daemon.tick().await; // drains and parses it

    assert_eq!(daemon.roster().len(), 2);
    assert_eq!(daemon.roster().get(0).unwrap().holding_ms, 1_500);
    assert_eq!(daemon.roster().get(1).unwrap().holding_ms, 2_000);

    let contents = std::fs::read_to_string(&device_list_path).unwrap();
    assert_eq!(contents, "AA:BB:CC:DD:EE:02 1500\nAA:BB:CC:DD:EE:03 2000\n");
}

#[tokio::test(start_paused = true)]
async fn watchdog_reconnects_a_silent_device_after_the_rewrite_window() {
    let adapter = MockBleAdapter::new();
    adapter.set_script("AA:BB:CC:DD:EE:05", DeviceScript::happy_path("SN-005"));

    let mut roster = Roster::new();
    roster.add("AA:BB:CC:DD:EE:05", 2_000);

    let clock = TestClock::new(0);
    let control_link = ControlLink::new(SocketAddr::from(([127, 0, 0, 1], 0)));
    let mut daemon =
        Daemon::new(clock.clone(), adapter.clone(), roster, control_link, 2_592_000_000, PathBuf::from("/tmp/unused"));

    daemon.tick().await; // connect + identify
    assert!(daemon.roster().get(0).unwrap().is_connected());

    clock.advance(2_000);
    daemon.tick().await; // due: sends the poll, enters the outstanding-request state
    assert!(daemon.roster().get(0).unwrap().is_connected());

    // The mock never emits a notification, so the record's last_update_ms
    // stays pinned at the poll's timestamp; once the rewrite window from
    // *that* timestamp elapses, the sweep must disconnect it.
    clock.advance(35_001);
    daemon.tick().await; // staleness sweep disconnects

    assert!(!daemon.roster().get(0).unwrap().is_connected());
}

#[tokio::test(start_paused = true)]
async fn send_failure_reconnects_the_control_link_and_delivers_the_next_message() {
    use tokio::sync::oneshot;

    let (listener, addr) = backend_peer().await;
    let (first_closed_tx, first_closed_rx) = oneshot::channel();

    // One backend task serves both the original connection (closed after
    // one message, simulating the peer dropping it) and the reconnect.
    let peer_task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let _ = socket.read(&mut buf).await.unwrap();
        drop(socket);
        let _ = first_closed_tx.send(());

        let (mut socket, _) = listener.accept().await.unwrap();
        let n = socket.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    });

    let mut link = ControlLink::new(addr);
    link.send_notification("SN-009", b"Initialized", "AA:BB:CC:DD:EE:09").await.unwrap();
    first_closed_rx.await.unwrap();

    let dropped_attempt = link.send_notification("SN-009", b"DROPPED", "AA:BB:CC:DD:EE:09").await;
    assert!(dropped_attempt.is_err(), "writing on a peer-closed connection should fail and reconnect");

    link.send_notification("SN-009", b"DATA9", "AA:BB:CC:DD:EE:09").await.unwrap();

    let received = peer_task.await.unwrap();
    assert_eq!(received, b"SN-009 DATA9 mac: AA:BB:CC:DD:EE:09");
}

#[tokio::test(start_paused = true)]
async fn maintenance_reboot_exits_with_code_zero_after_the_configured_window() {
    let adapter = MockBleAdapter::new();
    let roster = Roster::<coint_daemon::ble::mock::MockHandle>::new();
    let clock = TestClock::new(0);
    let control_link = ControlLink::new(SocketAddr::from(([127, 0, 0, 1], 0)));
    let mut daemon = Daemon::new(clock.clone(), adapter, roster, control_link, 30_000, PathBuf::from("/tmp/unused"));

    assert_eq!(daemon.tick().await, None);
    clock.advance(30_000);
    let reason = daemon.tick().await.expect("maintenance window should have elapsed");
    assert_eq!(reason, ShutdownReason::MaintenanceReboot);
    assert_eq!(reason.exit_code(), 0);

    daemon.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn duplicate_enrollment_leaves_the_file_untouched() {
    let (listener, addr) = backend_peer().await;
    let ingress_task = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        socket.writable().await.unwrap();
        socket.try_write(b",AA:BB:CC:DD:EE:01 2.0").unwrap();
    });

    let adapter = MockBleAdapter::new();
    let mut roster = Roster::new();
    roster.add("AA:BB:CC:DD:EE:01", 2_000);

    let clock = TestClock::new(0);
    let control_link = ControlLink::new(addr);
    let device_list_path = scratch_device_list_path();
    std::fs::write(&device_list_path, "AA:BB:CC:DD:EE:01 2000\n").unwrap();

    let mut daemon =
        Daemon::new(clock, adapter, roster, control_link, 2_592_000_000, device_list_path.clone());

    daemon.tick().await; // opens the connection
    ingress_task.await.unwrap();
    daemon.tick().await; // drains the duplicate enrollment tuple

    assert_eq!(daemon.roster().len(), 1);
    assert_eq!(daemon.roster().get(0).unwrap().holding_ms, 2_000);

    let contents = std::fs::read_to_string(&device_list_path).unwrap();
    assert_eq!(contents, "AA:BB:CC:DD:EE:01 2000\n");
}
