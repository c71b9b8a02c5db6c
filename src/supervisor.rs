//! The per-device session supervisor: the state machine in
//! the per-device state machine's transition table, driven once per device
//! per tick by [`step`].

use std::time::Duration;

use tokio::time::sleep;

use crate::ble::BleAdapter;
use crate::clock::Clock;
use crate::control_link::ControlLink;
use crate::roster::SlaveRecord;

/// Observable state of one device's session, derived from `SlaveRecord`
/// fields rather than stored separately — there is exactly one source of
/// truth (`connection`, `poll_outstanding`, `last_update_ms`) and this is a
/// view over it for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Identified,
    Polling,
}

pub fn state_of<H>(record: &SlaveRecord<H>) -> SupervisorState {
    match (record.is_connected(), record.poll_outstanding) {
        (false, _) => SupervisorState::Idle,
        (true, true) => SupervisorState::Polling,
        (true, false) => SupervisorState::Identified,
    }
}

/// Drive one device's supervisor forward by one step, if it is due. Called
/// once per device per tick by the master loop.
///
/// Persisting a fresh enrollment to the device-list file is the caller's
/// concern (the roster already tracks `loaded_from_file`); this function
/// only mutates the in-memory record.
pub async fn step<A: BleAdapter>(
    record: &mut SlaveRecord<A::Handle>,
    adapter: &mut A,
    control_link: &mut ControlLink,
    clock: &dyn Clock,
) {
    let now = clock.now_ms();
    let due = now.saturating_sub(record.last_update_ms) >= record.holding_ms;

    if !record.is_connected() {
        if due {
            connect_device(record, adapter, clock).await;
        }
        return;
    }

    if record.poll_outstanding {
        poll_for_notification(record, adapter, control_link, clock).await;
        return;
    }

    if due {
        send_poll(record, adapter, clock).await;
    }
}

async fn connect_device<A: BleAdapter>(record: &mut SlaveRecord<A::Handle>, adapter: &mut A, clock: &dyn Clock) {
    let now = clock.now_ms();
    match adapter.connect(&record.device_address).await {
        Ok(handle) => {
            let is_first_identify = record.serial.is_empty();
            if is_first_identify {
                match adapter.read_serial(&handle).await {
                    Ok(serial) => record.set_serial_if_unknown(&serial),
                    Err(err) => {
                        log::warn!("{}: read serial failed: {err}", record.device_address);
                        adapter.disconnect(handle).await;
                        record.last_update_ms = now;
                        return;
                    }
                }
            }
            if let Err(err) = adapter.subscribe(&handle).await {
                log::warn!("{}: subscribe failed: {err}", record.device_address);
                adapter.disconnect(handle).await;
                record.last_update_ms = now;
                return;
            }
            record.connection = Some(handle);
            record.last_update_ms = now;
        }
        Err(err) => {
            log::warn!("{}: connect failed: {err}", record.device_address);
            // Defer the next attempt by one rewrite window; no backoff growth.
            record.last_update_ms = now.saturating_add(record.rewrite_ms);
        }
    }
}

async fn send_poll<A: BleAdapter>(record: &mut SlaveRecord<A::Handle>, adapter: &mut A, clock: &dyn Clock) {
    let Some(handle) = record.connection.as_ref() else { return };
    match adapter.write(handle, b"T").await {
        Ok(()) => {
            record.last_update_ms = clock.now_ms();
            record.poll_outstanding = true;
            sleep(Duration::from_millis(1000)).await;
        }
        Err(err) => {
            log::warn!("{}: poll write failed: {err}", record.device_address);
            disconnect_to_idle(record, adapter, clock).await;
        }
    }
}

async fn poll_for_notification<A: BleAdapter>(
    record: &mut SlaveRecord<A::Handle>,
    adapter: &mut A,
    control_link: &mut ControlLink,
    clock: &dyn Clock,
) {
    let Some(handle) = record.connection.as_mut() else { return };
    match adapter.poll_notification(handle).await {
        Ok(Some(payload)) => {
            record.record_notification(&payload, clock.now_ms());
            let ack_result = match record.connection.as_ref() {
                Some(handle) => adapter.write(handle, b"R").await,
                None => return,
            };
            if let Err(err) = ack_result {
                log::warn!("{}: ack write failed: {err}", record.device_address);
                disconnect_to_idle(record, adapter, clock).await;
                return;
            }
            sleep(Duration::from_millis(100)).await;

            if let Err(err) = control_link
                .send_notification(&record.serial, &record.last_payload, &record.device_address)
                .await
            {
                log::warn!("{}: forward to control link failed: {err}", record.device_address);
            }
        }
        Ok(None) => {}
        Err(err) => {
            log::warn!("{}: notification poll failed: {err}", record.device_address);
            disconnect_to_idle(record, adapter, clock).await;
        }
    }
}

/// Watchdog sweep: any connected record whose last update is
/// older than its rewrite window is considered dead.
pub fn is_stale<H>(record: &SlaveRecord<H>, now_ms: u64) -> bool {
    record.is_connected() && now_ms.saturating_sub(record.last_update_ms) > record.rewrite_ms
}

pub async fn disconnect_to_idle<A: BleAdapter>(
    record: &mut SlaveRecord<A::Handle>,
    adapter: &mut A,
    clock: &dyn Clock,
) {
    if let Some(handle) = record.connection.take() {
        adapter.unsubscribe(&handle).await;
        adapter.disconnect(handle).await;
    }
    record.poll_outstanding = false;
    record.last_update_ms = clock.now_ms();
}
