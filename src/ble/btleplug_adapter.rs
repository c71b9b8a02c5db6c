//! Real BLE backend, grounded on `reticulumd`'s `native.rs`: one `Manager`,
//! scan-then-match-by-address, resolve the two fixed characteristics, and a
//! notification stream polled without blocking the tick loop.

use std::pin::Pin;

use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, ValueNotification,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::Stream;
use futures::{FutureExt, StreamExt};
use tokio::time::{sleep, timeout};

use super::{uuid_notify, uuid_serial, uuid_write, BleAdapter, BLE_CALL_TIMEOUT};
use crate::error::ConnectorError;

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

const SCAN_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(200);

fn io_err(device_address: &str, context: &str, err: impl std::fmt::Display) -> ConnectorError {
    ConnectorError::BleIoFailed {
        device_address: device_address.to_string(),
        reason: format!("{context}: {err}"),
    }
}

fn connect_err(device_address: &str, context: &str, err: impl std::fmt::Display) -> ConnectorError {
    ConnectorError::BleConnectFailed {
        device_address: device_address.to_string(),
        reason: format!("{context}: {err}"),
    }
}

/// An open connection: the peripheral handle plus its resolved
/// characteristics and live notification stream.
pub struct BtleplugHandle {
    peripheral: Peripheral,
    write_char: Characteristic,
    notify_char: Characteristic,
    notification_stream: NotificationStream,
}

/// Production [`BleAdapter`] backed by the `btleplug` crate.
pub struct BtleplugAdapter {
    adapter: Option<Adapter>,
}

impl BtleplugAdapter {
    pub fn new() -> Self {
        Self { adapter: None }
    }

    async fn adapter(&mut self) -> Result<&Adapter, ConnectorError> {
        if self.adapter.is_none() {
            let manager = Manager::new()
                .await
                .map_err(|err| ConnectorError::BleIoFailed {
                    device_address: String::new(),
                    reason: format!("create BLE manager: {err}"),
                })?;
            let adapters = manager.adapters().await.map_err(|err| ConnectorError::BleIoFailed {
                device_address: String::new(),
                reason: format!("enumerate BLE adapters: {err}"),
            })?;
            let adapter = adapters.into_iter().next().ok_or_else(|| ConnectorError::BleIoFailed {
                device_address: String::new(),
                reason: "no BLE adapters available on host".to_string(),
            })?;
            self.adapter = Some(adapter);
        }
        Ok(self.adapter.as_ref().expect("just populated"))
    }

    async fn find_peripheral(
        &self,
        adapter: &Adapter,
        device_address: &str,
    ) -> Result<Peripheral, ConnectorError> {
        let deadline = tokio::time::Instant::now() + BLE_CALL_TIMEOUT;
        loop {
            let peripherals = adapter.peripherals().await.map_err(|err| {
                connect_err(device_address, "list peripherals", err)
            })?;
            for peripheral in peripherals {
                if identifiers_match(&peripheral, device_address).await {
                    return Ok(peripheral);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ConnectorError::BleConnectFailed {
                    device_address: device_address.to_string(),
                    reason: "scan timeout: device not found".to_string(),
                });
            }
            sleep(SCAN_POLL_INTERVAL).await;
        }
    }
}

impl Default for BtleplugAdapter {
    fn default() -> Self {
        Self::new()
    }
}

async fn identifiers_match(peripheral: &Peripheral, device_address: &str) -> bool {
    let id = peripheral.id().to_string();
    if id.eq_ignore_ascii_case(device_address) {
        return true;
    }
    match peripheral.properties().await {
        Ok(Some(props)) => props.address.to_string().eq_ignore_ascii_case(device_address),
        _ => false,
    }
}

impl BleAdapter for BtleplugAdapter {
    type Handle = BtleplugHandle;

    async fn connect(&mut self, device_address: &str) -> Result<Self::Handle, ConnectorError> {
        let adapter = self.adapter().await?;
        adapter.start_scan(ScanFilter::default()).await.map_err(|err| {
            connect_err(device_address, "start BLE scan", err)
        })?;
        let peripheral = self.find_peripheral(adapter, device_address).await?;

        timeout(BLE_CALL_TIMEOUT, async {
            if !peripheral.is_connected().await.unwrap_or(false) {
                peripheral.connect().await?;
            }
            peripheral.discover_services().await
        })
        .await
        .map_err(|_| ConnectorError::BleConnectFailed {
            device_address: device_address.to_string(),
            reason: format!("connect timeout after {}ms", BLE_CALL_TIMEOUT.as_millis()),
        })?
        .map_err(|err| connect_err(device_address, "connect/discover services", err))?;

        let write_uuid = uuid_write();
        let notify_uuid = uuid_notify();
        let characteristics = peripheral.characteristics();
        let write_char = characteristics
            .iter()
            .find(|c| c.uuid == write_uuid)
            .cloned()
            .ok_or_else(|| ConnectorError::BleConnectFailed {
                device_address: device_address.to_string(),
                reason: "write characteristic not found".to_string(),
            })?;
        let notify_char = characteristics
            .iter()
            .find(|c| c.uuid == notify_uuid)
            .cloned()
            .ok_or_else(|| ConnectorError::BleConnectFailed {
                device_address: device_address.to_string(),
                reason: "notify characteristic not found".to_string(),
            })?;

        let stream = peripheral.notifications().await.map_err(|err| {
            connect_err(device_address, "open notification stream", err)
        })?;

        // NUS RX accepts writes without response; fall back to with-response
        // if that's ever not the case for a given peripheral.
        Ok(BtleplugHandle {
            peripheral,
            write_char,
            notify_char,
            notification_stream: Box::pin(stream),
        })
    }

    async fn disconnect(&mut self, handle: Self::Handle) {
        if let Err(err) = handle.peripheral.disconnect().await {
            log::warn!("btleplug: disconnect failed: {err}");
        }
    }

    async fn unsubscribe(&mut self, handle: &Self::Handle) {
        match timeout(BLE_CALL_TIMEOUT, handle.peripheral.unsubscribe(&handle.notify_char)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::warn!("btleplug: unsubscribe failed: {err}"),
            Err(_) => log::warn!("btleplug: unsubscribe timed out"),
        }
    }

    async fn read_serial(&mut self, handle: &Self::Handle) -> Result<String, ConnectorError> {
        let serial_uuid = uuid_serial();
        let characteristic = handle
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == serial_uuid)
            .ok_or_else(|| ConnectorError::BleIoFailed {
                device_address: handle.peripheral.id().to_string(),
                reason: "serial number characteristic not found".to_string(),
            })?;

        let bytes = timeout(BLE_CALL_TIMEOUT, handle.peripheral.read(&characteristic))
            .await
            .map_err(|_| io_err(&handle.peripheral.id().to_string(), "read serial", "timed out"))?
            .map_err(|err| io_err(&handle.peripheral.id().to_string(), "read serial", err))?;

        Ok(String::from_utf8_lossy(&bytes).trim_end_matches('\0').to_string())
    }

    async fn subscribe(&mut self, handle: &Self::Handle) -> Result<(), ConnectorError> {
        let notify_uuid = uuid_notify();
        let characteristic = handle
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == notify_uuid)
            .ok_or_else(|| ConnectorError::BleIoFailed {
                device_address: handle.peripheral.id().to_string(),
                reason: "notify characteristic not found".to_string(),
            })?;

        timeout(BLE_CALL_TIMEOUT, handle.peripheral.subscribe(&characteristic))
            .await
            .map_err(|_| io_err(&handle.peripheral.id().to_string(), "subscribe", "timed out"))?
            .map_err(|err| io_err(&handle.peripheral.id().to_string(), "subscribe", err))
    }

    async fn write(&mut self, handle: &Self::Handle, payload: &[u8]) -> Result<(), ConnectorError> {
        timeout(
            BLE_CALL_TIMEOUT,
            handle.peripheral.write(&handle.write_char, payload, WriteType::WithoutResponse),
        )
        .await
        .map_err(|_| io_err(&handle.peripheral.id().to_string(), "write", "timed out"))?
        .map_err(|err| io_err(&handle.peripheral.id().to_string(), "write", err))
    }

    async fn poll_notification(
        &mut self,
        handle: &mut Self::Handle,
    ) -> Result<Option<Vec<u8>>, ConnectorError> {
        // A single non-blocking poll of the stream: `now_or_never` resolves
        // immediately whether or not a notification is queued, so this never
        // suspends the tick loop waiting for a device that has nothing to say.
        match handle.notification_stream.next().now_or_never() {
            Some(Some(notification)) => Ok(Some(notification.value)),
            Some(None) => Err(ConnectorError::BleIoFailed {
                device_address: handle.peripheral.id().to_string(),
                reason: "notification stream closed".to_string(),
            }),
            None => Ok(None),
        }
    }
}
