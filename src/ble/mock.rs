//! A scripted [`BleAdapter`] test double, grounded on `reticulumd`'s
//! `MockBackend` pattern: each device gets a small script of canned
//! responses that tests can assert were consumed in order.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::BleAdapter;
use crate::error::ConnectorError;

/// The scripted behavior for one device address.
#[derive(Default)]
pub struct DeviceScript {
    pub connect_ok: bool,
    pub connect_failure: Option<String>,
    pub serial: String,
    pub read_serial_failure: Option<String>,
    pub subscribe_ok: bool,
    pub write_failure: Option<String>,
    pub notifications: VecDeque<Vec<u8>>,
    pub writes: Vec<Vec<u8>>,
}

impl DeviceScript {
    pub fn happy_path(serial: impl Into<String>) -> Self {
        Self {
            connect_ok: true,
            connect_failure: None,
            serial: serial.into(),
            read_serial_failure: None,
            subscribe_ok: true,
            write_failure: None,
            notifications: VecDeque::new(),
            writes: Vec::new(),
        }
    }

    pub fn failing_connect(reason: impl Into<String>) -> Self {
        Self { connect_ok: false, connect_failure: Some(reason.into()), ..Self::default() }
    }

    pub fn failing_read_serial(reason: impl Into<String>) -> Self {
        Self { connect_ok: true, subscribe_ok: true, read_serial_failure: Some(reason.into()), ..Self::default() }
    }

    pub fn failing_subscribe() -> Self {
        Self { connect_ok: true, subscribe_ok: false, ..Self::default() }
    }

    pub fn push_notification(&mut self, payload: impl Into<Vec<u8>>) {
        self.notifications.push_back(payload.into());
    }
}

/// An opaque handle identifying which device's script a call addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockHandle(pub String);

/// The shared, interior-mutable script table. `Clone`-able so a test can
/// hold a handle to mutate scripts (e.g. push a new notification) while the
/// adapter itself is owned by the daemon under test.
#[derive(Clone, Default)]
pub struct MockBleAdapter {
    scripts: Arc<Mutex<HashMap<String, DeviceScript>>>,
}

impl MockBleAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_script(&self, device_address: impl Into<String>, script: DeviceScript) {
        self.scripts.lock().expect("mock adapter mutex poisoned").insert(device_address.into(), script);
    }

    pub fn push_notification(&self, device_address: &str, payload: impl Into<Vec<u8>>) {
        let mut scripts = self.scripts.lock().expect("mock adapter mutex poisoned");
        if let Some(script) = scripts.get_mut(device_address) {
            script.push_notification(payload);
        }
    }

    /// Flip whether the next `write` call for `device_address` fails, without
    /// disturbing any other scripted field — used to make a poll write
    /// succeed and a later ack write fail (or vice versa) within one test.
    pub fn set_write_failure(&self, device_address: &str, reason: Option<String>) {
        let mut scripts = self.scripts.lock().expect("mock adapter mutex poisoned");
        if let Some(script) = scripts.get_mut(device_address) {
            script.write_failure = reason;
        }
    }

    pub fn writes_for(&self, device_address: &str) -> Vec<Vec<u8>> {
        self.scripts
            .lock()
            .expect("mock adapter mutex poisoned")
            .get(device_address)
            .map(|s| s.writes.clone())
            .unwrap_or_default()
    }
}

impl BleAdapter for MockBleAdapter {
    type Handle = MockHandle;

    async fn connect(&mut self, device_address: &str) -> Result<Self::Handle, ConnectorError> {
        let scripts = self.scripts.lock().expect("mock adapter mutex poisoned");
        match scripts.get(device_address) {
            Some(script) if script.connect_ok => Ok(MockHandle(device_address.to_string())),
            Some(script) => Err(ConnectorError::BleConnectFailed {
                device_address: device_address.to_string(),
                reason: script.connect_failure.clone().unwrap_or_else(|| "scripted failure".to_string()),
            }),
            None => Err(ConnectorError::BleConnectFailed {
                device_address: device_address.to_string(),
                reason: "no script registered for device".to_string(),
            }),
        }
    }

    async fn disconnect(&mut self, _handle: Self::Handle) {}

    async fn unsubscribe(&mut self, _handle: &Self::Handle) {}

    async fn read_serial(&mut self, handle: &Self::Handle) -> Result<String, ConnectorError> {
        let scripts = self.scripts.lock().expect("mock adapter mutex poisoned");
        match scripts.get(&handle.0) {
            Some(script) => match &script.read_serial_failure {
                Some(reason) => {
                    Err(ConnectorError::BleIoFailed { device_address: handle.0.clone(), reason: reason.clone() })
                }
                None => Ok(script.serial.clone()),
            },
            None => Err(ConnectorError::BleIoFailed {
                device_address: handle.0.clone(),
                reason: "no script registered for device".to_string(),
            }),
        }
    }

    async fn subscribe(&mut self, handle: &Self::Handle) -> Result<(), ConnectorError> {
        let scripts = self.scripts.lock().expect("mock adapter mutex poisoned");
        match scripts.get(&handle.0) {
            Some(script) if script.subscribe_ok => Ok(()),
            _ => Err(ConnectorError::BleIoFailed {
                device_address: handle.0.clone(),
                reason: "scripted subscribe failure".to_string(),
            }),
        }
    }

    async fn write(&mut self, handle: &Self::Handle, payload: &[u8]) -> Result<(), ConnectorError> {
        let mut scripts = self.scripts.lock().expect("mock adapter mutex poisoned");
        match scripts.get_mut(&handle.0) {
            Some(script) => {
                if let Some(reason) = script.write_failure.clone() {
                    return Err(ConnectorError::BleIoFailed { device_address: handle.0.clone(), reason });
                }
                script.writes.push(payload.to_vec());
                Ok(())
            }
            None => Err(ConnectorError::BleIoFailed {
                device_address: handle.0.clone(),
                reason: "no script registered for device".to_string(),
            }),
        }
    }

    async fn poll_notification(
        &mut self,
        handle: &mut Self::Handle,
    ) -> Result<Option<Vec<u8>>, ConnectorError> {
        let mut scripts = self.scripts.lock().expect("mock adapter mutex poisoned");
        match scripts.get_mut(&handle.0) {
            Some(script) => Ok(script.notifications.pop_front()),
            None => Err(ConnectorError::BleIoFailed {
                device_address: handle.0.clone(),
                reason: "no script registered for device".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_and_read_serial_happy_path() {
        let adapter = MockBleAdapter::new();
        adapter.set_script("AA:BB:CC:DD:EE:01", DeviceScript::happy_path("SN-42"));
        let mut adapter = adapter;

        let handle = adapter.connect("AA:BB:CC:DD:EE:01").await.unwrap();
        assert_eq!(adapter.read_serial(&handle).await.unwrap(), "SN-42");
        assert!(adapter.subscribe(&handle).await.is_ok());
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let adapter = MockBleAdapter::new();
        adapter.set_script("AA:BB:CC:DD:EE:02", DeviceScript::failing_connect("no route to host"));
        let mut adapter = adapter;

        let err = adapter.connect("AA:BB:CC:DD:EE:02").await.unwrap_err();
        assert!(matches!(err, ConnectorError::BleConnectFailed { .. }));
    }

    #[tokio::test]
    async fn writes_are_recorded_and_notifications_drain_in_order() {
        let adapter = MockBleAdapter::new();
        let mut script = DeviceScript::happy_path("SN-1");
        script.push_notification(b"one".to_vec());
        script.push_notification(b"two".to_vec());
        adapter.set_script("AA:BB:CC:DD:EE:03", script);
        let mut adapter = adapter;

        let mut handle = adapter.connect("AA:BB:CC:DD:EE:03").await.unwrap();
        adapter.write(&handle, b"T").await.unwrap();
        assert_eq!(adapter.writes_for("AA:BB:CC:DD:EE:03"), vec![b"T".to_vec()]);

        assert_eq!(adapter.poll_notification(&mut handle).await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(adapter.poll_notification(&mut handle).await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(adapter.poll_notification(&mut handle).await.unwrap(), None);
    }
}
