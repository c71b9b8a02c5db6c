//! The roster: a bounded, MAC-indexed table of enrolled devices.

use std::fs;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

/// Maximum number of enrolled devices.
pub const MAX_SLAVE: usize = 100;
/// Watchdog floor: `rewrite_ms` never drops below this, regardless of cadence.
pub const MIN_REWRITE_MS: u64 = 35_000;
/// `device_address[128]` in the original; we truncate rather than overflow.
pub const MAX_DEVICE_ADDRESS_LEN: usize = 63;
/// `serial_str[128]` in the original.
pub const MAX_SERIAL_LEN: usize = 127;
/// `data[1024]` in the original.
pub const MAX_PAYLOAD_LEN: usize = 1023;

/// `rewrite_ms = max(2 * holding_ms, 35_000)`, recomputed on every notification.
pub fn rewrite_ms_for(holding_ms: u64) -> u64 {
    holding_ms.saturating_mul(2).max(MIN_REWRITE_MS)
}

fn truncate_owned(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        // Truncate on a char boundary so we never split a multi-byte codepoint.
        let mut end = max_len;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}

/// One enrolled device. Generic over the BLE connection handle type so the
/// roster itself stays free of any dependency on a concrete BLE backend.
#[derive(Debug, Clone)]
pub struct SlaveRecord<H> {
    pub device_address: String,
    pub serial: String,
    pub holding_ms: u64,
    pub rewrite_ms: u64,
    pub last_update_ms: u64,
    pub connection: Option<H>,
    pub last_payload: Vec<u8>,
    /// `true` once a `"T"` poll has been written and no ack-worthy
    /// notification has arrived for it yet (the `Polling` state).
    pub poll_outstanding: bool,
}

impl<H> SlaveRecord<H> {
    fn new(device_address: &str, holding_ms: u64) -> Self {
        Self {
            device_address: truncate_owned(device_address, MAX_DEVICE_ADDRESS_LEN),
            serial: String::new(),
            holding_ms,
            rewrite_ms: rewrite_ms_for(holding_ms),
            last_update_ms: 0,
            connection: None,
            last_payload: Vec::new(),
            poll_outstanding: false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Identify-once: the serial is read only while empty and survives
    /// reconnects once learned.
    pub fn set_serial_if_unknown(&mut self, serial: &str) {
        if self.serial.is_empty() {
            self.serial = truncate_owned(serial, MAX_SERIAL_LEN);
        }
    }

    /// Apply an inbound notification: store the payload, refresh
    /// `last_update_ms`, and widen the watchdog window.
    pub fn record_notification(&mut self, payload: &[u8], now_ms: u64) {
        let end = payload.len().min(MAX_PAYLOAD_LEN);
        self.last_payload = payload[..end].to_vec();
        self.last_update_ms = now_ms;
        self.rewrite_ms = rewrite_ms_for(self.holding_ms);
        self.poll_outstanding = false;
    }
}

/// Outcome of [`Roster::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added(usize),
    Duplicate,
    Full,
}

/// The in-memory device table.
pub struct Roster<H> {
    records: Vec<SlaveRecord<H>>,
    /// Suppresses re-persisting devices that were themselves loaded from
    /// the on-disk list, so the file is never duplicated.
    loaded_from_file: bool,
}

impl<H> Roster<H> {
    pub fn new() -> Self {
        Self { records: Vec::new(), loaded_from_file: false }
    }

    pub fn loaded_from_file(&self) -> bool {
        self.loaded_from_file
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, device_address: &str) -> Option<usize> {
        self.records.iter().position(|r| r.device_address == device_address)
    }

    pub fn get(&self, index: usize) -> Option<&SlaveRecord<H>> {
        self.records.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut SlaveRecord<H>> {
        self.records.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SlaveRecord<H>> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut SlaveRecord<H>> {
        self.records.iter_mut()
    }

    /// Enroll a device. Rejects duplicates and enforces [`MAX_SLAVE`].
    pub fn add(&mut self, device_address: &str, holding_ms: u64) -> AddOutcome {
        if self.find(device_address).is_some() {
            return AddOutcome::Duplicate;
        }
        if self.records.len() >= MAX_SLAVE {
            return AddOutcome::Full;
        }
        self.records.push(SlaveRecord::new(device_address, holding_ms));
        AddOutcome::Added(self.records.len() - 1)
    }

    /// Append `"<mac> <holding_ms>\n"` to `path`, unless this roster was
    /// itself loaded from that file.
    pub fn persist(&self, path: impl AsRef<Path>, device_address: &str, holding_ms: u64) -> io::Result<()> {
        if self.loaded_from_file {
            return Ok(());
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{device_address} {holding_ms}")
    }

    /// Load a previously-persisted device list. Lines are `"<mac> <holding_ms>"`;
    /// malformed lines are skipped with a warning, matching the tolerant
    /// parsing the rest of this daemon applies to external input.
    pub fn load_from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let mut roster = Self::new();
        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, char::is_whitespace);
            let mac = parts.next().unwrap_or_default();
            let holding_ms = parts.next().and_then(|s| s.trim().parse::<u64>().ok());
            match holding_ms {
                Some(holding_ms) if !mac.is_empty() => {
                    roster.add(mac, holding_ms);
                }
                _ => log::warn!("slave_list: skipping malformed line {}: {line:?}", line_no + 1),
            }
        }
        roster.loaded_from_file = true;
        Ok(roster)
    }
}

impl<H> Default for Roster<H> {
    fn default() -> Self {
        Self::new()
    }
}
