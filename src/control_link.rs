//! The control link: a single loopback TCP client carrying egress
//! notifications and ingress enrollment tuples, unframed.

use std::io::ErrorKind;
use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::error::ConnectorError;

/// Fixed destination per the control-link protocol.
pub const CONTROL_LINK_PORT: u16 = 1337;

/// Ingress reads are capped at this size; a longer line is truncated.
const INGRESS_BUFFER_LEN: usize = 1024;

/// A parsed `<mac> <seconds>` ingress tuple, converted to milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRequest {
    pub device_address: String,
    pub holding_ms: u64,
}

/// Parse one ingress buffer into zero or more enrollment requests.
///
/// The backend's framing prepends a separator byte that this parser skips
/// unconditionally before splitting the remainder on `,`; each tuple is
/// `"<mac> <seconds>"`. A tuple that fails to parse abandons everything
/// after it in the buffer, matching the source's `sscanf`-then-give-up
/// behavior.
pub fn parse_ingress(raw: &str) -> Vec<EnrollmentRequest> {
    if raw.is_empty() {
        return Vec::new();
    }
    let mut chars = raw.chars();
    chars.next();
    let rest = chars.as_str();

    let mut out = Vec::new();
    for tuple in rest.split(',') {
        let tuple = tuple.trim();
        if tuple.is_empty() {
            continue;
        }
        let mut parts = tuple.splitn(2, char::is_whitespace);
        let mac = parts.next().unwrap_or_default().trim();
        let seconds = parts.next().and_then(|s| s.trim().parse::<f64>().ok());
        match seconds {
            Some(seconds) if !mac.is_empty() => {
                let holding_ms = (seconds * 1000.0).round() as u64;
                out.push(EnrollmentRequest { device_address: mac.to_string(), holding_ms });
            }
            _ => {
                log::warn!("control link: ingress parse failed at tuple {tuple:?}; abandoning remainder");
                break;
            }
        }
    }
    out
}

/// Format one egress line: `"<serial> <payload> mac: <address>"`, no
/// trailing newline. `Initialized` (an enrollment acknowledgement) is
/// formatted identically; callers pass it as an ordinary payload.
pub fn format_egress(serial: &str, payload: &[u8], device_address: &str) -> Vec<u8> {
    let mut line = Vec::with_capacity(serial.len() + payload.len() + device_address.len() + 8);
    line.extend_from_slice(serial.as_bytes());
    line.push(b' ');
    line.extend_from_slice(payload);
    line.extend_from_slice(b" mac: ");
    line.extend_from_slice(device_address.as_bytes());
    line
}

/// The single process-wide TCP client to the backend collector.
pub struct ControlLink {
    addr: SocketAddr,
    stream: Option<TcpStream>,
}

impl ControlLink {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr, stream: None }
    }

    pub fn loopback() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], CONTROL_LINK_PORT)))
    }

    async fn reconnect(&mut self) -> Result<(), ConnectorError> {
        self.stream = None;
        let stream = TcpStream::connect(self.addr).await.map_err(|err| {
            ConnectorError::CtrlLinkSendFailed { reason: format!("reconnect to {}: {err}", self.addr) }
        })?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn ensure_connected(&mut self) -> Result<(), ConnectorError> {
        if self.stream.is_none() {
            self.reconnect().await?;
        }
        Ok(())
    }

    /// Send one notification line. On any write failure the socket is
    /// closed and reopened immediately; the message itself is dropped,
    /// matching the control link's documented recovery.
    pub async fn send_notification(
        &mut self,
        serial: &str,
        payload: &[u8],
        device_address: &str,
    ) -> Result<(), ConnectorError> {
        self.ensure_connected().await?;
        let line = format_egress(serial, payload, device_address);

        let write_result = match self.stream.as_mut() {
            Some(stream) => stream.write_all(&line).await,
            None => unreachable!("ensure_connected just populated the stream"),
        };

        if let Err(err) = write_result {
            let reason = format!("write to control link: {err}");
            self.reconnect().await.ok();
            return Err(ConnectorError::CtrlLinkSendFailed { reason });
        }
        Ok(())
    }

    /// Non-blocking drain of any pending ingress. `EAGAIN`/`WouldBlock` and
    /// a zero-byte read both mean "no data"; the link stays open in both
    /// cases. Returns the enrollment requests parsed out of whatever
    /// arrived, in order.
    pub async fn poll_ingress(&mut self) -> Result<Vec<EnrollmentRequest>, ConnectorError> {
        self.ensure_connected().await?;
        let stream = match self.stream.as_ref() {
            Some(stream) => stream,
            None => unreachable!("ensure_connected just populated the stream"),
        };

        let mut buf = [0u8; INGRESS_BUFFER_LEN];
        match stream.try_read(&mut buf) {
            Ok(0) => Ok(Vec::new()),
            Ok(n) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                Ok(parse_ingress(&text))
            }
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(err) => {
                let reason = format!("read from control link: {err}");
                self.reconnect().await.ok();
                Err(ConnectorError::CtrlLinkSendFailed { reason })
            }
        }
    }
}
