//! Controller discovery: find the right serial port by asking.
//!
//! USB serial adapters enumerate under unpredictable names, so the reliable
//! way to find the controller is to probe: open each plausible port, send a
//! deliberately invalid command, and accept the port whose reply carries the
//! console's undefined-command signature. A wrong device either stays
//! silent or answers with something else, and the scan moves on.
//!
//! What counts as "the controller" is data: a [`ControllerProfile`] names
//! the probe bytes, the expected signature, the baud rate, and the response
//! markers. The driver crate for a controller family supplies its profile
//! as a constant.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{StepError, StepResult};
use crate::framing::ResponseMarkers;
use crate::serial::{drain_port, open_serial, DynSerial, SerialPortIO};
use crate::session::Session;

/// How a caller names the device to talk to.
///
/// Replaces the older convention of overloading the port argument with a
/// magic string for dry runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// Use exactly this serial device path.
    Physical(String),
    /// Scan candidate ports and probe each one.
    AutoDetect,
    /// No hardware: the session discards writes and returns empty reads.
    Simulated,
}

/// Identity and link parameters for one controller family.
#[derive(Debug, Clone, Copy)]
pub struct ControllerProfile {
    /// Human-readable name for logs.
    pub name: &'static str,
    /// Fixed console baud rate.
    pub baud_rate: u32,
    /// Deliberately invalid command sent as the probe challenge.
    pub probe_command: &'static [u8],
    /// Substring of the reply that identifies the console.
    pub probe_signature: &'static str,
    /// Response marker set for the console's framer.
    pub markers: ResponseMarkers,
}

/// Port names worth probing contain one of these substrings.
///
/// Covers the usual device nodes for USB serial adapters on macOS
/// (`usbserial`) and Linux (`ttyUSB`). Onboard UARTs and Bluetooth ports
/// are skipped rather than fed probe bytes.
const PORT_NAME_HINTS: [&str; 2] = ["usbserial", "ttyUSB"];

/// Cap on how many reply bytes a probe will collect.
const PROBE_REPLY_CAP: usize = 128;

/// How long a probe waits for the reply to finish arriving.
const PROBE_WINDOW: Duration = Duration::from_millis(250);

/// How long buffer drains may spend soaking up stale bytes.
const DRAIN_WINDOW: Duration = Duration::from_millis(50);

/// What one probe exchange produced.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// Whether the reply carried the profile's signature.
    pub matched: bool,
    /// The raw reply text, for diagnostics.
    pub reply: String,
}

/// List candidate serial ports in lexicographic order.
///
/// Enumerates the host's serial devices and keeps only names matching the
/// USB adapter hints. The substring match is case sensitive, same as the
/// device nodes themselves.
pub fn candidate_ports() -> StepResult<Vec<String>> {
    let mut names: Vec<String> = serialport::available_ports()
        .map_err(|e| StepError::Transport(e.into()))?
        .into_iter()
        .map(|p| p.port_name)
        .filter(|name| is_candidate_name(name))
        .collect();
    names.sort();
    Ok(names)
}

fn is_candidate_name(name: &str) -> bool {
    PORT_NAME_HINTS.iter().any(|hint| name.contains(hint))
}

/// Challenge an open port and check the reply for the profile signature.
///
/// Writes the probe command, then collects up to [`PROBE_REPLY_CAP`] bytes
/// inside the probe window, stopping early once the signature shows up.
/// A silent or foreign device yields `matched: false`; only real I/O
/// failures are errors.
pub async fn probe<P: SerialPortIO>(
    port: &mut P,
    profile: &ControllerProfile,
) -> StepResult<ProbeOutcome> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    port.write_all(profile.probe_command).await?;
    port.flush().await?;

    let mut reply = Vec::new();
    let mut buf = [0u8; 32];
    let deadline = tokio::time::Instant::now() + PROBE_WINDOW;

    while reply.len() < PROBE_REPLY_CAP {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let want = buf.len().min(PROBE_REPLY_CAP - reply.len());
        match tokio::time::timeout(remaining, port.read(&mut buf[..want])).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => {
                reply.extend_from_slice(&buf[..n]);
                if String::from_utf8_lossy(&reply).contains(profile.probe_signature) {
                    break;
                }
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => break,
        }
    }

    let reply = String::from_utf8_lossy(&reply).into_owned();
    let matched = reply.contains(profile.probe_signature);
    debug!("probe reply ({} bytes): {:?}", reply.len(), reply);
    Ok(ProbeOutcome { matched, reply })
}

/// Probe an open transport and adopt it as a session on a signature match.
///
/// The adopted port is drained before the session is handed over, so
/// leftover probe output cannot leak into the first real command's
/// response. A reply without the profile signature is
/// [`StepError::NoDeviceFound`]; the port drops, which closes it.
async fn accept_port(mut port: DynSerial, profile: &ControllerProfile) -> StepResult<Session> {
    let outcome = probe(&mut port, profile).await?;
    if !outcome.matched {
        return Err(StepError::NoDeviceFound);
    }
    drain_port(&mut port, DRAIN_WINDOW).await;
    Ok(Session::connected(port, profile.markers))
}

/// Resolve a selector into a ready [`Session`].
///
/// - `Simulated` attaches no transport.
/// - `Physical(path)` opens that port, probes it, and refuses to return a
///   session for a device that does not answer as the profile's controller.
/// - `AutoDetect` walks [`candidate_ports`] in order and keeps the first
///   port that passes the probe.
///
/// # Errors
///
/// [`StepError::NoDeviceFound`] when every candidate (or the named port)
/// fails the probe; [`StepError::Transport`] for I/O failures on a named
/// port.
pub async fn discover(
    selector: &DeviceSelector,
    profile: &ControllerProfile,
) -> StepResult<Session> {
    match selector {
        DeviceSelector::Simulated => {
            info!("dry run: simulating a {}", profile.name);
            Ok(Session::simulated(profile.markers))
        }
        DeviceSelector::Physical(path) => {
            info!("trying serial port: {}", path);
            let port: DynSerial = Box::new(open_serial(path, profile.baud_rate).await?);
            match accept_port(port, profile).await {
                Ok(session) => {
                    info!("using serial port: {}", path);
                    Ok(session)
                }
                Err(StepError::NoDeviceFound) => {
                    warn!("device on {} did not answer as a {}", path, profile.name);
                    Err(StepError::NoDeviceFound)
                }
                Err(e) => Err(e),
            }
        }
        DeviceSelector::AutoDetect => {
            let candidates = candidate_ports()?;
            if candidates.is_empty() {
                warn!("no usb serial adapters present on this host");
            }
            for path in &candidates {
                info!("trying serial port: {}", path);
                let port: DynSerial = match open_serial(path, profile.baud_rate).await {
                    Ok(port) => Box::new(port),
                    Err(e) => {
                        debug!("skipping {}: {}", path, e);
                        continue;
                    }
                };
                match accept_port(port, profile).await {
                    Ok(session) => {
                        info!("using serial port: {}", path);
                        return Ok(session);
                    }
                    Err(StepError::NoDeviceFound) => {
                        debug!("{}: no {} signature", path, profile.name);
                    }
                    Err(e) => debug!("{}: probe failed: {}", path, e),
                }
            }
            Err(StepError::NoDeviceFound)
        }
    }
}
