//! Serial transport abstraction for the controller link.
//!
//! The session and discovery layers never name a concrete port type. They
//! work through [`DynSerial`], a boxed `AsyncRead + AsyncWrite` object, so
//! the same code talks to:
//!
//! - `tokio_serial::SerialStream` (real hardware)
//! - `tokio::io::DuplexStream` (tests with a scripted peer)
//!
//! [`open_serial`] applies the controller's fixed line settings (8 data
//! bits, no parity, one stop bit, no flow control) and wraps the blocking
//! open in `spawn_blocking` so it cannot stall the runtime.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::error::{StepError, StepResult};

/// Trait alias for async serial port I/O.
///
/// Any `AsyncRead + AsyncWrite + Unpin + Send` type qualifies, which is what
/// lets duplex streams stand in for hardware in tests.
pub trait SerialPortIO: AsyncRead + AsyncWrite + Unpin + Send {}

// Blanket implementation for every type meeting the bounds
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SerialPortIO for T {}

/// Type-erased boxed serial port.
pub type DynSerial = Box<dyn SerialPortIO>;

/// Open a serial port with the controller's line settings.
///
/// Settings are fixed at 8-N-1 with no flow control; only the device path
/// and baud rate vary. The open itself is a blocking syscall, so it runs on
/// the blocking pool.
///
/// # Errors
///
/// Returns [`StepError::Transport`] if the port cannot be opened.
pub async fn open_serial(path: &str, baud_rate: u32) -> StepResult<tokio_serial::SerialStream> {
    use tokio::task::spawn_blocking;
    use tokio_serial::SerialPortBuilderExt;

    let path_owned = path.to_string();
    spawn_blocking(move || {
        tokio_serial::new(&path_owned, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
    })
    .await
    .map_err(|join_err| StepError::Transport(std::io::Error::other(join_err)))?
    .map_err(|serial_err| StepError::Transport(serial_err.into()))
}

/// Read and discard whatever is sitting in the receive buffer.
///
/// Used when taking ownership of a freshly probed port: the probe exchange
/// can leave trailing bytes behind, and stale console output from before the
/// program started must not be mistaken for a command response. Returns the
/// number of bytes thrown away.
pub async fn drain_port<R: AsyncRead + Unpin>(port: &mut R, window: Duration) -> usize {
    let mut discard = [0u8; 128];
    let deadline = tokio::time::Instant::now() + window;
    let mut total = 0usize;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        match tokio::time::timeout(remaining, port.read(&mut discard)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total += n,
            // Errors end the drain; the next real read will surface them.
            Ok(Err(_)) => break,
            Err(_) => break,
        }
    }

    if total > 0 {
        tracing::debug!("discarded {} stale bytes", total);
    }
    total
}
