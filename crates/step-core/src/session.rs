//! The session channel: one open console link, one command at a time.
//!
//! A [`Session`] owns the serial transport exclusively and enforces the
//! protocol's half-duplex shape: write a `\n`-terminated command line, then
//! read bytes into a [`ResponseFramer`](crate::framing::ResponseFramer)
//! until a marker closes the response. Nothing else touches the port while
//! a command is in flight.
//!
//! Two timeouts govern the read side. Each single-byte read waits at most
//! [`BYTE_TIMEOUT`]; an empty window just loops, because the controller
//! goes quiet while a motion command executes. The whole exchange is bounded
//! by the session's command deadline (default
//! [`DEFAULT_COMMAND_DEADLINE`]), after which the read fails with the
//! recoverable [`StepError::Timeout`].
//!
//! A session without a transport is *simulated*: writes are discarded and
//! reads return [`Response::empty`] immediately. Closing a live session
//! puts it in the same state.

use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{StepError, StepResult};
use crate::framing::{Response, ResponseFramer, ResponseMarkers};
use crate::serial::DynSerial;

/// Longest wait for a single response byte before checking the deadline.
pub const BYTE_TIMEOUT: Duration = Duration::from_millis(100);

/// Default bound on one full command/response exchange.
///
/// Generous because the console does not answer a motion command until the
/// move finishes, and a full table rotation at low velocity takes tens of
/// seconds.
pub const DEFAULT_COMMAND_DEADLINE: Duration = Duration::from_secs(60);

/// Exclusive channel to one controller console.
pub struct Session {
    port: Option<DynSerial>,
    markers: ResponseMarkers,
    command_deadline: Duration,
}

impl Session {
    /// Wrap an open transport in a session.
    pub fn connected(port: DynSerial, markers: ResponseMarkers) -> Self {
        Self {
            port: Some(port),
            markers,
            command_deadline: DEFAULT_COMMAND_DEADLINE,
        }
    }

    /// Create a session with no transport attached.
    ///
    /// Every send is a no-op and every read yields an empty response, so
    /// callers can exercise full command sequences with no hardware on the
    /// bench.
    pub fn simulated(markers: ResponseMarkers) -> Self {
        Self {
            port: None,
            markers,
            command_deadline: DEFAULT_COMMAND_DEADLINE,
        }
    }

    /// Replace the overall per-command deadline.
    pub fn with_command_deadline(mut self, deadline: Duration) -> Self {
        self.command_deadline = deadline;
        self
    }

    /// True while a transport is attached.
    pub fn is_live(&self) -> bool {
        self.port.is_some()
    }

    /// Write raw bytes to the console and flush them.
    ///
    /// Discarded silently when the session is simulated or already closed.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> StepResult<()> {
        let Some(port) = self.port.as_mut() else {
            trace!("dry-run: {} bytes not sent", bytes.len());
            return Ok(());
        };
        port.write_all(bytes).await?;
        port.flush().await?;
        Ok(())
    }

    /// Read one complete framed response.
    ///
    /// Bytes are pulled one at a time and fed to a fresh framer until a
    /// marker closes the response. Quiet byte windows keep waiting; the
    /// session's command deadline is the only thing that gives up.
    ///
    /// # Errors
    ///
    /// - [`StepError::Timeout`] when the deadline elapses first
    /// - [`StepError::Disconnected`] on end-of-file
    /// - [`StepError::Transport`] on a read error
    pub async fn read_response(&mut self) -> StepResult<Response> {
        let Some(port) = self.port.as_mut() else {
            return Ok(Response::empty());
        };

        let mut framer = ResponseFramer::new(self.markers);
        let deadline = tokio::time::Instant::now() + self.command_deadline;
        let mut byte = [0u8; 1];

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(StepError::Timeout {
                    waited: self.command_deadline,
                });
            }
            match tokio::time::timeout(remaining.min(BYTE_TIMEOUT), port.read(&mut byte)).await {
                Ok(Ok(0)) => return Err(StepError::Disconnected),
                Ok(Ok(_)) => {
                    if framer.push(byte[0]).is_done() {
                        break;
                    }
                }
                Ok(Err(e)) => return Err(e.into()),
                // Byte window expired with the console still working;
                // keep waiting out the deadline.
                Err(_) => {}
            }
        }

        Ok(framer.finish())
    }

    /// Send one command line and frame its response.
    ///
    /// The command is trimmed and `\n`-terminated before transmission. An
    /// empty command sends a bare newline, which forces the console to emit
    /// a fresh prompt.
    pub async fn transact(&mut self, command: &str) -> StepResult<Response> {
        let trimmed = command.trim();
        debug!("send: {:?}", trimmed);
        self.send_raw(format!("{}\n", trimmed).as_bytes()).await?;
        let response = self.read_response().await?;
        debug!("recv: {:?} ({:?})", response.trimmed(), response.terminator);
        Ok(response)
    }

    /// Release the transport.
    ///
    /// Idempotent and safe on a session that was never live. After closing,
    /// the session behaves like a simulated one: writes are discarded and
    /// reads return empty responses.
    pub async fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.shutdown().await {
                debug!("shutdown on close failed: {}", e);
            }
            debug!("serial port closed");
        }
    }
}

// The boxed transport has no Debug of its own; report liveness instead.
impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("live", &self.is_live())
            .field("markers", &self.markers)
            .field("command_deadline", &self.command_deadline)
            .finish_non_exhaustive()
    }
}
