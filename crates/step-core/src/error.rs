//! Error types for the stepper controller protocol engine.
//!
//! This module defines [`StepError`], the single error type shared by
//! discovery, the session channel, and response framing. Using the
//! `thiserror` crate keeps the taxonomy small and explicit:
//!
//! - **`NoDeviceFound`**: discovery exhausted every candidate port (or the
//!   explicitly selected port) without a controller answering the probe.
//! - **`Transport`**: the serial link itself failed. Wraps `std::io::Error`,
//!   so the `?` operator converts I/O failures automatically.
//! - **`Timeout`**: a command's response never completed inside the overall
//!   deadline. Kept separate from `Transport` because the link is still
//!   healthy; the caller may retry.
//! - **`Disconnected`**: the transport reported end-of-file mid-response,
//!   which on a serial line means the adapter was unplugged or powered off.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the protocol error type.
pub type StepResult<T> = std::result::Result<T, StepError>;

/// Error type for controller discovery and serial exchanges.
#[derive(Error, Debug)]
pub enum StepError {
    /// No controller answered the discovery probe.
    ///
    /// Raised when the port scan runs out of candidates, or when an
    /// explicitly named port opens but does not return the controller's
    /// undefined-command signature.
    ///
    /// **Error Type**: Permanent for this run.
    ///
    /// **Recovery Strategy**: Check cabling and power, confirm the adapter
    /// enumerates on the host, or name the port explicitly instead of
    /// relying on the scan.
    #[error("no stepper controller found on any candidate serial port")]
    NoDeviceFound,

    /// Serial I/O failed.
    ///
    /// Covers open failures, write failures, and read errors on the link.
    /// Commands are not retried after a transport error; the session should
    /// be closed and reopened.
    ///
    /// **Error Type**: Usually permanent (bad device node, permissions,
    /// hardware fault).
    ///
    /// **Recovery Strategy**: Abort the current operation and rediscover
    /// the device.
    #[error("serial transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The overall response deadline elapsed.
    ///
    /// The controller accepted the command bytes but no recognized
    /// terminator arrived in time. Long moves at low velocity legitimately
    /// take tens of seconds, so the deadline is configurable per session.
    ///
    /// **Error Type**: Transient.
    ///
    /// **Recovery Strategy**: The link is still up; the caller may extend
    /// the deadline or reissue the command once the axis is idle.
    #[error("no complete response within {waited:?}")]
    Timeout {
        /// How long the session waited before giving up.
        waited: Duration,
    },

    /// The serial port reached end-of-file mid-response.
    ///
    /// A zero-length read on a serial line means the device side vanished,
    /// typically an unplugged USB adapter.
    ///
    /// **Error Type**: Permanent.
    ///
    /// **Recovery Strategy**: Close the session and rediscover once the
    /// hardware is reconnected.
    #[error("serial port disconnected (unexpected EOF)")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StepError::Timeout {
            waited: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "no complete response within 60s");
    }

    #[test]
    fn test_transport_wraps_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = StepError::from(io);
        assert!(matches!(err, StepError::Transport(_)));
        assert!(err.to_string().contains("denied"));
    }
}
