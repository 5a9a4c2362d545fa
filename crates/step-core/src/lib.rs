//! `step-core`
//!
//! Serial protocol engine for stepper drive consoles.
//!
//! This crate holds the transport-level building blocks shared by every
//! drive family: the byte-level response framer, the command/response
//! session, and probe-based device discovery. Driver crates layer motion
//! semantics on top; nothing in here knows what a move is.
//!
//! ## Layers
//!
//! - [`framing`]: pure state machine that decides where a console reply ends
//! - [`session`]: one command out, one framed response back, over any
//!   `AsyncRead + AsyncWrite` transport (or none at all, for dry runs)
//! - [`discovery`]: enumerate candidate serial ports and probe for the
//!   controller that answers correctly
//!
//! ## Key Types
//!
//! - [`Session`]: exclusive channel to one console
//! - [`ResponseFramer`] / [`FrameState`]: the terminator-suffix state machine
//! - [`DeviceSelector`]: physical port, auto-detect scan, or simulated
//! - [`StepError`]: error taxonomy with per-variant recovery notes

pub mod discovery;
pub mod error;
pub mod framing;
pub mod serial;
pub mod session;

pub use discovery::{
    candidate_ports, discover, probe, ControllerProfile, DeviceSelector, ProbeOutcome,
};
pub use error::{StepError, StepResult};
pub use framing::{FrameState, Response, ResponseFramer, ResponseMarkers, Terminator};
pub use serial::{open_serial, DynSerial, SerialPortIO};
pub use session::Session;
