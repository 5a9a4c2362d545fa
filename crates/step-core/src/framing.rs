//! Response framing for the controller's console protocol.
//!
//! The controller never announces a response length. Instead each reply ends
//! with one of three four-byte marker sequences, and the reader has to watch
//! the accumulating tail to decide when a response is complete:
//!
//! - the prompt marker (normally `"\r\n> "`): command accepted, console
//!   ready for the next one;
//! - the undefined marker (normally `"\r\n? "`): the console did not
//!   recognize the command;
//! - the program-continuation marker (normally `"\r\n- "`): the console is
//!   inside a multi-line program definition and more output is coming.
//!
//! The continuation marker is the tricky one. While a program block is being
//! listed, intermediate lines can end in byte sequences that look terminal,
//! so the continuation check takes precedence on every byte: a tail that
//! ends with the program marker keeps the response open no matter what came
//! before it. [`ResponseFramer`] encodes exactly that rule as a small state
//! machine, fed one byte at a time by the session channel.

// =============================================================================
// Marker configuration
// =============================================================================

/// The marker suffixes that drive the framer.
///
/// Kept as data rather than hardcoded so the framer stays controller
/// agnostic; the driver crate for a given controller family supplies its
/// constants.
#[derive(Debug, Clone, Copy)]
pub struct ResponseMarkers {
    /// Suffix meaning the console is ready for a new command.
    pub prompt: &'static str,
    /// Suffix meaning the last command was not recognized.
    pub undefined: &'static str,
    /// Suffix meaning the console is mid program definition.
    pub program: &'static str,
}

// =============================================================================
// Framer states
// =============================================================================

/// Which marker closed a completed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// The readiness prompt.
    Prompt,
    /// The unrecognized-command prompt.
    Undefined,
}

/// Observable state of an in-progress response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Collecting bytes; no marker seen yet.
    Accumulating,
    /// A program-continuation marker was seen; the response stays open
    /// until a terminal marker arrives.
    InProgramBlock,
    /// The response is complete.
    Done(Terminator),
}

impl FrameState {
    /// True once a terminal marker has closed the response.
    pub fn is_done(&self) -> bool {
        matches!(self, FrameState::Done(_))
    }
}

// =============================================================================
// ResponseFramer
// =============================================================================

/// Byte-at-a-time framer for one console response.
///
/// Create one framer per command, feed it every received byte with
/// [`push`](Self::push), and stop reading once the returned state
/// [`is_done`](FrameState::is_done). [`finish`](Self::finish) then yields
/// the [`Response`] with its full text and closing terminator.
#[derive(Debug)]
pub struct ResponseFramer {
    markers: ResponseMarkers,
    buf: Vec<u8>,
    state: FrameState,
}

impl ResponseFramer {
    /// Start framing a new response with the given marker set.
    pub fn new(markers: ResponseMarkers) -> Self {
        Self {
            markers,
            buf: Vec::new(),
            state: FrameState::Accumulating,
        }
    }

    /// Current framer state.
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Append one received byte and return the resulting state.
    ///
    /// The tail of the buffer is checked against the three markers in
    /// precedence order: program continuation first, then the two terminal
    /// prompts. Bytes pushed after the response has completed are ignored.
    pub fn push(&mut self, byte: u8) -> FrameState {
        if self.state.is_done() {
            return self.state;
        }
        self.buf.push(byte);
        self.state = if self.buf.ends_with(self.markers.program.as_bytes()) {
            FrameState::InProgramBlock
        } else if self.buf.ends_with(self.markers.prompt.as_bytes()) {
            FrameState::Done(Terminator::Prompt)
        } else if self.buf.ends_with(self.markers.undefined.as_bytes()) {
            FrameState::Done(Terminator::Undefined)
        } else {
            match self.state {
                // An ordinary byte inside a program listing does not close
                // the block; only a terminal marker does.
                FrameState::InProgramBlock => FrameState::InProgramBlock,
                _ => FrameState::Accumulating,
            }
        };
        self.state
    }

    /// Append a run of bytes, stopping early if the response completes.
    pub fn feed(&mut self, bytes: &[u8]) -> FrameState {
        for &byte in bytes {
            if self.push(byte).is_done() {
                break;
            }
        }
        self.state
    }

    /// Consume the framer and return the accumulated response.
    ///
    /// The text keeps whatever terminator bytes were received; callers that
    /// want a printable form use [`Response::trimmed`].
    pub fn finish(self) -> Response {
        let terminator = match self.state {
            FrameState::Done(terminator) => Some(terminator),
            _ => None,
        };
        Response {
            text: String::from_utf8_lossy(&self.buf).into_owned(),
            terminator,
        }
    }
}

// =============================================================================
// Response
// =============================================================================

/// One framed console response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Raw response text, terminator included.
    pub text: String,
    /// Which marker closed the response; `None` only for simulated
    /// sessions, where no hardware ever answers.
    pub terminator: Option<Terminator>,
}

impl Response {
    /// The empty response produced by a simulated session.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            terminator: None,
        }
    }

    /// Response text with surrounding whitespace stripped, for logs and
    /// script output.
    pub fn trimmed(&self) -> &str {
        self.text.trim()
    }
}
