//! Error types that cross module boundaries.
//!
//! Parse failures never leave the codec: they become the `Unknown` commands.

use std::io;

use thiserror::Error;

use crate::common::{AgentId, Location};

/// A fault on one agent's connection. The connection is closed when one of these is returned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransportFault {
    /// The connection was already closed.
    #[error("connection is closed")]
    Disconnected,
    /// The peer closed its end.
    #[error("connection closed by peer")]
    ClosedByPeer,
    /// The write did not finish within the send bound.
    #[error("send did not complete in time")]
    SendTimeout,
    /// The stream ended in the middle of a frame.
    #[error("truncated frame")]
    Truncated,
    /// Length field of 0 or above the frame limit.
    #[error("invalid frame length {0}")]
    BadLength(u32),
    /// The declared length did not end on a NUL byte.
    #[error("frame is not NUL terminated")]
    MissingTerminator,
    /// A NUL byte came before the end of the declared length.
    #[error("NUL byte at {0} before the end of the frame")]
    EarlyTerminator(usize),
    /// The payload contained non-ASCII bytes.
    #[error("frame payload is not ASCII")]
    NotAscii,
    /// Any other socket error.
    #[error("I/O error ({kind:?}): {message}")]
    Io {
        /// Kind of the underlying error.
        kind: io::ErrorKind,
        /// Its message.
        message: String,
    },
}

impl From<io::Error> for TransportFault {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => TransportFault::Truncated,
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => TransportFault::SendTimeout,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => TransportFault::ClosedByPeer,
            kind => TransportFault::Io {
                kind,
                message: e.to_string(),
            },
        }
    }
}

/// A transport fault attributed to a registered agent. The agent must be removed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("agent {agent} crashed: {fault}")]
pub struct AgentCrashed {
    /// Who crashed.
    pub agent: AgentId,
    /// Why.
    pub fault: TransportFault,
}

/// Invalid startup input: configuration or world description.
#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// World side outside `[3, 30]`.
    #[error("world size {width}x{height} is outside [{min}, {max}]")]
    WorldSize {
        width: i32,
        height: i32,
        min: i32,
        max: i32,
    },
    /// A description entry points outside the map.
    #[error("{what} at {location} is outside the map")]
    OffMap {
        /// Which part of the description.
        what: &'static str,
        location: Location,
    },
    /// A layer tag is known but its arguments are incomplete.
    #[error("layer '{tag}' at {location} needs {expected} arguments, got {got}")]
    MissingArguments {
        tag: String,
        location: Location,
        expected: usize,
        got: usize,
    },
    /// A named option has a value outside its domain.
    #[error("invalid value '{value}' for {option}")]
    InvalidOption {
        option: &'static str,
        value: String,
    },
    /// Malformed JSON input.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}
