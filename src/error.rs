//! Error taxonomy and flow-control results.
//!
//! Two distinct kinds of outcome exist in the element:
//!
//! - [`TransceiverError`]: a real fault (bad configuration, failed caps
//!   negotiation, transport trouble). Surfaced at lifecycle boundaries or
//!   on the sink event path.
//! - [`FlowError`]: the non-OK outcome of a downstream buffer push. These are
//!   flow-control signals, not faults; the pacer inspects them to decide
//!   whether to keep pacing or wind down.

use std::fmt;

use thiserror::Error;

/// Errors that can occur while configuring or operating the transceiver.
#[derive(Debug, Error)]
pub enum TransceiverError {
    /// Missing or invalid configuration, fatal at startup.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Caps negotiation failed, fatal for the current stream.
    #[error("Caps negotiation failed: {0}")]
    Caps(String),

    /// Transport-level trouble (handshake, I/O, unexpected close).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed or unknown control traffic.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A lifecycle transition was requested that the element cannot perform.
    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),
}

/// Result type for transceiver operations.
pub type TransceiverResult<T> = Result<T, TransceiverError>;

/// Non-OK outcome of a downstream push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    /// Downstream is flushing; the buffer was not consumed.
    Flushing,
    /// Downstream reached end-of-stream and accepts no more data.
    Eos,
    /// No consumer is linked to the source port.
    NotLinked,
    /// Unspecified downstream failure.
    Error,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowError::Flushing => write!(f, "flushing"),
            FlowError::Eos => write!(f, "eos"),
            FlowError::NotLinked => write!(f, "not-linked"),
            FlowError::Error => write!(f, "error"),
        }
    }
}

/// Result of pushing a buffer downstream.
pub type FlowResult = Result<(), FlowError>;
