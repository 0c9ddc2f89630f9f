//! Error types for the protocol layer and the session manager.

/// Failures while building a [`Protocol`](crate::Protocol) or moving messages
/// through it.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// No inbound codec is registered for the opcode
    #[error("Unknown operation code: {0:#04x}")]
    UnknownOpcode(u8),

    /// A codec rejected the payload it was given
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// No outbound codec is registered for the message type
    #[error("Unknown message type: {0}")]
    UnknownMessageType(&'static str),

    #[error("Opcode {0:#04x} is already registered")]
    DuplicateOpcode(u8),

    #[error("Message type {0} is already registered")]
    DuplicateMessageType(&'static str),

    /// The payload does not fit the 16 bit length prefix
    #[error("Frame payload of {0} bytes exceeds the maximum of 65535")]
    FrameTooLarge(usize),
}

/// Enumeration of possible server errors.
///
/// Protocol failures are fatal to a single connection, everything else is
/// reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Network-related errors such as binding failures or closed connections
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors including handler panics
    #[error("Internal error: {0}")]
    Internal(String),
}
