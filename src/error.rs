//! # Error Types
//!
//! Error handling for the session protocol core.
//!
//! This module defines all error variants that can occur while servicing a
//! connection, from transport failures to protocol violations raised by
//! packet handlers.
//!
//! ## Error Categories
//! - **I/O Errors**: transport and file system failures
//! - **Malformed Input**: codec-level parse failures on untrusted bytes.
//!   Always fatal; the buffer cannot be trusted, so the connection is torn
//!   down without a notice packet.
//! - **Protocol Violations**: wrong version, illegal state transition,
//!   mismatched keep-alive. Fatal; a textual disconnect notice is sent when
//!   the session state supports one.
//! - **Configuration Errors**: invalid or unreadable server configuration.
//!
//! All errors implement `std::error::Error` for interoperability. Handler
//! errors never cross a unit boundary; they are resolved inside the owning
//! session's run loop.

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common cases.
pub mod constants {
    /// Codec errors
    pub const ERR_BUFFER_UNDERRUN: &str = "read past end of packet buffer";
    pub const ERR_VARINT_TOO_LONG: &str = "varint exceeds maximum width";
    pub const ERR_STRING_TOO_LONG: &str = "string exceeds maximum length";
    pub const ERR_INVALID_UTF8: &str = "string is not valid UTF-8";
    pub const ERR_OVERSIZED_FRAME: &str = "frame exceeds maximum packet size";

    /// Protocol violation reasons (sent to the peer where possible)
    pub const REASON_WRONG_VERSION: &str = "wrong protocol version";
    pub const REASON_INVALID_NEXT_STATE: &str = "invalid next state";
    pub const REASON_KEEP_ALIVE_MISMATCH: &str = "keep alive ID mismatch";
    pub const REASON_TIMED_OUT: &str = "timed out";
    pub const REASON_UNKNOWN_WORLD: &str = "world does not exist";
}

/// ProtocolError is the primary error type for all session operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Codec-level parse failure on untrusted input. Fatal, no notice sent.
    #[error("malformed packet: {0}")]
    Malformed(&'static str),

    /// Protocol violation. Fatal; the reason is sent to the peer when the
    /// session state has a disconnect packet.
    #[error("protocol violation: {0}")]
    Disconnect(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ProtocolError {
    /// Shorthand for a protocol violation with a human-readable reason.
    pub fn disconnect(reason: impl Into<String>) -> Self {
        ProtocolError::Disconnect(reason.into())
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
