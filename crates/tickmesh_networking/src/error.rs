//! # Session Error Types
//!
//! All errors that can occur in the session and wire protocol.
//!
//! Timeouts are deliberately absent: a silent peer is folded into the
//! resync flags and slot table, never surfaced as an error.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors that abort a protocol call.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Socket creation, bind or non-blocking setup failed.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Master host name did not resolve.
    #[error("unknown host: {host}")]
    UnknownHost {
        /// The host as configured or redirected.
        host: String,
    },

    /// A datagram could not be sent.
    #[error("send to {addr} failed: {source}")]
    Send {
        /// Destination address.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: io::Error,
    },

    /// Receiving failed with something other than "would block".
    #[error("receive failed: {0}")]
    Receive(#[source] io::Error),

    /// Caller handed over a payload larger than the direction allows.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Offered length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },

    /// The session already left; only `leave` may be called again.
    #[error("session already terminated")]
    Terminated,

    /// Invalid configuration value or file.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An outbound message could not be encoded.
    #[error("encode failed: {0}")]
    Protocol(ProtocolError),
}

impl SessionError {
    /// Returns true for socket and resolution failures.
    ///
    /// The session cannot continue after one of these; the caller must
    /// tear it down.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. } | Self::UnknownHost { .. } | Self::Send { .. } | Self::Receive(_)
        )
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors while encoding or decoding a datagram.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Datagram ended before the message was complete.
    #[error("datagram truncated")]
    Truncated,

    /// Header magic or version did not match.
    #[error("foreign datagram: magic {magic:#06x}, version {version}")]
    BadHeader {
        /// Magic found on the wire.
        magic: u16,
        /// Version found on the wire.
        version: u8,
    },

    /// Unknown message tag.
    #[error("unknown message tag: {0}")]
    UnknownTag(u8),

    /// Unknown enum discriminant inside a message body.
    #[error("unknown {field} value: {value}")]
    UnknownValue {
        /// Field being decoded.
        field: &'static str,
        /// Raw value.
        value: u8,
    },

    /// Peer index outside the slot table.
    #[error("peer index out of range: {0}")]
    InvalidIndex(u8),

    /// Address family byte was not 0, 4 or 6.
    #[error("invalid address family: {0}")]
    InvalidAddress(u8),

    /// Text field was not UTF-8.
    #[error("text field is not valid UTF-8")]
    InvalidText,

    /// Encoder ran out of buffer space.
    #[error("message does not fit into {0} bytes")]
    Overflow(usize),

    /// Payload larger than the direction allows.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Offered length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::PayloadTooLarge { len, max } => Self::PayloadTooLarge { len, max },
            other => Self::Protocol(other),
        }
    }
}
