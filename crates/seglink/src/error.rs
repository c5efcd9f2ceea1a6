//! Error types for SRv6 control-plane operations.

use std::io;

/// Result type for seglink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur across the SID lifecycle, the broker protocol
/// and the FPM encoder.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration constraint violation (bit-length inconsistency,
    /// duplicate address, unknown locator). No state changes.
    #[error("configuration error: {0}")]
    Config(String),

    /// A referenced VRF or interface is not live yet. Non-fatal: the
    /// SID stays valid-but-not-sent and is retried on the matching
    /// resource event.
    #[error("resource not available: {kind} {name}")]
    ResourceMissing {
        /// Resource kind ("vrf" or "interface").
        kind: &'static str,
        /// Resource name.
        name: String,
    },

    /// Broker socket write failed or the broker refused the request.
    #[error("broker send failed: {0}")]
    BrokerSend(#[from] io::Error),

    /// The broker closed the connection.
    #[error("broker connection closed")]
    BrokerClosed,

    /// An FPM message would exceed the caller-owned buffer. The caller
    /// is expected to drop the message or resize the buffer.
    #[error("FPM message of {needed} bytes exceeds buffer of {capacity}")]
    EncodeOverflow {
        /// Bytes the message needs.
        needed: usize,
        /// Capacity of the caller buffer.
        capacity: usize,
    },

    /// Malformed inbound broker frame.
    #[error("decode error: {0}")]
    Decode(String),

    /// An internal invariant was broken. Daemons treat this as fatal.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Shorthand for a missing-VRF error.
    pub fn vrf_missing(name: impl Into<String>) -> Self {
        Self::ResourceMissing {
            kind: "vrf",
            name: name.into(),
        }
    }

    /// Shorthand for a missing-interface error.
    pub fn interface_missing(name: impl Into<String>) -> Self {
        Self::ResourceMissing {
            kind: "interface",
            name: name.into(),
        }
    }

    /// Check if this error is absorbed by the installation controller
    /// (retried on the next relevant resource event).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ResourceMissing { .. } | Self::BrokerSend(_) | Self::BrokerClosed
        )
    }

    /// Check if this is an overflow the FPM pipeline should handle by
    /// dropping or resizing.
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::EncodeOverflow { .. })
    }

    /// Check if this error must abort the process.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}
