//! Error types for the NAC client.

use std::fmt;

/// Errors raised by the NAC client's synchronous entry points. Asynchronous
/// outcomes (connect failure, send failure, request timeout, protocol
/// abnormalities) are reported through callbacks rather than this type — see
/// [`crate::session::ResponseCallback`] and [`crate::access::AccessCtrl`]'s
/// `set_version_mismatch_callback`/`set_length_abnormal_callback`.
#[derive(Debug)]
pub enum NacError {
    /// A config field failed validation (e.g. empty address, zero port).
    InvalidConfig(String),
    /// The payload handed to [`crate::protocol::ProtocolAdapter::create_packet`]
    /// is too large to frame (`>= MAX_BODY_SIZE`).
    PayloadTooLarge {
        /// The configured limit, in bytes.
        limit: usize,
        /// The payload's actual length, in bytes.
        actual: usize,
    },
}

impl fmt::Display for NacError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid NAC config: {msg}"),
            Self::PayloadTooLarge { limit, actual } => {
                write!(f, "payload of {actual} bytes meets or exceeds the {limit} byte limit")
            }
        }
    }
}

impl std::error::Error for NacError {}

/// A specialized `Result` type for NAC operations.
pub type Result<T> = std::result::Result<T, NacError>;
