use std::error::Error;
use std::fmt;
use std::fmt::Display;

use crate::network::codec::CodecError;
use crate::Sequence;

/// This enum contains all error messages this library can return. Most API functions will generally return a [`Result<(), UplinkError>`].
///
/// [`Result<(), UplinkError>`]: std::result::Result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UplinkError {
    /// You made an invalid request, usually by using wrong parameters for function calls.
    InvalidRequest {
        /// Further specifies why the request was invalid.
        info: String,
    },
    /// The outgoing sequence counter ran past the largest value the transport can carry.
    /// The connection is unusable and has been torn down.
    SequenceExhausted {
        /// The sequence that could not be sent.
        sequence: Sequence,
    },
    /// The transport's reliable buffer overflowed. The connection has been torn down.
    ReliableOverflow,
    /// The operation requires a connection, but the session is disconnected.
    NotConnected,
    /// A received payload could not be decoded.
    Decode {
        /// What went wrong while decoding.
        context: String,
    },
    /// An internal error occurred that should not happen under normal operation.
    /// If you encounter this error, please report it as a bug.
    InternalError {
        /// A description of the internal error.
        context: String,
    },
}

impl UplinkError {
    /// Returns `true` if this error tears down the connection.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::SequenceExhausted { .. } | Self::ReliableOverflow)
    }
}

impl Display for UplinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRequest { info } => {
                write!(f, "Invalid Request: {}", info)
            },
            Self::SequenceExhausted { sequence } => {
                write!(f, "Outgoing sequence too big: {}", sequence)
            },
            Self::ReliableOverflow => write!(f, "Reliable message overflowed"),
            Self::NotConnected => write!(f, "The session is not connected."),
            Self::Decode { context } => write!(f, "Decode error: {}", context),
            Self::InternalError { context } => {
                write!(f, "An internal error occurred: {}", context)
            },
        }
    }
}

impl Error for UplinkError {}

impl From<CodecError> for UplinkError {
    fn from(err: CodecError) -> Self {
        Self::Decode {
            context: err.to_string(),
        }
    }
}

/// Structured reasons for [`UplinkError::InvalidRequest`].
///
/// Builders and config validation construct these and convert them with `.into()`,
/// so callers get a consistent message format.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum InvalidRequestKind {
    /// A numeric config value is outside its accepted range.
    ConfigValueOutOfRange {
        /// The config field name.
        field: &'static str,
        /// Smallest accepted value.
        min: u64,
        /// Largest accepted value.
        max: u64,
        /// The rejected value.
        actual: u64,
    },
    /// A floating-point config value is outside its accepted range or not finite.
    FloatConfigOutOfRange {
        /// The config field name.
        field: &'static str,
        /// Smallest accepted value.
        min: f32,
        /// Largest accepted value.
        max: f32,
        /// The rejected value.
        actual: f32,
    },
    /// A duration config value is outside its accepted range.
    DurationConfigOutOfRange {
        /// The config field name.
        field: &'static str,
        /// Smallest accepted value in milliseconds.
        min_ms: u64,
        /// Largest accepted value in milliseconds.
        max_ms: u64,
        /// The rejected value in milliseconds.
        actual_ms: u64,
    },
    /// History capacity must be a power of two large enough for the redundancy window.
    HistoryCapacityInvalid {
        /// The rejected capacity.
        capacity: usize,
        /// The smallest accepted capacity.
        min: usize,
    },
    /// An input event named an action the session does not track.
    UntrackedAction {
        /// Name of the action.
        action: &'static str,
    },
    /// The builder was given an empty set of tracked actions.
    NoTrackedActions,
}

impl Display for InvalidRequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConfigValueOutOfRange {
                field,
                min,
                max,
                actual,
            } => write!(
                f,
                "{} must be between {} and {}, got {}",
                field, min, max, actual
            ),
            Self::FloatConfigOutOfRange {
                field,
                min,
                max,
                actual,
            } => write!(
                f,
                "{} must be a finite value between {} and {}, got {}",
                field, min, max, actual
            ),
            Self::DurationConfigOutOfRange {
                field,
                min_ms,
                max_ms,
                actual_ms,
            } => write!(
                f,
                "{} must be between {}ms and {}ms, got {}ms",
                field, min_ms, max_ms, actual_ms
            ),
            Self::HistoryCapacityInvalid { capacity, min } => write!(
                f,
                "history capacity must be a power of two of at least {}, got {}",
                min, capacity
            ),
            Self::UntrackedAction { action } => {
                write!(f, "action {} is not tracked by this session", action)
            },
            Self::NoTrackedActions => write!(f, "at least one action must be tracked"),
        }
    }
}

impl From<InvalidRequestKind> for UplinkError {
    fn from(kind: InvalidRequestKind) -> Self {
        Self::InvalidRequest {
            info: kind.to_string(),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = UplinkError::SequenceExhausted {
            sequence: Sequence::new(0x8000_0000),
        };
        assert_eq!(err.to_string(), "Outgoing sequence too big: 2147483648");
        assert_eq!(
            UplinkError::ReliableOverflow.to_string(),
            "Reliable message overflowed"
        );
    }

    #[test]
    fn test_fatal_classification() {
        assert!(UplinkError::ReliableOverflow.is_fatal());
        assert!(UplinkError::SequenceExhausted {
            sequence: Sequence::new(1)
        }
        .is_fatal());
        assert!(!UplinkError::NotConnected.is_fatal());
        assert!(!UplinkError::InvalidRequest {
            info: String::new()
        }
        .is_fatal());
    }

    #[test]
    fn test_invalid_request_kind_converts() {
        let err: UplinkError = InvalidRequestKind::ConfigValueOutOfRange {
            field: "redundancy_window",
            min: 0,
            max: 3,
            actual: 7,
        }
        .into();
        match err {
            UplinkError::InvalidRequest { info } => {
                assert!(info.contains("redundancy_window"));
                assert!(info.contains('7'));
            },
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_codec_error_converts() {
        let err: UplinkError = CodecError::UnexpectedEnd { needed_bits: 8 }.into();
        assert!(matches!(err, UplinkError::Decode { .. }));
    }
}
