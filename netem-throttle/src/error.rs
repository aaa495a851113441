//! Error types for the throttling engine.
//!
//! Construction problems are reported through [`ConfigError`]. Failures that happen while a
//! stream is in use travel through the ordinary `std::io` contract: they are wrapped with
//! `io::Error::other(...)` around one of the marker types below, so callers can tell them apart
//! with `err.get_ref().and_then(|e| e.downcast_ref::<InterruptedError>())`.
use std::{error::Error, fmt, io};

use thiserror::Error as ThisError;

/// Rejected queue or throttler parameters.
#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("initial queue capacity must be at least 1 (got {0})")]
    InvalidCapacity(usize),
    #[error("queue growth factor must be a finite number greater than 1.0 (got {0})")]
    InvalidGrowth(f64),
    #[error("failed to spawn pump thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Marker error for a blocking read or deadline sleep cut short by an interrupt.
///
/// Surfaced as `io::Error::other(INTERRUPTED_ERROR)`. The kind is deliberately not
/// `io::ErrorKind::Interrupted`: `std` helpers such as `read_exact` retry that kind, which
/// would swallow the interrupt.
#[derive(Debug, Copy, Clone)]
pub struct InterruptedError;

/// Singleton instance used in `io::Error::other(INTERRUPTED_ERROR)`.
pub const INTERRUPTED_ERROR: InterruptedError = InterruptedError;

impl fmt::Display for InterruptedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blocking read on throttled stream was interrupted")
    }
}

impl Error for InterruptedError {}

impl From<InterruptedError> for io::Error {
    fn from(err: InterruptedError) -> Self {
        io::Error::other(err)
    }
}

/// Marker error for a reader whose record framing was lost.
///
/// An interrupt that lands while a deadline is only partly dequeued leaves the queue
/// positioned mid-record. The remaining bytes cannot be pushed back, so the reader is blown:
/// this read and all later reads fail with `io::Error::other(CORRUPTED_ERROR)`.
#[derive(Debug, Copy, Clone)]
pub struct CorruptedError;

/// Singleton instance used in `io::Error::other(CORRUPTED_ERROR)`.
pub const CORRUPTED_ERROR: CorruptedError = CorruptedError;

impl fmt::Display for CorruptedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "throttled stream lost record framing after an interrupted read"
        )
    }
}

impl Error for CorruptedError {}

/// Returns `true` if `err` carries the [`InterruptedError`] marker.
pub fn is_interrupted(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|e| e.downcast_ref::<InterruptedError>().is_some())
}

/// Returns `true` if `err` carries the [`CorruptedError`] marker.
pub fn is_corrupted(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|e| e.downcast_ref::<CorruptedError>().is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_are_detectable_through_io_error() {
        let err: io::Error = INTERRUPTED_ERROR.into();
        assert!(is_interrupted(&err));
        assert!(!is_corrupted(&err));
        assert_eq!(err.kind(), io::ErrorKind::Other);

        let err = io::Error::other(CORRUPTED_ERROR);
        assert!(is_corrupted(&err));
        assert!(!is_interrupted(&err));
    }

    #[test]
    fn plain_io_errors_carry_no_marker() {
        let err = io::Error::new(io::ErrorKind::Interrupted, "eintr");
        assert!(!is_interrupted(&err));
        assert!(!is_corrupted(&err));
    }

    #[test]
    fn config_error_messages_name_the_value() {
        assert_eq!(
            ConfigError::InvalidCapacity(0).to_string(),
            "initial queue capacity must be at least 1 (got 0)"
        );
        assert!(ConfigError::InvalidGrowth(1.0).to_string().contains("1"));
    }
}
