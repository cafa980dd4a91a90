//! Error types for butterfly-transfer
//!
//! I/O failures are carried through untouched so callers can match on the
//! original `std::io::ErrorKind`. Cancellation is reported with the cause
//! recorded by the [`Context`](crate::Context) that was canceled.

use thiserror::Error;

/// Why a [`Context`](crate::Context) stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum CancelCause {
    /// Canceled explicitly by its owner or by a canceled parent
    #[error("context canceled")]
    Canceled,

    /// The context's deadline passed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Main error type for butterfly-transfer operations
#[derive(Debug, Error)]
pub enum Error {
    /// The bound context was canceled or timed out
    #[error(transparent)]
    Canceled(#[from] CancelCause),

    /// Source or destination I/O failure, unmodified
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Invalid configuration or parameters
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns the cancel cause if this error is a cancellation.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        match self {
            Error::Canceled(cause) => Some(*cause),
            _ => None,
        }
    }

    /// Returns `true` if the transfer stopped because its context was canceled.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Error::Canceled(_))
    }

    /// Returns the underlying I/O error, if any.
    pub fn as_io(&self) -> Option<&std::io::Error> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

/// A failed copy together with the number of bytes that made it to the
/// destination before it stopped.
#[derive(Debug, Error)]
#[error("transfer stopped after {written} bytes")]
pub struct TransferError {
    written: u64,
    #[source]
    source: Error,
}

impl TransferError {
    pub(crate) fn new(written: u64, source: Error) -> Self {
        Self { written, source }
    }

    /// Bytes written to the destination before the failure.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// The error that stopped the copy.
    pub fn error(&self) -> &Error {
        &self.source
    }

    /// Consumes the wrapper and returns the error that stopped the copy.
    pub fn into_error(self) -> Error {
        self.source
    }

    /// Shorthand for `self.error().cancel_cause()`.
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        self.source.cancel_cause()
    }
}

/// Convenience result type for butterfly-transfer operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_cancel_cause_messages() {
        assert_eq!(CancelCause::Canceled.to_string(), "context canceled");
        assert_eq!(
            CancelCause::DeadlineExceeded.to_string(),
            "context deadline exceeded"
        );
    }

    #[test]
    fn test_io_error_passes_through_unmodified() {
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed"));

        // Display is the inner error's, not a decorated copy
        assert_eq!(err.to_string(), "pipe closed");
        let io_err = err.as_io().expect("expected an I/O error");
        assert_eq!(io_err.kind(), io::ErrorKind::BrokenPipe);
        assert!(err.cancel_cause().is_none());
    }

    #[test]
    fn test_transfer_error_keeps_count_and_source() {
        let err = TransferError::new(42, Error::Canceled(CancelCause::DeadlineExceeded));

        assert_eq!(err.written(), 42);
        assert_eq!(err.cancel_cause(), Some(CancelCause::DeadlineExceeded));
        assert_eq!(err.to_string(), "transfer stopped after 42 bytes");

        let source = std::error::Error::source(&err).expect("source should be set");
        assert_eq!(source.to_string(), "context deadline exceeded");
        assert!(err.into_error().is_canceled());
    }
}
