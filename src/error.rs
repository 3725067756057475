//! Error types for the promise runtime.
//!
//! Errors travel inside result cells alongside (or instead of) values, so
//! the type is cheap to clone and carries everything a consumer needs to
//! decide how to react:
//!
//! - a [`ErrorKind`] discriminant, used by recovery helpers such as
//!   [`retry_on_disconnect`](crate::retry_on_disconnect)
//! - a human-readable message
//! - the source location where the error was constructed, captured
//!   automatically via `#[track_caller]`

use core::fmt;
use core::panic::Location;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Something went wrong. The catch-all kind.
    Failed,
    /// The operation was rejected because a resource is over capacity.
    /// Retrying later may succeed.
    Overloaded,
    /// A peer, channel, or event loop is gone. Retrying against a fresh
    /// connection may succeed; this kind drives
    /// [`retry_on_disconnect`](crate::retry_on_disconnect).
    Disconnected,
    /// The requested operation is not implemented.
    Unimplemented,
    /// The operation was abandoned before producing a result, e.g. a
    /// fulfiller was dropped without resolving its promise.
    Cancelled,
}

impl ErrorKind {
    /// Returns a lowercase human-readable name for the kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Overloaded => "overloaded",
            Self::Disconnected => "disconnected",
            Self::Unimplemented => "unimplemented",
            Self::Cancelled => "cancelled",
        }
    }
}

/// The error type carried by promises.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: String,
    origin: Option<&'static Location<'static>>,
}

impl Error {
    /// Creates a new error with the given kind and message.
    #[must_use]
    #[track_caller]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            origin: Some(Location::caller()),
        }
    }

    /// Creates a `Failed`-kind error.
    #[must_use]
    #[track_caller]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Failed, message)
    }

    /// Creates an `Overloaded`-kind error.
    #[must_use]
    #[track_caller]
    pub fn overloaded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overloaded, message)
    }

    /// Creates a `Disconnected`-kind error.
    #[must_use]
    #[track_caller]
    pub fn disconnected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Disconnected, message)
    }

    /// Creates an `Unimplemented`-kind error.
    #[must_use]
    #[track_caller]
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, message)
    }

    /// Creates a `Cancelled`-kind error.
    #[must_use]
    #[track_caller]
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Converts a caught panic payload into a `Failed`-kind error.
    #[must_use]
    #[track_caller]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "panic with non-string payload".to_string()
        };
        Self::failed(format!("panic: {message}"))
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the source location where the error was constructed, if
    /// captured.
    #[must_use]
    pub const fn origin(&self) -> Option<&'static Location<'static>> {
        self.origin
    }

    /// Returns true if this is a `Disconnected`-kind error.
    #[must_use]
    pub const fn is_disconnected(&self) -> bool {
        matches!(self.kind, ErrorKind::Disconnected)
    }

    /// Returns true if this is a `Cancelled`-kind error.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Prefixes the message with additional context.
    #[must_use]
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let context = context.into();
        self.message = format!("{context}: {}", self.message);
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.name(), self.message)?;
        if let Some(origin) = self.origin {
            write!(f, " (at {}:{})", origin.file(), origin.line())?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// A specialized `Result` type for promise operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Runs `f`, converting a panic into an `Err` with a `Failed`-kind error.
///
/// Continuations and adapters run application code from inside the loop;
/// a panic there must land in the error leg of the result cell rather
/// than unwind through the scheduler.
pub(crate) fn run_catching<R>(f: impl FnOnce() -> Result<R>) -> Result<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Error::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::new(ErrorKind::Failed, "boom");
        let text = err.to_string();
        assert!(text.starts_with("failed: boom"), "{text}");
    }

    #[test]
    fn origin_is_captured() {
        let err = Error::failed("x");
        let origin = err.origin().expect("origin missing");
        assert!(origin.file().ends_with("error.rs"));
    }

    #[test]
    fn predicates_match_kind() {
        assert!(Error::disconnected("gone").is_disconnected());
        assert!(!Error::disconnected("gone").is_cancelled());
        assert!(Error::cancelled("dropped").is_cancelled());
    }

    #[test]
    fn with_context_prefixes_message() {
        let err = Error::failed("inner").with_context("outer");
        assert_eq!(err.message(), "outer: inner");
    }

    #[test]
    fn panics_become_failed_errors() {
        let err = run_catching::<()>(|| panic!("kaboom")).expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::Failed);
        assert!(err.message().contains("kaboom"));
    }

    #[test]
    fn run_catching_passes_results_through() {
        assert_eq!(run_catching(|| Ok(7)).expect("ok"), 7);
        let err = run_catching::<()>(|| Err(Error::overloaded("busy"))).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Overloaded);
    }
}
