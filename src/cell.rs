//! The result cell: a typed container for a value, an error, or both.
//!
//! Every node delivers its result by writing into a caller-provided
//! `ResultCell<T>`. Four states exist:
//!
//! - **value**: the computation succeeded
//! - **error**: the computation failed
//! - **both**: a value was produced and a recoverable error was recorded
//!   afterwards; consumers see the error first but may continue
//! - **neither**: transient while a result is being assembled; observing
//!   it after a node signalled readiness is a runtime bug
//!
//! The unit case needs no special handling: `ResultCell<()>` stores the
//! present/absent bit through `Option<()>`.

use crate::error::{Error, Result};

/// A container holding a value of type `T`, an error, both, or neither.
#[derive(Debug)]
pub struct ResultCell<T> {
    value: Option<T>,
    error: Option<Error>,
}

impl<T> ResultCell<T> {
    /// Creates an empty cell (the "neither" state).
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            value: None,
            error: None,
        }
    }

    /// Creates a cell holding a value.
    #[must_use]
    pub fn from_value(value: T) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    /// Creates a cell holding an error.
    #[must_use]
    pub fn from_error(error: Error) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }

    /// Creates a cell from a `Result`.
    #[must_use]
    pub fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::from_value(value),
            Err(error) => Self::from_error(error),
        }
    }

    /// Stores a value, replacing any previous one.
    pub fn set_value(&mut self, value: T) {
        self.value = Some(value);
    }

    /// Records an error. The first recorded error wins; later ones are
    /// dropped.
    pub fn add_error(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Returns true if a value is present.
    #[must_use]
    pub const fn has_value(&self) -> bool {
        self.value.is_some()
    }

    /// Returns true if an error is present.
    #[must_use]
    pub const fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Returns true if the cell is in the "neither" state.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.value.is_none() && self.error.is_none()
    }

    /// Returns the stored error, if any.
    #[must_use]
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Returns a mutable reference to the stored value, if any.
    pub(crate) fn value_mut(&mut self) -> Option<&mut T> {
        self.value.as_mut()
    }

    /// Decomposes the cell into its value and error legs.
    pub(crate) fn split(self) -> (Option<T>, Option<Error>) {
        (self.value, self.error)
    }

    /// Converts the cell back into ordinary control flow.
    ///
    /// An error dominates even when a value is present: the recoverable
    /// follow-up error surfaces the same way a fatal one does here.
    ///
    /// # Panics
    ///
    /// Panics if the cell is empty. A node must never let the "neither"
    /// state escape once it has claimed readiness.
    pub fn into_result(self) -> Result<T> {
        match (self.value, self.error) {
            (_, Some(error)) => Err(error),
            (Some(value), None) => Ok(value),
            (None, None) => panic!("result cell held neither a value nor an error"),
        }
    }
}

impl<T: Clone> ResultCell<T> {
    /// Copies the cell for a fork branch. Values clone through `T`'s
    /// clone-by-reference primitive (e.g. `Arc::clone`); a pure-error
    /// cell stays a pure-error cell.
    #[must_use]
    pub(crate) fn clone_parts(&self) -> Self {
        Self {
            value: self.value.clone(),
            error: self.error.clone(),
        }
    }
}

impl<T> Default for ResultCell<T> {
    fn default() -> Self {
        Self::empty()
    }
}
