//! Fault containment at task boundaries.
//!
//! A background task that exists only to observe a failure (the
//! disconnection probe) should not hand that failure to the runtime as an
//! error. [`ErrorBoundary`] runs a fallible future and turns the errors it
//! is declared to contain into an ordinary [`Contained::Fault`] value.
//! Errors outside the declared set still come back as `Err`, so the caller
//! can propagate them with `?`.

use std::fmt;
use std::future::Future;
use std::io;

/// I/O error kinds that mean "the peer went away".
pub const TRANSPORT_FAULTS: &[io::ErrorKind] = &[
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::BrokenPipe,
    io::ErrorKind::NotConnected,
    io::ErrorKind::UnexpectedEof,
    io::ErrorKind::TimedOut,
];

/// Returns `true` for errors listed in [`TRANSPORT_FAULTS`].
#[must_use]
pub fn is_transport_fault(error: &io::Error) -> bool {
    TRANSPORT_FAULTS.contains(&error.kind())
}

/// Outcome of a call run through an [`ErrorBoundary`].
#[derive(Debug, PartialEq, Eq)]
pub enum Contained<T, E> {
    /// The call succeeded.
    Completed(T),
    /// The call failed with an error the boundary contains.
    Fault(E),
}

impl<T, E> Contained<T, E> {
    /// Returns `true` for [`Contained::Fault`].
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

/// Converts a declared set of errors into return values.
pub struct ErrorBoundary<E> {
    label: &'static str,
    contains: fn(&E) -> bool,
}

impl<E> ErrorBoundary<E> {
    /// Creates a boundary named `label` that contains every error for which
    /// `contains` returns `true`.
    #[must_use]
    pub const fn new(label: &'static str, contains: fn(&E) -> bool) -> Self {
        Self { label, contains }
    }

    /// Name of the wrapped call, used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Returns `true` if this boundary would contain `error`.
    #[must_use]
    pub fn contains(&self, error: &E) -> bool {
        (self.contains)(error)
    }

    /// Awaits `call` inside the boundary.
    ///
    /// # Errors
    ///
    /// Returns the call's error unchanged when the boundary does not
    /// contain it.
    pub async fn run<T, F>(&self, call: F) -> Result<Contained<T, E>, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        match call.await {
            Ok(value) => Ok(Contained::Completed(value)),
            Err(error) if self.contains(&error) => Ok(Contained::Fault(error)),
            Err(error) => Err(error),
        }
    }
}

impl<E> fmt::Display for ErrorBoundary<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}

impl<E> fmt::Debug for ErrorBoundary<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorBoundary").field(&self.label).finish()
    }
}
