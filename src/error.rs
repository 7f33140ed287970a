//! Error types for watcher and buffer setup.
//!
//! Setup failures are the only synchronous errors in the crate: a watcher that
//! cannot be armed or a task installed on a released buffer. Everything else
//! propagates as `ERROR` revents through the handler chain, with
//! `last_error()` carrying the numeric code.

use std::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A watcher could not be armed: invalid fd or signal, reactor refusal,
    /// or an operation on a released dispatcher/buffer.
    CannotSetupWatching,
    /// The reactor itself could not be created.
    ReactorCreate,
}

/// The main error type for setup operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Shorthand for a [`ErrorKind::CannotSetupWatching`] error with context.
    #[must_use]
    pub fn cannot_setup(ctx: impl Into<String>) -> Self {
        Self::new(ErrorKind::CannotSetupWatching).with_context(ctx)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::CannotSetupWatching => write!(f, "cannot set up event watching")?,
            ErrorKind::ReactorCreate => write!(f, "cannot create reactor")?,
        }
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Result alias for setup operations.
pub type Result<T> = std::result::Result<T, Error>;
