//! Error types for operations.
//!
//! Failures around an operation fall into three groups:
//!
//! - **Domain failures**: the producer called `fail(error)`. These are the
//!   operation's `E` and are handled with `fail`/`catch` registrations.
//! - **Handler failures**: a chained handler returned `Err(e)`. These are
//!   absorbed by a registered `catch`; otherwise they are re-raised to the
//!   call that triggered the handler.
//! - **Cancellation**: not an error but a state transition. Awaiting
//!   consumers observe it as [`Rejection::Cancelled`].
//!
//! [`Unhandled`] is what "re-raised" means for the settling side: the
//! settler's `succeed`/`fail` hand it back to their caller, who is
//! responsible for it. [`ConfigError`] covers configuration loading.

use core::fmt;
use std::path::PathBuf;

use crate::types::CancelReason;

/// The error half of an awaited operation's output.
///
/// Cancellation is delivered on the same channel as domain failures but with
/// its own tag, so `match`-based consumers can tell them apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection<E> {
    /// The producer failed with a domain error.
    Failed(E),
    /// The operation was cancelled; carries the cancellation marker.
    Cancelled(CancelReason),
    /// The producer dropped its settler without settling.
    Abandoned,
}

impl<E> Rejection<E> {
    /// Returns true if this rejection is a cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns the domain failure, if this is one.
    pub fn failure(self) -> Option<E> {
        match self {
            Self::Failed(e) => Some(e),
            Self::Cancelled(_) | Self::Abandoned => None,
        }
    }

    /// Returns the cancellation reason, if this is a cancellation.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<&CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(reason),
            Self::Failed(_) | Self::Abandoned => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Rejection<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "{e}"),
            Self::Cancelled(r) => write!(f, "cancelled: {r}"),
            Self::Abandoned => write!(f, "operation abandoned before settling"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Rejection<E> {}

/// A failure nobody was registered to handle, re-raised to the settling call.
///
/// Returned by [`Settler::succeed`](crate::Settler::succeed) when a chained
/// handler failed with no `catch` registered, and by
/// [`Settler::fail`](crate::Settler::fail) when no failure handler was
/// registered. In both cases `finally` was not invoked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[must_use = "an unhandled failure is a programming error and should be reported"]
pub enum Unhandled<E> {
    /// `fail` was called with no failure handler registered.
    #[error("unhandled rejection: {0:?}")]
    Rejected(E),
    /// A chained handler failed with no `catch` registered.
    #[error("handler failed with no catch registered: {0:?}")]
    Handler(E),
}

impl<E> Unhandled<E> {
    /// Returns the re-raised failure.
    pub fn into_inner(self) -> E {
        match self {
            Self::Rejected(e) | Self::Handler(e) => e,
        }
    }

    /// Returns true if this came from `fail` without a failure handler.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Returns true if this came from a failing chained handler.
    #[must_use]
    pub const fn is_handler(&self) -> bool {
        matches!(self, Self::Handler(_))
    }
}

/// Errors raised while loading an [`OperationConfig`](crate::OperationConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that does not parse.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidValue {
        /// The variable (or key) that was read.
        var: &'static str,
        /// The raw value found.
        value: String,
        /// Human-readable list of accepted values.
        expected: &'static str,
    },
    /// A TOML document failed to parse.
    #[error("failed to parse TOML config: {0}")]
    Toml(String),
    /// A config file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// The file that was requested.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// A specialized `Result` for configuration loading.
pub type Result<T> = core::result::Result<T, ConfigError>;
