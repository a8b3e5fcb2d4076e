//! Terminal outcome of an operation, as seen by the awaiting side.
//!
//! - `Ok(T)`: the operation succeeded with a value
//! - `Err(E)`: the operation failed with a domain error
//! - `Cancelled(CancelReason)`: settlement was diverted by `cancel`
//! - `Abandoned`: the settler was dropped without settling
//!
//! Callback consumers never see an `Outcome`; it is the value handed from the
//! settlement context to a [`Settled`](crate::future::Settled) future and the
//! bridge to [`Rejection`] for `await` consumers.

use super::cancel::CancelReason;
use crate::error::Rejection;

/// The terminal outcome of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    /// Success with a value.
    Ok(T),
    /// Domain failure.
    Err(E),
    /// The operation was cancelled before it settled.
    Cancelled(CancelReason),
    /// The settling side went away without settling.
    Abandoned,
}

impl<T, E> Outcome<T, E> {
    /// Returns true if this outcome is `Ok`.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// Returns true if this outcome is `Err`.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        matches!(self, Self::Err(_))
    }

    /// Returns true if this outcome is `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    /// Returns true if this outcome is `Abandoned`.
    #[must_use]
    pub const fn is_abandoned(&self) -> bool {
        matches!(self, Self::Abandoned)
    }

    /// Converts this outcome to a standard `Result`.
    ///
    /// Cancellation and abandonment travel on the error channel as tagged
    /// [`Rejection`] variants, next to the domain failure.
    pub fn into_result(self) -> Result<T, Rejection<E>> {
        match self {
            Self::Ok(v) => Ok(v),
            Self::Err(e) => Err(Rejection::Failed(e)),
            Self::Cancelled(r) => Err(Rejection::Cancelled(r)),
            Self::Abandoned => Err(Rejection::Abandoned),
        }
    }

    /// Maps the success value using the provided function.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U, E> {
        match self {
            Self::Ok(v) => Outcome::Ok(f(v)),
            Self::Err(e) => Outcome::Err(e),
            Self::Cancelled(r) => Outcome::Cancelled(r),
            Self::Abandoned => Outcome::Abandoned,
        }
    }

    /// Maps the error value using the provided function.
    pub fn map_err<F2, G: FnOnce(E) -> F2>(self, g: G) -> Outcome<T, F2> {
        match self {
            Self::Ok(v) => Outcome::Ok(v),
            Self::Err(e) => Outcome::Err(g(e)),
            Self::Cancelled(r) => Outcome::Cancelled(r),
            Self::Abandoned => Outcome::Abandoned,
        }
    }

    /// Returns the success value or a default.
    pub fn unwrap_or(self, default: T) -> T {
        match self {
            Self::Ok(v) => v,
            _ => default,
        }
    }
}

impl<T, E> From<Result<T, E>> for Outcome<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(v) => Self::Ok(v),
            Err(e) => Self::Err(e),
        }
    }
}
