//! The settling half of an operation.
//!
//! A [`Settler`] is handed to the starter passed to
//! [`Operation::new`](crate::Operation::new). It is the only way to settle the
//! operation, and both settling methods consume it: an operation is settled at
//! most once, and the compiler enforces it.
//!
//! ```compile_fail
//! use settle::Operation;
//!
//! let _op = Operation::<u32, String>::new(|settler| {
//!     let _ = settler.succeed(1);
//!     let _ = settler.fail("again".to_string()); // settler already moved
//! });
//! ```
//!
//! Dropping a settler without settling abandons the operation: an awaiting
//! future completes with [`Rejection::Abandoned`](crate::Rejection::Abandoned)
//! instead of waiting forever, and a cancelled operation is treated as if the
//! producer had settled it.

use core::fmt;
use std::sync::Arc;

use crate::context::SettlementContext;
use crate::error::Unhandled;
use crate::types::CancelReason;

/// Settles one [`Operation`](crate::Operation).
///
/// `Settler` is `Send`: move it into a timer, an I/O callback or another
/// thread to settle asynchronously.
#[must_use = "dropping a settler abandons its operation"]
pub struct Settler<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    ctx: SettlementContext<T, E>,
    settled: bool,
}

impl<T, E> Settler<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    pub(crate) fn new(ctx: SettlementContext<T, E>) -> Self {
        Self {
            ctx,
            settled: false,
        }
    }

    /// Resolves the operation with `value`.
    ///
    /// Runs the queued chained steps in order, then `finally`, then wakes an
    /// awaiting future. If the operation was cancelled first, the value is
    /// dropped and only the `cancelled` handler runs.
    ///
    /// # Errors
    ///
    /// Returns [`Unhandled::Handler`] if a chained step failed and no `catch`
    /// was registered. `finally` was not invoked in that case.
    pub fn succeed(mut self, value: T) -> Result<(), Unhandled<E>> {
        self.settled = true;
        self.ctx.succeed(value)
    }

    /// Rejects the operation with `error`.
    ///
    /// Runs the `fail` handler (or wakes an awaiting future), then `finally`.
    /// If the operation was cancelled first, the error is dropped and only the
    /// `cancelled` handler runs.
    ///
    /// # Errors
    ///
    /// Returns [`Unhandled::Rejected`] if no failure handler was registered.
    /// `finally` was not invoked in that case.
    pub fn fail(mut self, error: E) -> Result<(), Unhandled<E>> {
        self.settled = true;
        self.ctx.fail(error)
    }

    /// Returns true once a consumer has cancelled the operation.
    ///
    /// Producers may poll this to skip work whose result would be discarded.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.ctx.status().is_cancelled()
    }

    /// Returns the cancellation reason, if cancelled.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.ctx.cancel_reason()
    }

    /// Returns the operation's label, if one was set.
    #[must_use]
    pub fn label(&self) -> Option<Arc<str>> {
        self.ctx.label()
    }
}

impl<T, E> Drop for Settler<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    fn drop(&mut self) {
        if !self.settled {
            self.ctx.abandon();
        }
    }
}

impl<T, E> fmt::Debug for Settler<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler")
            .field("ctx", &self.ctx)
            .field("settled", &self.settled)
            .finish()
    }
}
