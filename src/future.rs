//! Await integration.
//!
//! [`Operation`](crate::Operation) implements [`IntoFuture`] while neither
//! `ok` nor `fail` has been registered. Converting it registers a delivery
//! callback on the settlement context and returns a [`Settled`] future:
//!
//! | Settlement | Output |
//! |------------|--------|
//! | `succeed(v)` | `Ok(v)` |
//! | `fail(e)` | `Err(Rejection::Failed(e))` |
//! | cancelled | `Err(Rejection::Cancelled(reason))` |
//! | settler dropped | `Err(Rejection::Abandoned)` |
//!
//! The future never drives the producer. It completes when the context
//! delivers an [`Outcome`], which may already have happened by the time it is
//! first polled.

use core::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::context::SettlementContext;
use crate::error::Rejection;
use crate::types::{CancelReason, Outcome, Status};

struct Slot<T, E> {
    outcome: Option<Outcome<T, E>>,
    waker: Option<Waker>,
    completed: bool,
}

/// Future returned by awaiting an [`Operation`](crate::Operation).
#[must_use = "futures do nothing unless polled"]
pub struct Settled<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    slot: Arc<Mutex<Slot<T, E>>>,
    ctx: SettlementContext<T, E>,
}

impl<T, E> Settled<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    pub(crate) fn register(ctx: SettlementContext<T, E>) -> Self {
        let slot = Arc::new(Mutex::new(Slot {
            outcome: None,
            waker: None,
            completed: false,
        }));
        let delivery = Arc::clone(&slot);
        ctx.set_awaiter(Box::new(move |outcome: Outcome<T, E>| {
            let waker = {
                let mut slot = delivery.lock();
                slot.outcome = Some(outcome);
                slot.waker.take()
            };
            if let Some(waker) = waker {
                waker.wake();
            }
        }));
        Self { slot, ctx }
    }

    /// Cancels the underlying operation with the default reason.
    ///
    /// The future still completes only once the producer settles or drops its
    /// settler; it then yields [`Rejection::Cancelled`].
    pub fn cancel(&self) {
        self.ctx.cancel(CancelReason::default());
    }

    /// Cancels the underlying operation with `reason`.
    pub fn cancel_with(&self, reason: CancelReason) {
        self.ctx.cancel(reason);
    }

    /// Returns the operation's current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.ctx.status()
    }
}

impl<T, E> Future for Settled<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    type Output = Result<T, Rejection<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = self.slot.lock();
        if let Some(outcome) = slot.outcome.take() {
            slot.completed = true;
            return Poll::Ready(outcome.into_result());
        }
        assert!(!slot.completed, "Settled polled after completion");
        match &slot.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => slot.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl<T, E> fmt::Debug for Settled<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.slot.lock();
        f.debug_struct("Settled")
            .field("ready", &slot.outcome.is_some())
            .field("completed", &slot.completed)
            .field("ctx", &self.ctx)
            .finish()
    }
}
