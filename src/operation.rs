//! The operation handle and its capability-narrowing registration API.
//!
//! An [`Operation<T, E, V, S>`] is the consumer's view of one asynchronous
//! computation that settles with either a `T` or an `E`. Handlers are
//! registered with `ok`/`then`, `fail`, `catch`, `cancelled` and `finally`.
//! Each registration consumes the handle and returns one whose type no longer
//! offers the method just used.
//!
//! # Type-state
//!
//! `S` is a [`Caps`] of five markers, one per registration method, each either
//! [`Open`] or [`Taken`]. `V` is the type of the chain accumulator: `T` until
//! `ok` is registered, then whatever the last value-producing step returns.
//! Steps registered with `inspect_ok`/`then_inspect` produce no value and
//! leave the accumulator as it was.
//!
//! | Method | Requires | Effect |
//! |--------|----------|--------|
//! | `ok` | ok and finally `Open`, `V = T` | takes ok, `V = U` |
//! | `inspect_ok` | ok and finally `Open`, `V = T` | takes ok, `V` unchanged |
//! | `then` | ok `Taken`, finally `Open` | `V = U` |
//! | `then_inspect` | ok `Taken`, finally `Open` | `V` unchanged |
//! | `fail` | fail `Open` | takes fail |
//! | `catch` | catch `Open` | takes catch |
//! | `cancelled` | cancelled `Open` | takes cancelled |
//! | `finally` | finally `Open` | takes finally, seals the chain |
//! | `.await` | ok and fail `Open` | consumes the handle |
//!
//! Registering the same handler twice is a type error:
//!
//! ```compile_fail
//! use settle::Operation;
//!
//! let op = Operation::<u32, String>::resolved(1);
//! let _ = op.fail(|_| {}).fail(|_| {});
//! ```
//!
//! `ok` is not available once `finally` is registered:
//!
//! ```compile_fail
//! use settle::Operation;
//!
//! let op = Operation::<u32, String>::resolved(1);
//! let _ = op.finally(|_, _| {}).ok(|v| Ok(*v));
//! ```
//!
//! Awaiting requires that neither `ok` nor `fail` has been taken:
//!
//! ```compile_fail
//! use settle::Operation;
//!
//! async fn consume() {
//!     let op = Operation::<u32, String>::resolved(1).ok(|v| Ok(*v + 1));
//!     let _ = op.await;
//! }
//! ```
//!
//! # Immediate and deferred handlers
//!
//! A handler registered before settlement is stored and runs during
//! settlement. A handler registered after settlement runs inside the
//! registration call. Both see the same arguments and run the same number of
//! times.
//!
//! ```
//! use settle::Operation;
//! use std::sync::{Arc, Mutex};
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let log = Arc::clone(&seen);
//! Operation::<u32, String>::resolved(418).ok(move |v| {
//!     log.lock().unwrap().push(*v);
//!     Ok(())
//! });
//!
//! assert_eq!(*seen.lock().unwrap(), vec![418]);
//! ```

use core::any::Any;
use core::fmt;
use core::marker::PhantomData;
use std::future::IntoFuture;
use std::sync::Arc;

use crate::config::{LateCancel, OperationConfig, UnhandledPolicy};
use crate::context::{Accumulator, CancelTarget, SettlementContext, Step};
use crate::error::Rejection;
use crate::future::Settled;
use crate::settler::Settler;
use crate::tracing_compat::trace;
use crate::types::{CancelReason, Status};

/// Capability marker: the registration method is still available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Open {}

/// Capability marker: the registration method has been used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Taken {}

/// The remaining registration capabilities of an [`Operation`].
///
/// Parameters, in order: `ok`, `fail`, `catch`, `cancelled`, `finally`.
/// Only exists at the type level.
pub struct Caps<OnOk, OnFail, OnCatch, OnCancel, OnFinally> {
    _marker: PhantomData<fn() -> (OnOk, OnFail, OnCatch, OnCancel, OnFinally)>,
}

/// Capabilities of a freshly constructed operation: everything open.
pub type Fresh = Caps<Open, Open, Open, Open, Open>;

/// Handle to one asynchronous operation.
///
/// See the [module documentation](self) for the registration rules.
pub struct Operation<T, E, V = T, S = Fresh>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    ctx: SettlementContext<T, E>,
    _state: PhantomData<fn() -> (V, S)>,
}

impl<T, E> Operation<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    /// Creates an operation and runs `starter` synchronously.
    ///
    /// The starter receives the [`Settler`]. It may settle right away, or move
    /// the settler somewhere that settles later.
    ///
    /// ```
    /// use settle::Operation;
    ///
    /// let op = Operation::<u32, String>::new(|settler| {
    ///     std::thread::spawn(move || {
    ///         let _ = settler.succeed(7);
    ///     });
    /// });
    /// # let _ = op;
    /// ```
    pub fn new<F>(starter: F) -> Self
    where
        F: FnOnce(Settler<T, E>),
    {
        OperationBuilder::new().start(starter)
    }

    /// Returns a builder for a labelled or configured operation.
    pub fn builder() -> OperationBuilder {
        OperationBuilder::new()
    }

    /// Creates an operation that is already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        OperationBuilder::new().resolved(value)
    }

    /// Creates an operation that is already rejected with `error`.
    ///
    /// The rejection is not reported as unhandled; it reaches whichever
    /// failure handler is registered later.
    pub fn rejected(error: E) -> Self {
        OperationBuilder::new().rejected(error)
    }

    fn from_context(ctx: SettlementContext<T, E>) -> Self {
        Self {
            ctx,
            _state: PhantomData,
        }
    }
}

impl<T, E, V, S> Operation<T, E, V, S>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    fn advance<V2, S2>(self) -> Operation<T, E, V2, S2> {
        Operation {
            ctx: self.ctx,
            _state: PhantomData,
        }
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.ctx.status()
    }

    /// Returns the label set through [`OperationBuilder::label`].
    #[must_use]
    pub fn label(&self) -> Option<Arc<str>> {
        self.ctx.label()
    }

    /// Returns true if the operation has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.ctx.status().is_cancelled()
    }

    /// Returns the recorded cancellation reason, if any.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.ctx.cancel_reason()
    }

    /// Cancels the operation with the default (user) reason.
    ///
    /// Never invokes a handler. A later `succeed` or `fail` from the producer
    /// runs the `cancelled` handler instead of `ok`/`fail`/`finally`.
    /// Cancelling an already settled operation follows the configured
    /// [`LateCancel`] policy.
    pub fn cancel(&self) {
        self.ctx.cancel(CancelReason::default());
    }

    /// Cancels the operation with `reason`.
    ///
    /// Repeated cancellation keeps the more severe reason.
    pub fn cancel_with(&self, reason: CancelReason) {
        self.ctx.cancel(reason);
    }

    /// Returns a cloneable handle that can cancel this operation from
    /// elsewhere, independent of the handle's type-state.
    #[must_use]
    pub fn canceller(&self) -> Canceller {
        Canceller {
            target: Arc::new(self.ctx.clone()),
        }
    }
}

fn erase_step<V, U, E, F>(handler: F) -> Step<E>
where
    V: 'static,
    U: Send + 'static,
    E: 'static,
    F: FnOnce(&V) -> Result<U, E> + Send + 'static,
{
    Box::new(move |acc: &(dyn Any + Send)| -> Result<Option<Accumulator>, E> {
        match acc.downcast_ref::<V>() {
            Some(value) => handler(value).map(|next| Some(Box::new(next) as Accumulator)),
            None => unreachable!(
                "chain accumulator is not a {}",
                core::any::type_name::<V>()
            ),
        }
    })
}

/// Erases a step that produces no value; the accumulator is left in place.
fn erase_inspect<V, E, F>(handler: F) -> Step<E>
where
    V: 'static,
    E: 'static,
    F: FnOnce(&V) -> Result<(), E> + Send + 'static,
{
    Box::new(move |acc: &(dyn Any + Send)| -> Result<Option<Accumulator>, E> {
        match acc.downcast_ref::<V>() {
            Some(value) => handler(value).map(|()| None),
            None => unreachable!(
                "chain accumulator is not a {}",
                core::any::type_name::<V>()
            ),
        }
    })
}

impl<T, E, OnFail, OnCatch, OnCancel> Operation<T, E, T, Caps<Open, OnFail, OnCatch, OnCancel, Open>>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    /// Registers the success handler, the first step of the chain.
    ///
    /// Its return value replaces the chain value that later steps and
    /// `finally` see. Use [`inspect_ok`](Operation::inspect_ok) for a handler
    /// that produces nothing.
    ///
    /// Returning `Err(e)` is a handler failure: later steps are skipped and
    /// `e` goes to the registered `catch`. With no `catch`, the failure is
    /// re-raised to whoever triggered the handler: the producer's `succeed`
    /// call, or this registration call if the operation already resolved
    /// (see [`UnhandledPolicy`]).
    pub fn ok<U, F>(self, handler: F) -> Operation<T, E, U, Caps<Taken, OnFail, OnCatch, OnCancel, Open>>
    where
        U: Send + 'static,
        F: FnOnce(&T) -> Result<U, E> + Send + 'static,
    {
        self.ctx.push_step(erase_step::<T, U, E, F>(handler));
        self.advance()
    }

    /// Registers a success handler that only observes the value.
    ///
    /// Same as [`ok`](Operation::ok) except that the chain value is left
    /// untouched, so later steps and `finally` still see the settled `T`.
    ///
    /// ```
    /// use settle::Operation;
    ///
    /// Operation::<u32, String>::resolved(418)
    ///     .inspect_ok(|v| {
    ///         assert_eq!(*v, 418);
    ///         Ok(())
    ///     })
    ///     .finally(|v, _| assert_eq!(v, Some(&418)));
    /// ```
    pub fn inspect_ok<F>(self, handler: F) -> Operation<T, E, T, Caps<Taken, OnFail, OnCatch, OnCancel, Open>>
    where
        F: FnOnce(&T) -> Result<(), E> + Send + 'static,
    {
        self.ctx.push_step(erase_inspect::<T, E, F>(handler));
        self.advance()
    }
}

impl<T, E, V, OnFail, OnCatch, OnCancel> Operation<T, E, V, Caps<Taken, OnFail, OnCatch, OnCancel, Open>>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
    V: Send + 'static,
{
    /// Appends a chained step that receives the previous step's value.
    ///
    /// Steps run in registration order, under the same failure rules as
    /// [`ok`](Operation::ok).
    pub fn then<U, F>(self, handler: F) -> Operation<T, E, U, Caps<Taken, OnFail, OnCatch, OnCancel, Open>>
    where
        U: Send + 'static,
        F: FnOnce(&V) -> Result<U, E> + Send + 'static,
    {
        self.ctx.push_step(erase_step::<V, U, E, F>(handler));
        self.advance()
    }

    /// Appends a chained step that only observes the previous value and
    /// leaves it in place.
    pub fn then_inspect<F>(self, handler: F) -> Operation<T, E, V, Caps<Taken, OnFail, OnCatch, OnCancel, Open>>
    where
        F: FnOnce(&V) -> Result<(), E> + Send + 'static,
    {
        self.ctx.push_step(erase_inspect::<V, E, F>(handler));
        self.advance()
    }
}

impl<T, E, V, OnOk, OnCatch, OnCancel, OnFinally>
    Operation<T, E, V, Caps<OnOk, Open, OnCatch, OnCancel, OnFinally>>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    /// Registers the failure handler.
    ///
    /// Runs once with the producer's error. A registered failure handler is
    /// also what lets `finally` run on the rejection path.
    pub fn fail<F>(self, handler: F) -> Operation<T, E, V, Caps<OnOk, Taken, OnCatch, OnCancel, OnFinally>>
    where
        F: FnOnce(&E) + Send + 'static,
    {
        self.ctx.set_fail(Box::new(handler));
        self.advance()
    }
}

impl<T, E, V, OnOk, OnFail, OnCancel, OnFinally>
    Operation<T, E, V, Caps<OnOk, OnFail, Open, OnCancel, OnFinally>>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    /// Registers the handler that absorbs a failing chained step.
    ///
    /// Its return value becomes the error `finally` sees. `catch` has no
    /// trigger of its own: register it before the step that may fail if the
    /// operation could already be resolved.
    pub fn catch<F>(self, handler: F) -> Operation<T, E, V, Caps<OnOk, OnFail, Taken, OnCancel, OnFinally>>
    where
        F: FnOnce(E) -> E + Send + 'static,
    {
        self.ctx.set_catch(Box::new(handler));
        self.advance()
    }
}

impl<T, E, V, OnOk, OnFail, OnCatch, OnFinally>
    Operation<T, E, V, Caps<OnOk, OnFail, OnCatch, Open, OnFinally>>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    /// Registers the handler for a settlement that arrives after `cancel`.
    ///
    /// If the operation is already cancelled, runs immediately.
    pub fn cancelled<F>(self, handler: F) -> Operation<T, E, V, Caps<OnOk, OnFail, OnCatch, Taken, OnFinally>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ctx.set_cancelled(Box::new(handler));
        self.advance()
    }
}

impl<T, E, V, OnOk, OnFail, OnCatch, OnCancel>
    Operation<T, E, V, Caps<OnOk, OnFail, OnCatch, OnCancel, Open>>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
    V: 'static,
{
    /// Registers the handler that runs after the success chain, or after a
    /// handled rejection.
    ///
    /// Receives the chain accumulator (`None` if no value of type `V` was
    /// produced) and the rejection error, or the value returned by `catch`.
    /// Does not run for an unhandled rejection, a re-raised handler failure,
    /// or a cancelled operation.
    pub fn finally<F>(self, handler: F) -> Operation<T, E, V, Caps<OnOk, OnFail, OnCatch, OnCancel, Taken>>
    where
        F: FnOnce(Option<&V>, Option<&E>) + Send + 'static,
    {
        self.ctx.set_finally(Box::new(
            move |value: Option<&(dyn Any + Send)>, error: Option<&E>| {
                handler(value.and_then(|v| v.downcast_ref::<V>()), error);
            },
        ));
        self.advance()
    }
}

impl<T, E, OnCatch, OnCancel, OnFinally> IntoFuture
    for Operation<T, E, T, Caps<Open, Open, OnCatch, OnCancel, OnFinally>>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    type Output = Result<T, Rejection<E>>;
    type IntoFuture = Settled<T, E>;

    fn into_future(self) -> Self::IntoFuture {
        Settled::register(self.ctx)
    }
}

impl<T, E, V, S> fmt::Debug for Operation<T, E, V, S>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation").field("ctx", &self.ctx).finish()
    }
}

/// Builder for an [`Operation`] with a label or non-default configuration.
///
/// ```
/// use settle::{LateCancel, OperationBuilder, Status};
///
/// let op = OperationBuilder::new()
///     .label("fetch-user")
///     .late_cancel(LateCancel::Record)
///     .start::<u32, String, _>(|settler| {
///         let _ = settler.succeed(1);
///     });
/// op.cancel();
///
/// assert_eq!(op.label().as_deref(), Some("fetch-user"));
/// assert_eq!(op.status(), Status::Cancelled);
/// ```
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct OperationBuilder {
    label: Option<Arc<str>>,
    config: OperationConfig,
}

impl OperationBuilder {
    /// Creates a builder with no label and the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a label carried in log events and panic messages.
    pub fn label(mut self, label: impl Into<Arc<str>>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: OperationConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the late-cancel policy.
    pub fn late_cancel(mut self, policy: LateCancel) -> Self {
        self.config.late_cancel = policy;
        self
    }

    /// Sets the unhandled-failure policy.
    pub fn unhandled(mut self, policy: UnhandledPolicy) -> Self {
        self.config.unhandled = policy;
        self
    }

    /// Creates the operation and runs `starter` synchronously.
    pub fn start<T, E, F>(self, starter: F) -> Operation<T, E>
    where
        T: Send + 'static,
        E: Clone + fmt::Debug + Send + 'static,
        F: FnOnce(Settler<T, E>),
    {
        trace!(label = ?self.label, "starting operation");
        let ctx = SettlementContext::new(self.label, self.config);
        starter(Settler::new(ctx.clone()));
        Operation::from_context(ctx)
    }

    /// Creates an operation that is already resolved with `value`.
    pub fn resolved<T, E>(self, value: T) -> Operation<T, E>
    where
        T: Send + 'static,
        E: Clone + fmt::Debug + Send + 'static,
    {
        self.start(|settler| {
            // Nothing is registered yet, so nothing can fail.
            let _ = settler.succeed(value);
        })
    }

    /// Creates an operation that is already rejected with `error`.
    ///
    /// The rejection is not reported as unhandled; it reaches whichever
    /// failure handler is registered later.
    pub fn rejected<T, E>(self, error: E) -> Operation<T, E>
    where
        T: Send + 'static,
        E: Clone + fmt::Debug + Send + 'static,
    {
        trace!(label = ?self.label, "starting rejected operation");
        let ctx = SettlementContext::new(self.label, self.config);
        ctx.preset_rejected(error);
        Operation::from_context(ctx)
    }
}

/// Cancels an operation from anywhere, without holding its handle.
///
/// Obtained from [`Operation::canceller`]. Clones share the same operation.
#[derive(Clone)]
pub struct Canceller {
    target: Arc<dyn CancelTarget>,
}

impl Canceller {
    /// Cancels with the default (user) reason.
    pub fn cancel(&self) {
        self.target.cancel_with(CancelReason::default());
    }

    /// Cancels with `reason`.
    pub fn cancel_with(&self, reason: CancelReason) {
        self.target.cancel_with(reason);
    }

    /// Returns the operation's current status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.target.status()
    }

    /// Returns true if the operation has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.target.status().is_cancelled()
    }
}

impl fmt::Debug for Canceller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canceller")
            .field("status", &self.target.status())
            .finish()
    }
}
