//! Shared settlement state of one operation.
//!
//! Every view of an operation (the [`Operation`](crate::Operation) handle in
//! each of its type-states, the [`Settler`](crate::Settler), the awaiting
//! [`Settled`](crate::future::Settled) future and any
//! [`Canceller`](crate::Canceller)) holds a clone of the same
//! [`SettlementContext`]. It is the only place where status changes and where
//! handlers run.
//!
//! # Dispatch
//!
//! Registration always stores the handler and then calls [`dispatch`], which
//! runs whatever the current status makes runnable. Settlement sets the status
//! and calls the same [`dispatch`]. A handler registered after settlement is
//! therefore invoked exactly like one registered before it, only earlier in
//! wall-clock terms.
//!
//! The lock is never held while a user handler runs. Each dispatch step takes
//! what it needs out of the state, releases the lock, runs the handler, and
//! re-locks to store the result. A `dispatching` flag makes the running loop
//! the only consumer; concurrent or re-entrant registrations only store and
//! are picked up by that loop.
//!
//! [`dispatch`]: SettlementContext::dispatch

use core::any::Any;
use core::fmt;
use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{LateCancel, OperationConfig, UnhandledPolicy};
use crate::error::Unhandled;
use crate::tracing_compat::{debug, error, trace, warn};
use crate::types::{CancelReason, Outcome, Status};

/// Type-erased chain accumulator. Each chained step may change its type.
pub(crate) type Accumulator = Box<dyn Any + Send>;
/// One erased chained step: reads the accumulator and produces the next one,
/// or `None` to keep the current one.
pub(crate) type Step<E> =
    Box<dyn FnOnce(&(dyn Any + Send)) -> Result<Option<Accumulator>, E> + Send>;
pub(crate) type FailFn<E> = Box<dyn FnOnce(&E) + Send>;
pub(crate) type CatchFn<E> = Box<dyn FnOnce(E) -> E + Send>;
pub(crate) type CancelFn = Box<dyn FnOnce() + Send>;
pub(crate) type FinallyFn<E> = Box<dyn FnOnce(Option<&(dyn Any + Send)>, Option<&E>) + Send>;
pub(crate) type Awaiter<T, E> = Box<dyn FnOnce(Outcome<T, E>) + Send>;

struct State<T, E> {
    status: Status,
    error: Option<E>,
    then_value: Option<Accumulator>,
    then_error: Option<E>,
    steps: VecDeque<Step<E>>,
    on_fail: Option<FailFn<E>>,
    on_catch: Option<CatchFn<E>>,
    on_cancel: Option<CancelFn>,
    on_finally: Option<FinallyFn<E>>,
    awaiter: Option<Awaiter<T, E>>,
    awaited: bool,
    /// A settlement attempt happened (including a diverted one).
    settled: bool,
    /// A settlement attempt (or abandonment) arrived while cancelled.
    diverted: bool,
    abandoned: bool,
    /// A chained step failed; later steps are skipped.
    faulted: bool,
    /// A handler failure was re-raised; `finally` never runs.
    propagated: bool,
    /// A failure handler saw the rejection; `finally` may run.
    observed: bool,
    dispatching: bool,
    reason: Option<CancelReason>,
    label: Option<Arc<str>>,
    config: OperationConfig,
}

enum Job<T, E> {
    Step(Step<E>, Accumulator),
    Fail(FailFn<E>, E),
    Finally(FinallyFn<E>, Option<Accumulator>, Option<E>, Option<E>),
    Cancelled(CancelFn),
    Deliver(Awaiter<T, E>, Outcome<T, E>),
}

/// Resets the dispatching flag if a handler unwinds out of the loop.
struct DispatchGuard<'a, T, E> {
    state: &'a Mutex<State<T, E>>,
    armed: bool,
}

impl<T, E> Drop for DispatchGuard<'_, T, E> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().dispatching = false;
        }
    }
}

/// Anything that can be cancelled through a type-erased handle.
pub(crate) trait CancelTarget: Send + Sync {
    /// Requests cancellation with the given reason.
    fn cancel_with(&self, reason: CancelReason);
    /// Returns the current status.
    fn status(&self) -> Status;
}

/// The state shared by all views of one operation.
pub(crate) struct SettlementContext<T, E> {
    state: Arc<Mutex<State<T, E>>>,
}

impl<T, E> Clone for SettlementContext<T, E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<T, E> fmt::Debug for SettlementContext<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("SettlementContext")
            .field("status", &st.status)
            .field("label", &st.label)
            .field("awaited", &st.awaited)
            .field("settled", &st.settled)
            .field("queued_steps", &st.steps.len())
            .finish_non_exhaustive()
    }
}

impl<T, E> SettlementContext<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    pub(crate) fn new(label: Option<Arc<str>>, config: OperationConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                status: Status::Pending,
                error: None,
                then_value: None,
                then_error: None,
                steps: VecDeque::new(),
                on_fail: None,
                on_catch: None,
                on_cancel: None,
                on_finally: None,
                awaiter: None,
                awaited: false,
                settled: false,
                diverted: false,
                abandoned: false,
                faulted: false,
                propagated: false,
                observed: false,
                dispatching: false,
                reason: None,
                label,
                config,
            })),
        }
    }

    pub(crate) fn status(&self) -> Status {
        self.state.lock().status
    }

    pub(crate) fn label(&self) -> Option<Arc<str>> {
        self.state.lock().label.clone()
    }

    pub(crate) fn cancel_reason(&self) -> Option<CancelReason> {
        self.state.lock().reason.clone()
    }

    // =====================================================================
    // Settlement
    // =====================================================================

    /// Resolves with `value`, or diverts to the cancellation path.
    pub(crate) fn succeed(&self, value: T) -> Result<(), Unhandled<E>> {
        {
            let mut st = self.state.lock();
            st.settled = true;
            if st.status.is_cancelled() {
                st.diverted = true;
                debug!(label = ?st.label, "success diverted by cancellation");
            } else {
                st.status = Status::Resolved;
                st.then_value = Some(Box::new(value));
                trace!(label = ?st.label, queued_steps = st.steps.len(), "resolved");
            }
        }
        self.dispatch()
    }

    /// Rejects with `error`, or diverts to the cancellation path.
    ///
    /// With neither a failure handler nor an awaiting future registered, the
    /// error is handed back as [`Unhandled::Rejected`] and `finally` is not
    /// invoked.
    pub(crate) fn fail(&self, error: E) -> Result<(), Unhandled<E>> {
        {
            let mut st = self.state.lock();
            st.settled = true;
            if st.status.is_cancelled() {
                st.diverted = true;
                debug!(label = ?st.label, "failure diverted by cancellation");
            } else {
                st.status = Status::Rejected;
                let handled = st.on_fail.is_some() || st.awaiter.is_some();
                trace!(label = ?st.label, handled, "rejected");
                if !handled {
                    warn!(label = ?st.label, error = ?error, "unhandled rejection");
                    st.error = Some(error.clone());
                    return Err(Unhandled::Rejected(error));
                }
                st.error = Some(error);
            }
        }
        self.dispatch()
    }

    /// Starts out rejected without reporting the error as unhandled.
    ///
    /// The rejection is delivered to whichever failure handler is registered
    /// later.
    pub(crate) fn preset_rejected(&self, error: E) {
        let mut st = self.state.lock();
        st.settled = true;
        st.status = Status::Rejected;
        st.error = Some(error);
    }

    /// The settling side went away without settling.
    pub(crate) fn abandon(&self) {
        {
            let mut st = self.state.lock();
            st.abandoned = true;
            if st.status.is_cancelled() {
                st.diverted = true;
            }
            debug!(label = ?st.label, status = %st.status, "settler dropped before settling");
        }
        self.dispatch_or_report();
    }

    /// Records a cancellation request.
    ///
    /// Never invokes a handler; it only changes how a later settlement is
    /// interpreted.
    pub(crate) fn cancel(&self, reason: CancelReason) {
        let mut st = self.state.lock();
        match st.status {
            Status::Pending => {
                debug!(label = ?st.label, reason = %reason, "cancelled");
                st.status = Status::Cancelled;
                st.reason = Some(reason);
            }
            Status::Cancelled => {
                if let Some(current) = st.reason.as_mut() {
                    current.strengthen(&reason);
                }
            }
            Status::Resolved | Status::Rejected => match st.config.late_cancel {
                LateCancel::Ignore => {
                    debug!(
                        label = ?st.label,
                        status = %st.status,
                        "cancel after settlement ignored"
                    );
                }
                LateCancel::Record => {
                    debug!(
                        label = ?st.label,
                        status = %st.status,
                        reason = %reason,
                        "cancel after settlement recorded"
                    );
                    st.status = Status::Cancelled;
                    st.reason = Some(reason);
                }
            },
        }
    }

    // =====================================================================
    // Registration
    // =====================================================================

    pub(crate) fn push_step(&self, step: Step<E>) {
        {
            let mut st = self.state.lock();
            trace!(label = ?st.label, status = %st.status, "step registered");
            st.steps.push_back(step);
        }
        self.dispatch_or_report();
    }

    pub(crate) fn set_fail(&self, handler: FailFn<E>) {
        self.state.lock().on_fail = Some(handler);
        self.dispatch_or_report();
    }

    pub(crate) fn set_catch(&self, handler: CatchFn<E>) {
        self.state.lock().on_catch = Some(handler);
    }

    pub(crate) fn set_cancelled(&self, handler: CancelFn) {
        let mut st = self.state.lock();
        if st.status.is_cancelled() {
            trace!(label = ?st.label, "cancelled handler invoked on registration");
            drop(st);
            handler();
        } else {
            st.on_cancel = Some(handler);
        }
    }

    pub(crate) fn set_finally(&self, handler: FinallyFn<E>) {
        self.state.lock().on_finally = Some(handler);
        self.dispatch_or_report();
    }

    pub(crate) fn set_awaiter(&self, awaiter: Awaiter<T, E>) {
        {
            let mut st = self.state.lock();
            st.awaited = true;
            st.awaiter = Some(awaiter);
        }
        self.dispatch_or_report();
    }

    // =====================================================================
    // Dispatch
    // =====================================================================

    /// Runs every handler the current state makes runnable.
    ///
    /// Returns the first handler failure that no `catch` absorbed. A call made
    /// while another dispatch is running returns `Ok(())` immediately; the
    /// running loop picks up whatever was stored.
    fn dispatch(&self) -> Result<(), Unhandled<E>> {
        {
            let mut st = self.state.lock();
            if st.dispatching {
                return Ok(());
            }
            st.dispatching = true;
        }
        let mut guard = DispatchGuard {
            state: &self.state,
            armed: true,
        };
        loop {
            let job = {
                let mut st = self.state.lock();
                match Self::next_job(&mut st) {
                    Some(job) => job,
                    None => {
                        st.dispatching = false;
                        guard.armed = false;
                        return Ok(());
                    }
                }
            };
            if let Err(e) = self.run(job) {
                self.state.lock().dispatching = false;
                guard.armed = false;
                return Err(Unhandled::Handler(e));
            }
        }
    }

    fn dispatch_or_report(&self) {
        if let Err(unhandled) = self.dispatch() {
            self.report(unhandled);
        }
    }

    /// Applies the configured [`UnhandledPolicy`] to a failure re-raised
    /// inside a registration call.
    fn report(&self, unhandled: Unhandled<E>) {
        let (policy, label) = {
            let st = self.state.lock();
            (st.config.unhandled, st.label.clone())
        };
        match policy {
            UnhandledPolicy::Panic => match label {
                Some(label) => panic!("operation `{label}`: {unhandled}"),
                None => panic!("{unhandled}"),
            },
            UnhandledPolicy::Log => {
                error!(label = ?label, error = %unhandled, "unhandled failure dropped");
            }
        }
    }

    fn next_job(st: &mut State<T, E>) -> Option<Job<T, E>> {
        match st.status {
            Status::Resolved => {
                if st.faulted && !st.steps.is_empty() {
                    trace!(label = ?st.label, skipped = st.steps.len(), "skipping steps after failure");
                    st.steps.clear();
                }
                if !st.steps.is_empty() && st.then_value.is_some() {
                    return st
                        .steps
                        .pop_front()
                        .zip(st.then_value.take())
                        .map(|(step, acc)| Job::Step(step, acc));
                }
                if !st.propagated {
                    if let Some(handler) = st.on_finally.take() {
                        return Some(Job::Finally(
                            handler,
                            st.then_value.take(),
                            st.error.take(),
                            st.then_error.take(),
                        ));
                    }
                }
                if st.awaiter.is_some() {
                    // An awaited operation has no chained steps, so the
                    // accumulator is the settled value unless a `finally`
                    // handler unwound while holding it.
                    let outcome = match st.then_value.take().map(|acc| acc.downcast::<T>()) {
                        Some(Ok(value)) => Outcome::Ok(*value),
                        Some(Err(acc)) => {
                            error!(label = ?st.label, "awaited accumulator is not the settled value");
                            st.then_value = Some(acc);
                            Outcome::Abandoned
                        }
                        None => {
                            error!(label = ?st.label, "settled value lost before delivery");
                            Outcome::Abandoned
                        }
                    };
                    return st
                        .awaiter
                        .take()
                        .map(|awaiter| Job::Deliver(awaiter, outcome));
                }
                None
            }
            Status::Rejected => {
                if st.on_fail.is_some() && st.error.is_some() {
                    st.observed = true;
                    return st
                        .on_fail
                        .take()
                        .zip(st.error.take())
                        .map(|(handler, e)| Job::Fail(handler, e));
                }
                if st.awaiter.is_some() && st.error.is_some() {
                    st.observed = true;
                    return st
                        .awaiter
                        .take()
                        .zip(st.error.clone())
                        .map(|(awaiter, e)| Job::Deliver(awaiter, Outcome::Err(e)));
                }
                if st.observed && !st.propagated {
                    if let Some(handler) = st.on_finally.take() {
                        return Some(Job::Finally(
                            handler,
                            st.then_value.take(),
                            st.error.take(),
                            st.then_error.take(),
                        ));
                    }
                }
                None
            }
            Status::Cancelled => {
                if st.diverted {
                    if let Some(handler) = st.on_cancel.take() {
                        return Some(Job::Cancelled(handler));
                    }
                }
                if st.settled || st.abandoned {
                    let reason = st.reason.clone().unwrap_or_default();
                    return st
                        .awaiter
                        .take()
                        .map(|awaiter| Job::Deliver(awaiter, Outcome::Cancelled(reason)));
                }
                None
            }
            Status::Pending => {
                if st.abandoned {
                    return st
                        .awaiter
                        .take()
                        .map(|awaiter| Job::Deliver(awaiter, Outcome::Abandoned));
                }
                None
            }
        }
    }

    /// Runs one job with the lock released. Returns a handler failure that no
    /// `catch` absorbed.
    fn run(&self, job: Job<T, E>) -> Result<(), E> {
        match job {
            Job::Step(step, acc) => {
                let result = step(&*acc);
                let mut st = self.state.lock();
                match result {
                    Ok(next) => {
                        st.then_value = Some(next.unwrap_or(acc));
                        Ok(())
                    }
                    Err(e) => {
                        st.then_value = Some(acc);
                        st.faulted = true;
                        st.steps.clear();
                        match st.on_catch.take() {
                            Some(catch) => {
                                trace!(label = ?st.label, error = ?e, "step failed, absorbed by catch");
                                drop(st);
                                let absorbed = catch(e);
                                self.state.lock().then_error = Some(absorbed);
                                Ok(())
                            }
                            None => {
                                debug!(label = ?st.label, error = ?e, "step failed with no catch registered");
                                st.propagated = true;
                                Err(e)
                            }
                        }
                    }
                }
            }
            Job::Fail(handler, e) => {
                handler(&e);
                self.state.lock().error = Some(e);
                Ok(())
            }
            Job::Finally(handler, value, error, then_error) => {
                handler(value.as_deref(), error.as_ref().or(then_error.as_ref()));
                let mut st = self.state.lock();
                st.then_value = value;
                st.error = error;
                st.then_error = then_error;
                Ok(())
            }
            Job::Cancelled(handler) => {
                handler();
                Ok(())
            }
            Job::Deliver(awaiter, outcome) => {
                awaiter(outcome);
                Ok(())
            }
        }
    }
}

impl<T, E> CancelTarget for SettlementContext<T, E>
where
    T: Send + 'static,
    E: Clone + fmt::Debug + Send + 'static,
{
    fn cancel_with(&self, reason: CancelReason) {
        self.cancel(reason);
    }

    fn status(&self) -> Status {
        Self::status(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, Recorder};

    type Ctx = SettlementContext<u32, &'static str>;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn ctx() -> Ctx {
        SettlementContext::new(Some(Arc::from("test")), OperationConfig::default())
    }

    fn recording_step(rec: &Recorder, name: &'static str) -> Step<&'static str> {
        let rec = rec.clone();
        Box::new(
            move |acc: &(dyn Any + Send)| -> Result<Option<Accumulator>, &'static str> {
                let v = acc.downcast_ref::<u32>().copied().unwrap_or_default();
                rec.push(format!("{name}:{v}"));
                Ok(Some(Box::new(v + 1)))
            },
        )
    }

    fn failing_step(error: &'static str) -> Step<&'static str> {
        Box::new(
            move |_: &(dyn Any + Send)| -> Result<Option<Accumulator>, &'static str> {
                Err(error)
            },
        )
    }

    fn observing_step(rec: &Recorder) -> Step<&'static str> {
        let rec = rec.clone();
        Box::new(
            move |acc: &(dyn Any + Send)| -> Result<Option<Accumulator>, &'static str> {
                let v = acc.downcast_ref::<u32>().copied().unwrap_or_default();
                rec.push(format!("observe:{v}"));
                Ok(None)
            },
        )
    }

    fn recording_finally(rec: &Recorder) -> FinallyFn<&'static str> {
        let rec = rec.clone();
        Box::new(move |v: Option<&(dyn Any + Send)>, e: Option<&&'static str>| {
            let v = v.and_then(|v| v.downcast_ref::<u32>()).copied();
            rec.push(format!("finally:{v:?}:{e:?}"));
        })
    }

    #[test]
    fn steps_run_in_order_then_finally() {
        init_test("steps_run_in_order_then_finally");
        let rec = Recorder::new();
        let ctx = ctx();
        ctx.push_step(recording_step(&rec, "a"));
        ctx.push_step(recording_step(&rec, "b"));
        ctx.set_finally(recording_finally(&rec));
        assert!(rec.entries().is_empty());

        ctx.succeed(10).unwrap();
        assert_eq!(rec.entries(), vec!["a:10", "b:11", "finally:Some(12):None"]);
        assert_eq!(ctx.status(), Status::Resolved);
        crate::test_complete!("steps_run_in_order_then_finally");
    }

    #[test]
    fn step_without_value_keeps_accumulator() {
        init_test("step_without_value_keeps_accumulator");
        let rec = Recorder::new();
        let ctx = ctx();
        ctx.push_step(observing_step(&rec));
        ctx.push_step(recording_step(&rec, "a"));
        ctx.push_step(observing_step(&rec));
        ctx.set_finally(recording_finally(&rec));

        ctx.succeed(418).unwrap();
        assert_eq!(
            rec.entries(),
            vec!["observe:418", "a:418", "observe:419", "finally:Some(419):None"]
        );
        crate::test_complete!("step_without_value_keeps_accumulator");
    }

    #[test]
    fn step_failure_without_catch_propagates_and_skips_finally() {
        init_test("step_failure_without_catch_propagates_and_skips_finally");
        let rec = Recorder::new();
        let ctx = ctx();
        ctx.push_step(failing_step("boom"));
        ctx.push_step(recording_step(&rec, "after"));
        ctx.set_finally(recording_finally(&rec));

        let result = ctx.succeed(1);
        crate::assert_with_log!(
            result == Err(Unhandled::Handler("boom")),
            "handler failure is re-raised",
            Err::<(), _>(Unhandled::Handler("boom")),
            result
        );
        assert!(rec.entries().is_empty(), "{:?}", rec.entries());
        crate::test_complete!("step_failure_without_catch_propagates_and_skips_finally");
    }

    #[test]
    fn unhandled_rejection_skips_finally_until_observed() {
        init_test("unhandled_rejection_skips_finally_until_observed");
        let rec = Recorder::new();
        let ctx = ctx();
        ctx.set_finally(recording_finally(&rec));

        assert_eq!(ctx.fail("nope"), Err(Unhandled::Rejected("nope")));
        assert!(rec.entries().is_empty());

        let r = rec.clone();
        ctx.set_fail(Box::new(move |e: &&'static str| r.push(format!("fail:{e}"))));
        assert_eq!(rec.entries(), vec!["fail:nope", "finally:None:Some(\"nope\")"]);
        crate::test_complete!("unhandled_rejection_skips_finally_until_observed");
    }

    #[test]
    fn cancel_diverts_success() {
        init_test("cancel_diverts_success");
        let rec = Recorder::new();
        let ctx = ctx();
        ctx.push_step(recording_step(&rec, "ok"));
        ctx.set_finally(recording_finally(&rec));
        let r = rec.clone();
        ctx.set_cancelled(Box::new(move || r.push("cancelled")));

        ctx.cancel(CancelReason::user("stop"));
        assert!(rec.entries().is_empty(), "cancel never invokes a handler");

        ctx.succeed(5).unwrap();
        assert_eq!(rec.entries(), vec!["cancelled"]);
        assert_eq!(ctx.status(), Status::Cancelled);
        crate::test_complete!("cancel_diverts_success");
    }

    #[test]
    fn cancelled_registered_after_cancel_runs_immediately() {
        init_test("cancelled_registered_after_cancel_runs_immediately");
        let rec = Recorder::new();
        let ctx = ctx();
        ctx.cancel(CancelReason::default());
        let r = rec.clone();
        ctx.set_cancelled(Box::new(move || r.push("cancelled")));
        assert_eq!(rec.entries(), vec!["cancelled"]);

        ctx.succeed(1).unwrap();
        assert_eq!(rec.entries().len(), 1);
        crate::test_complete!("cancelled_registered_after_cancel_runs_immediately");
    }

    #[test]
    fn repeated_cancel_strengthens_reason() {
        init_test("repeated_cancel_strengthens_reason");
        let ctx = ctx();
        ctx.cancel(CancelReason::user("first"));
        ctx.cancel(CancelReason::shutdown());
        ctx.cancel(CancelReason::timeout());
        assert_eq!(ctx.cancel_reason(), Some(CancelReason::shutdown()));
        crate::test_complete!("repeated_cancel_strengthens_reason");
    }

    #[test]
    fn late_cancel_policies() {
        init_test("late_cancel_policies");
        let ignore = ctx();
        ignore.succeed(1).unwrap();
        ignore.cancel(CancelReason::default());
        assert_eq!(ignore.status(), Status::Resolved);

        let record: Ctx = SettlementContext::new(
            None,
            OperationConfig::default().with_late_cancel(LateCancel::Record),
        );
        record.succeed(1).unwrap();
        record.cancel(CancelReason::default());
        assert_eq!(record.status(), Status::Cancelled);
        crate::test_complete!("late_cancel_policies");
    }

    #[test]
    fn abandonment_delivers_to_awaiter() {
        init_test("abandonment_delivers_to_awaiter");
        let seen = Arc::new(Mutex::new(None));
        let ctx = ctx();
        let s = Arc::clone(&seen);
        ctx.set_awaiter(Box::new(move |o: Outcome<u32, &'static str>| *s.lock() = Some(o)));
        assert!(seen.lock().is_none());

        ctx.abandon();
        assert_eq!(*seen.lock(), Some(Outcome::Abandoned));
        crate::test_complete!("abandonment_delivers_to_awaiter");
    }

    #[test]
    fn awaiter_gets_abandoned_when_finally_unwound_with_value() {
        init_test("awaiter_gets_abandoned_when_finally_unwound_with_value");
        let seen = Arc::new(Mutex::new(None));
        let ctx = ctx();
        ctx.set_finally(Box::new(|_: Option<&(dyn Any + Send)>, _: Option<&&'static str>| {
            panic!("finally blew up");
        }));
        let s = Arc::clone(&seen);
        ctx.set_awaiter(Box::new(move |o: Outcome<u32, &'static str>| *s.lock() = Some(o)));

        let settling = ctx.clone();
        let unwound = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _ = settling.succeed(7);
        }));
        assert!(unwound.is_err());
        assert!(seen.lock().is_none());

        // A later dispatch from another view must not panic.
        ctx.dispatch().unwrap();
        assert_eq!(*seen.lock(), Some(Outcome::Abandoned));
        crate::test_complete!("awaiter_gets_abandoned_when_finally_unwound_with_value");
    }

    #[test]
    fn handler_may_reenter_its_context() {
        init_test("handler_may_reenter_its_context");
        let ctx = ctx();
        let inner = ctx.clone();
        ctx.push_step(Box::new(
            move |acc: &(dyn Any + Send)| -> Result<Option<Accumulator>, &'static str> {
                // Would deadlock if the lock were held while handlers run.
                assert_eq!(inner.status(), Status::Resolved);
                inner.cancel(CancelReason::default());
                Ok(Some(Box::new(*acc.downcast_ref::<u32>().unwrap_or(&0))))
            },
        ));
        ctx.succeed(3).unwrap();
        assert_eq!(ctx.status(), Status::Resolved);
        crate::test_complete!("handler_may_reenter_its_context");
    }

    #[test]
    fn unhandled_policy_log_drops_failure() {
        init_test("unhandled_policy_log_drops_failure");
        let ctx: Ctx = SettlementContext::new(
            None,
            OperationConfig::default().with_unhandled(UnhandledPolicy::Log),
        );
        ctx.succeed(1).unwrap();
        ctx.push_step(failing_step("late"));
        assert_eq!(ctx.status(), Status::Resolved);
        crate::test_complete!("unhandled_policy_log_drops_failure");
    }

    #[test]
    #[should_panic(expected = "handler failed with no catch registered")]
    fn unhandled_policy_panic_unwinds_registration() {
        init_test_logging();
        let ctx = ctx();
        ctx.succeed(1).unwrap();
        ctx.push_step(failing_step("late"));
    }
}
