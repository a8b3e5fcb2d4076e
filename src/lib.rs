//! Settle: a typed, single-settlement, cancellable operation primitive.
//!
//! # Overview
//!
//! An [`Operation<T, E>`](Operation) is one asynchronous computation that
//! settles exactly once, with a success value `T` or a failure `E`. A consumer
//! may cancel it, which reroutes whatever the producer eventually delivers.
//! Consumers attach handlers through a fluent API whose type narrows after
//! each registration, or `.await` the operation directly.
//!
//! ```
//! use settle::Operation;
//!
//! let op = Operation::<Vec<u32>, String>::new(|settler| {
//!     let _ = settler.succeed((0..100).collect());
//! });
//!
//! op.catch(|e| format!("lookup failed: {e}"))
//!     .ok(|all| Ok(all.iter().filter(|n| *n % 2 == 0).count()))
//!     .then(|evens| Ok(*evens * 2))
//!     .finally(|total, err| {
//!         assert_eq!(total, Some(&100));
//!         assert!(err.is_none());
//!     });
//! ```
//!
//! # Core Guarantees
//!
//! - **Single settlement**: the [`Settler`] is consumed by `succeed` or `fail`
//! - **Order independence**: a handler registered after settlement runs inside
//!   the registration call with the same arguments it would have seen before
//! - **Cooperative cancellation**: `cancel` never aborts the producer and never
//!   runs a handler; it only changes how the eventual settlement is delivered
//! - **No lock across handlers**: handlers may re-enter their own operation
//!
//! # Module Structure
//!
//! - [`operation`]: the handle, its type-state, the builder and `Canceller`
//! - [`settler`]: the settling half handed to the starter
//! - [`future`]: the `IntoFuture` integration and the `Settled` future
//! - [`types`]: status, outcome and cancellation reason
//! - [`error`]: rejection, unhandled-failure and configuration errors
//! - [`config`]: per-operation policies with environment and file overrides
//! - [`tracing_compat`]: structured logging that compiles away without the
//!   `tracing-integration` feature

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::type_complexity)]

pub mod config;
mod context;
pub mod error;
pub mod future;
pub mod operation;
pub mod settler;
pub mod tracing_compat;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::{LateCancel, OperationConfig, UnhandledPolicy};
pub use error::{ConfigError, Rejection, Unhandled};
pub use future::Settled;
pub use operation::{Canceller, Caps, Fresh, Open, Operation, OperationBuilder, Taken};
pub use settler::Settler;
pub use types::{CancelKind, CancelReason, Outcome, Status};
