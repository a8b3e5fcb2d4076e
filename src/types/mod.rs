//! Core value types shared by operations, settlers and futures.
//!
//! - [`status`]: settlement status (`Pending`, `Resolved`, `Rejected`, `Cancelled`)
//! - [`outcome`]: terminal outcome delivered to the awaiting side
//! - [`cancel`]: cancellation reason and kind (the cancellation marker)

pub mod cancel;
pub mod outcome;
pub mod status;

pub use cancel::{CancelKind, CancelReason};
pub use outcome::Outcome;
pub use status::Status;
