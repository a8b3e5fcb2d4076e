//! Settlement status of an operation.

use core::fmt;

/// Where an operation is in its lifecycle.
///
/// `Pending` is the only initial state. `Resolved` and `Rejected` are reached
/// by settlement, exactly one of them per operation. `Cancelled` is forced by
/// `cancel` and changes how a later settlement attempt is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    /// Not settled yet.
    #[default]
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with a domain failure.
    Rejected,
    /// Cancelled by a consumer.
    Cancelled,
}

impl Status {
    /// Returns true for `Resolved` and `Rejected`.
    #[must_use]
    pub const fn is_settled(self) -> bool {
        matches!(self, Self::Resolved | Self::Rejected)
    }

    /// Returns true if this status is `Pending`.
    #[must_use]
    pub const fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns true if this status is `Cancelled`.
    #[must_use]
    pub const fn is_cancelled(self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns a stable lowercase name, used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
