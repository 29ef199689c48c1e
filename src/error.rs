//! Error types for the deadline group.

use std::fmt;
use std::sync::Arc;

/// The reason a [`CancellationToken`](crate::cancellation::CancellationToken) was fired.
///
/// Carried by [`GroupError::Cancelled`] as the cancellation's underlying
/// reason. Cloneable so every waiter observes the same value.
#[derive(Debug, Clone)]
pub struct CancelReason(Arc<str>);

impl CancelReason {
    /// Build a reason from anything displayable.
    pub fn new(reason: impl fmt::Display) -> Self {
        Self(reason.to_string().into())
    }
}

impl Default for CancelReason {
    fn default() -> Self {
        Self::new("cancelled")
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CancelReason {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for CancelReason {
    fn from(value: String) -> Self {
        Self(value.into())
    }
}

/// The error type returned by [`Group::wait`](crate::group::Group::wait).
#[derive(Debug, Clone)]
pub enum GroupError {
    /// The group's cancellation token fired before every scheduled task
    /// finished draining.
    Cancelled(CancelReason),
    /// `schedule`/`delay` was called after `wait` had already been entered.
    ///
    /// This is a programmer contract violation: no recovery is expected,
    /// and callers should treat it as a bug to fix rather than a condition
    /// to branch on.
    AfterWait,
}

impl fmt::Display for GroupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled(reason) => write!(f, "group cancelled: {reason}"),
            Self::AfterWait => {
                write!(f, "schedule() called after wait() was already entered")
            }
        }
    }
}

impl std::error::Error for GroupError {}

/// A specialized `Result` for deadline-group operations.
pub type Result<T> = std::result::Result<T, GroupError>;
