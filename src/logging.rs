//! Tracing targets for the deadline group.
//!
//! Plain constants rather than a logging abstraction of our own, so a
//! consumer installs whatever `tracing` subscriber they like and filters by
//! these names.
//!
//! ```ignore
//! tracing_subscriber::fmt::init();
//! ```

/// Target names for log filtering with `tracing` directives.
pub mod targets {
    /// The monitor loop: deadline waits and the three-way select.
    pub const MONITOR: &str = "deadline_group::monitor";
    /// Task dispatch: a task body starting or finishing.
    pub const DISPATCH: &str = "deadline_group::dispatch";
    /// `Group::wait` itself: draining and cancellation observation.
    pub const WAIT: &str = "deadline_group::wait";
}
