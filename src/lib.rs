//! A deferred-task scheduling group.
//!
//! A [`Group`] holds a deadline-ordered queue of task bodies and dispatches
//! each one concurrently once its deadline arrives. A single monitor task
//! per group sleeps exactly until the next deadline, waking early whenever
//! a sooner task is scheduled or the group's cancellation fires. Callers
//! use [`Group::wait`] to block until every scheduled task has run, the
//! caller-supplied [`CancellationToken`](cancellation::CancellationToken)
//! fires, or both.
//!
//! # Example
//!
//! ```
//! use deadline_group::{CancellationToken, Group};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let group = Group::new(CancellationToken::new());
//!
//!     group
//!         .delay(Duration::from_millis(10), || println!("first"))
//!         .unwrap();
//!     group
//!         .delay(Duration::from_millis(5), || println!("second, but fires first"))
//!         .unwrap();
//!
//!     group.wait().await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod cancellation;
pub mod error;
pub mod group;
pub mod heap;
pub mod logging;

pub use cancellation::CancellationToken;
pub use error::{CancelReason, GroupError, Result};
pub use group::{Group, GroupBuilder, GroupConfig};
