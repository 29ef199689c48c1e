//! The deferred-task scheduling group.
//!
//! This module wires together the [`TaskHeap`](crate::heap::TaskHeap), a
//! [`CancellationToken`](crate::cancellation::CancellationToken) pair
//! (outer and derived), and two coordination signals (a `tokio::sync::Notify`
//! for "something was added" and a `tokio::sync::watch` channel for "this
//! many tasks remain") into the monitor loop and public surface below.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};

use crate::cancellation::CancellationToken;
use crate::error::{GroupError, Result};
use crate::heap::{Task, TaskBody, TaskHeap};
use crate::logging::targets;

/// The four observable states a group progresses through.
///
/// Kept for introspection and tests; the public surface never exposes it
/// directly, since no public operation requires a caller to observe it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Running,
    Draining,
    Cancelled,
    Finished,
}

/// Configuration for a [`Group`], following the `WorkerConfig`/`WorkerBuilder`
/// pattern used elsewhere in this codebase for small, optional tuning knobs.
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// A human-readable label attached to this group's tracing spans and
    /// events, useful when a process runs more than one `Group`.
    pub label: String,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            label: "deadline-group".to_string(),
        }
    }
}

/// Builder for [`Group`].
#[derive(Debug, Default)]
pub struct GroupBuilder {
    config: GroupConfig,
}

impl GroupBuilder {
    /// Start building with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tracing label.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.config.label = label.into();
        self
    }

    /// Construct the group, deriving its internal cancellation from
    /// `cancellation` and starting the monitor.
    pub fn build(self, cancellation: CancellationToken) -> Group {
        Group::with_config(cancellation, self.config)
    }
}

/// A counter of "things that must finish before `wait` can return": the
/// monitor itself (one slot, released on exit) plus every dispatched task
/// body (one slot each, released on completion).
struct WaitCounter {
    count: AtomicUsize,
    notify: Notify,
}

impl WaitCounter {
    fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
            notify: Notify::new(),
        }
    }

    fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn decrement(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }

    fn value(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    async fn zero(&self) {
        loop {
            if self.value() == 0 {
                return;
            }
            let notified = self.notify.notified();
            if self.value() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct GroupState {
    heap: TaskHeap,
    entered_wait: bool,
    phase: Phase,
}

struct Inner {
    state: Mutex<GroupState>,
    outer: CancellationToken,
    derived: CancellationToken,
    added: Notify,
    remaining_tx: watch::Sender<usize>,
    wait_counter: WaitCounter,
    label: String,
}

/// A deferred-task scheduling group.
///
/// Accepts work items annotated with a future deadline, dispatches each
/// concurrently at or after its deadline, and lets a caller block until
/// either every scheduled item has completed or the group's cancellation
/// fires. See the crate root for the full contract.
///
/// # Example
///
/// ```
/// use deadline_group::cancellation::CancellationToken;
/// use deadline_group::group::Group;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let group = Group::new(CancellationToken::new());
///
///     group.delay(Duration::from_millis(1), || println!("fired")).unwrap();
///
///     group.wait().await.unwrap();
/// }
/// ```
#[derive(Clone)]
pub struct Group {
    inner: Arc<Inner>,
}

impl Group {
    /// Construct a group whose monitor stops (and whose `wait` returns an
    /// error) once `cancellation` fires.
    pub fn new(cancellation: CancellationToken) -> Self {
        Self::with_config(cancellation, GroupConfig::default())
    }

    /// Construct a group with explicit [`GroupConfig`].
    pub fn with_config(cancellation: CancellationToken, config: GroupConfig) -> Self {
        let derived = cancellation.child_token();
        let (remaining_tx, _remaining_rx) = watch::channel(0usize);

        let inner = Arc::new(Inner {
            state: Mutex::new(GroupState {
                heap: TaskHeap::new(),
                entered_wait: false,
                phase: Phase::Running,
            }),
            outer: cancellation,
            derived,
            added: Notify::new(),
            remaining_tx,
            wait_counter: WaitCounter::new(1), // the monitor's own slot
            label: config.label,
        });

        tokio::spawn(run_monitor(inner.clone()));

        Self { inner }
    }

    /// Schedule `body` to run at or after `when`.
    ///
    /// A past or present `when` means "as soon as possible." Returns
    /// [`GroupError::AfterWait`] if `wait` has already been entered.
    pub fn schedule<F>(&self, when: Instant, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let heap_len = {
            let mut state = self.inner.state.lock();
            if state.entered_wait {
                return Err(GroupError::AfterWait);
            }
            state.heap.push(Task::new(when, Box::new(body) as TaskBody));
            state.heap.len()
        };

        tracing::trace!(
            target: targets::DISPATCH,
            label = %self.inner.label,
            heap_len,
            "task scheduled"
        );
        // Non-blocking, coalescing kick: if the monitor isn't parked in its
        // select right now, the permit is simply picked up on its next
        // iteration, which re-reads the heap root anyway.
        self.inner.added.notify_one();
        Ok(())
    }

    /// Schedule `body` to run after `duration`.
    ///
    /// `Duration` cannot be negative in Rust; callers wanting an
    /// already-past deadline should call [`schedule`](Self::schedule)
    /// directly with a past `Instant`.
    pub fn delay<F>(&self, duration: Duration, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(Instant::now() + duration, body)
    }

    /// Block until every scheduled task has completed, or until
    /// cancellation fires.
    ///
    /// Must be called at most once. After it returns, the group must not
    /// be used again.
    pub async fn wait(&self) -> Result<()> {
        // Check cancellation before touching the heap at all, so a group
        // whose outer token already fired never has to consult the heap.
        if self.inner.outer.is_cancelled() {
            return Err(GroupError::Cancelled(
                self.inner.outer.reason().unwrap_or_default(),
            ));
        }

        // Subscribe while still holding the state lock, so no `trigger`
        // pass (which also locks state before sending) can publish a
        // remaining count between our `is_empty` check and the subscribe.
        // Otherwise a drain-to-zero that happens in that window would be
        // invisible to `changed()` and `wait` would hang forever.
        let (already_drained, mut remaining_rx) = {
            let mut state = self.inner.state.lock();
            state.entered_wait = true;
            state.phase = Phase::Draining;
            let remaining_rx = self.inner.remaining_tx.subscribe();
            (state.heap.is_empty(), remaining_rx)
        };
        if already_drained {
            self.inner.derived.cancel("drained");
        }

        loop {
            tokio::select! {
                biased;

                () = self.inner.outer.cancelled() => {
                    self.inner.state.lock().phase = Phase::Cancelled;
                    let reason = self.inner.outer.reason().unwrap_or_default();
                    tracing::debug!(target: targets::WAIT, label = %self.inner.label, %reason, "group cancelled");
                    return Err(GroupError::Cancelled(reason));
                }

                () = self.inner.wait_counter.zero() => {
                    self.inner.state.lock().phase = Phase::Finished;
                    tracing::debug!(target: targets::WAIT, label = %self.inner.label, "group finished");
                    return Ok(());
                }

                changed = remaining_rx.changed() => {
                    if changed.is_ok() {
                        let drained = self.inner.state.lock().heap.is_empty();
                        if drained {
                            self.inner.derived.cancel("drained");
                        }
                    }
                }
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    #[cfg(test)]
    pub(crate) fn outstanding(&self) -> usize {
        self.inner.wait_counter.value()
    }
}

/// Pop and dispatch every task whose deadline has passed, then publish the
/// remaining heap length; return the next deadline, or `None` if the heap
/// is now empty. Runs under the group mutex.
fn trigger(inner: &Arc<Inner>, state: &mut GroupState, now: Instant) -> Option<Instant> {
    while matches!(state.heap.peek_deadline(), Some(deadline) if deadline <= now) {
        let task = state.heap.pop().expect("peeked deadline implies a root");
        inner.wait_counter.increment();

        let worker = inner.clone();
        let body = task.into_body();
        tokio::spawn(async move {
            tracing::debug!(target: targets::DISPATCH, label = %worker.label, "task starting");
            let _ = tokio::task::spawn_blocking(body).await;
            tracing::trace!(target: targets::DISPATCH, label = %worker.label, "task finished");
            worker.wait_counter.decrement();
        });
    }

    let next = state.heap.peek_deadline();
    // Non-blocking: `watch::Sender::send` always succeeds and simply
    // overwrites the latest value if `wait` isn't currently receiving.
    let _ = inner.remaining_tx.send(state.heap.len());
    next
}

async fn run_monitor(inner: Arc<Inner>) {
    loop {
        if inner.derived.is_cancelled() {
            break;
        }

        let next_deadline = {
            let mut state = inner.state.lock();
            trigger(&inner, &mut state, Instant::now())
        };

        match next_deadline {
            Some(deadline) => {
                tracing::trace!(target: targets::MONITOR, label = %inner.label, ?deadline, "sleeping to next deadline");
                tokio::select! {
                    () = inner.derived.cancelled() => break,
                    () = inner.added.notified() => {}
                    () = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
                }
            }
            None => {
                tracing::trace!(target: targets::MONITOR, label = %inner.label, "heap empty, waiting for added/cancellation");
                tokio::select! {
                    () = inner.derived.cancelled() => break,
                    () = inner.added.notified() => {}
                }
            }
        }
    }

    tracing::trace!(target: targets::MONITOR, label = %inner.label, "monitor exiting");
    inner.wait_counter.decrement();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[tokio::test]
    async fn empty_group_returns_success_immediately() {
        let group = Group::new(CancellationToken::new());
        tokio::time::timeout(Duration::from_millis(200), group.wait())
            .await
            .expect("wait should not block on an empty group")
            .unwrap();
    }

    #[tokio::test]
    async fn immediate_fire_runs_exactly_once() {
        let group = Group::new(CancellationToken::new());
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();

        group
            .schedule(Instant::now() - Duration::from_secs(1), move || {
                ran_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        group.wait().await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn ordered_firing() {
        let group = Group::new(CancellationToken::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        let order_a = order.clone();
        group
            .schedule(Instant::now() + Duration::from_millis(60), move || {
                order_a.lock().unwrap().push("A");
            })
            .unwrap();

        let order_b = order.clone();
        group
            .schedule(Instant::now() + Duration::from_millis(20), move || {
                order_b.lock().unwrap().push("B");
            })
            .unwrap();

        group.wait().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn late_insertion_preempts_sleep() {
        let group = Group::new(CancellationToken::new());
        let order = Arc::new(StdMutex::new(Vec::new()));

        let order_a = order.clone();
        group
            .schedule(Instant::now() + Duration::from_millis(250), move || {
                order_a.lock().unwrap().push("A");
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;

        let order_b = order.clone();
        group
            .schedule(Instant::now() + Duration::from_millis(40), move || {
                order_b.lock().unwrap().push("B");
            })
            .unwrap();

        group.wait().await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["B", "A"]);
    }

    #[tokio::test]
    async fn cancellation_mid_flight_stops_further_dispatch() {
        let token = CancellationToken::new();
        let group = Group::new(token.clone());
        let a_ran = Arc::new(AtomicUsize::new(0));
        let b_ran = Arc::new(AtomicUsize::new(0));

        let a_clone = a_ran.clone();
        group
            .schedule(Instant::now() + Duration::from_millis(20), move || {
                a_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let b_clone = b_ran.clone();
        group
            .schedule(Instant::now() + Duration::from_secs(10), move || {
                b_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let cancel_token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            cancel_token.cancel("test shutdown");
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, GroupError::Cancelled(_)));

        // Give the already-dispatched body time to finish; the still-heaped
        // one must never run.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(a_ran.load(Ordering::SeqCst), 1);
        assert_eq!(b_ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn schedule_after_wait_is_rejected() {
        let group = Group::new(CancellationToken::new());
        group.schedule(Instant::now(), || {}).unwrap();

        let group_clone = group.clone();
        let waiter = tokio::spawn(async move { group_clone.wait().await });

        // Give wait() a moment to enter the draining phase.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = group.schedule(Instant::now(), || {}).unwrap_err();
        assert!(matches!(err, GroupError::AfterWait));

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn n_scheduled_tasks_all_run_exactly_once() {
        let group = Group::new(CancellationToken::new());
        let count = Arc::new(AtomicUsize::new(0));

        for i in 0..20u64 {
            let c = count.clone();
            group
                .delay(Duration::from_millis(i % 7), move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        group.wait().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 20);
    }

    #[tokio::test]
    async fn already_cancelled_token_fails_wait_without_touching_heap() {
        let token = CancellationToken::new();
        token.cancel("down before start");
        let group = Group::new(token);

        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        // Scheduling before wait() is still allowed; the monitor checks
        // cancellation before its first trigger() pass, so it never gets to
        // dispatch this task.
        let _ = group.schedule(Instant::now(), move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });

        let err = group.wait().await.unwrap_err();
        assert!(matches!(err, GroupError::Cancelled(_)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
