// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The scheduler state machine.
//!
//! A [`Scheduler`] multiplexes an unbounded number of logical operations onto
//! a bounded number of concurrently *running* workers. Every operation gets a
//! dedicated host thread for its lifetime; the scheduler controls how many of
//! those threads make progress at once by opening and closing per-operation
//! gates. Three queues track the population: `running` (holds a seat),
//! `ready` (runnable, waiting for a seat) and `blocked` (parked on a
//! primitive without a dedicated wait queue).
//!
//! Lock ordering: the scheduler lock is taken alone by the transitions below;
//! [`block`](Scheduler::block) additionally *releases* a primitive's inner
//! lock through the caller-supplied release function. The operation's own
//! lock nests inside the scheduler lock, and queue locks are leaves.

use crate::op::{OpRef, OperationFn};
use crate::queue::Queue;
use crate::util::element_name;
use parking_lot::Mutex;
use static_assertions::assert_impl_all;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Schedules the execution of operations, bounding the number that run in
/// parallel.
///
/// Any number of operations may be in flight; at most `parallelism` of them
/// are running at any instant. The bound is enforced cooperatively: the
/// scheduler-aware primitives in [`sync`](crate::sync) return an operation's
/// seat whenever it blocks, and re-enter it into the scheduling discipline
/// when it unblocks.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<Core>,
}

assert_impl_all!(Scheduler: Send, Sync);

struct Core {
    parallelism: usize,
    shared: Mutex<Shared>,
    running: Arc<Queue>,
    ready: Arc<Queue>,
    blocked: Arc<Queue>,
}

struct Shared {
    /// Number of workers currently holding a seat. `active == running.len()`
    /// at every steady state.
    active: usize,
    /// Number of operations blocked on the global queue or any primitive
    /// wait queue.
    bcnt: usize,
}

impl Scheduler {
    /// Creates a scheduler that lets at most `parallelism` operations run
    /// concurrently.
    ///
    /// # Panics
    ///
    /// Panics if `parallelism` is zero.
    #[must_use]
    pub fn new(parallelism: usize) -> Self {
        assert!(parallelism > 0, "parallelism must be positive");
        Self {
            core: Arc::new(Core {
                parallelism,
                shared: Mutex::new(Shared { active: 0, bcnt: 0 }),
                running: Queue::new("running"),
                ready: Queue::new("ready"),
                blocked: Queue::new("blocked"),
            }),
        }
    }

    #[must_use]
    pub fn parallelism(&self) -> usize {
        self.core.parallelism
    }

    /// Number of operations that are neither finished nor blocked, i.e.
    /// running or ready.
    #[must_use]
    pub fn active_count(&self) -> usize {
        let _shared = self.core.shared.lock();
        self.core.running.len() + self.core.ready.len()
    }

    #[must_use]
    pub fn running_count(&self) -> usize {
        let _shared = self.core.shared.lock();
        self.core.running.len()
    }

    #[must_use]
    pub fn ready_count(&self) -> usize {
        let _shared = self.core.shared.lock();
        self.core.ready.len()
    }

    /// Number of blocked operations, on the global blocked queue or any
    /// primitive wait queue.
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.core.shared.lock().bcnt
    }

    /// Number of operations blocked on a primitive wait queue (as opposed to
    /// the global blocked queue).
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        let shared = self.core.shared.lock();
        shared.bcnt - self.core.blocked.len()
    }

    /// Constructs a fresh operation control block. The operation is not
    /// enqueued anywhere until [`start`](Self::start).
    pub(crate) fn new_operation(&self, kind: &str, name: Option<&str>) -> OpRef {
        OpRef::new(self.clone(), element_name(kind, name))
    }

    /// Admits `op` and spawns its worker thread.
    ///
    /// If a seat is free the operation goes straight to `running`; otherwise
    /// it is parked in `ready` with its gate closed. The worker acquires the
    /// gate before invoking `f`, so a parked operation costs nothing but its
    /// thread.
    pub(crate) fn start(&self, op: &OpRef, f: OperationFn) {
        let mut shared = self.core.shared.lock();
        if shared.active < self.core.parallelism {
            shared.active += 1;
            op.add_to_queue(Some(&self.core.running), false);
            tracing::trace!(op = %op.name(), "admitted to running");
        } else {
            op.close_gate();
            op.add_to_queue(Some(&self.core.ready), false);
            tracing::trace!(op = %op.name(), "parked in ready");
        }
        drop(shared);

        let scheduler = self.clone();
        let op = op.clone();
        thread::spawn(move || {
            let span = tracing::debug_span!("op", name = %op.name());
            let _entered = span.enter();

            op.close_gate();
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(&op)));
            // fire the completion trigger even when `f` panicked, so that
            // waiters on this operation are not stranded
            scheduler.done(&op);
            if let Err(payload) = result {
                tracing::error!(op = %op.name(), "operation function panicked");
                panic::resume_unwind(payload);
            }
        });
    }

    /// Retires `op`: its seat is handed to a ready operation or returned to
    /// the pool, then the completion trigger fires (outside the scheduler
    /// lock).
    pub(crate) fn done(&self, op: &OpRef) {
        let mut shared = self.core.shared.lock();
        self.core.running.remove(op);
        self.schedule(&mut shared);
        drop(shared);

        tracing::trace!(op = %op.name(), "done");
        op.done_trigger().trigger();
    }

    /// Promotes the longest-waiting ready operation into the freed seat, or
    /// returns the seat to the pool. Caller holds the scheduler lock.
    fn schedule(&self, shared: &mut Shared) {
        if let Some(next) = self.core.ready.next() {
            next.add_to_queue(Some(&self.core.running), false);
            next.open_gate();
            tracing::trace!(op = %next.name(), "promoted from ready");
        } else {
            shared.active -= 1;
        }
    }

    /// Blocks `op` on `queue` (the global blocked queue if none).
    ///
    /// The operation is enqueued *before* `release` runs: any thread that
    /// acquires the lock surrendered by `release` and wakes the head of
    /// `queue` is guaranteed to find this operation there. The caller's
    /// thread parks on the gate after the scheduler lock is dropped.
    pub(crate) fn block(&self, op: &OpRef, queue: Option<&Arc<Queue>>, release: Option<&dyn Fn()>) {
        let mut shared = self.core.shared.lock();
        let queue = queue.unwrap_or(&self.core.blocked);
        op.add_to_queue(Some(queue), true);
        if let Some(release) = release {
            release();
        }
        shared.bcnt += 1;
        tracing::trace!(op = %op.name(), queue = queue.name(), "blocked");
        self.schedule(&mut shared);
        drop(shared);

        op.close_gate();
    }

    /// Makes `op` runnable again: `running` if a seat is free, `ready`
    /// otherwise.
    pub(crate) fn unblock(&self, op: &OpRef) {
        let mut shared = self.core.shared.lock();
        shared.bcnt -= 1;
        if shared.active < self.core.parallelism {
            shared.active += 1;
            op.add_to_queue(Some(&self.core.running), false);
            op.open_gate();
            tracing::trace!(op = %op.name(), "unblocked to running");
        } else {
            op.add_to_queue(Some(&self.core.ready), false);
            tracing::trace!(op = %op.name(), "unblocked to ready");
        }
    }

    /// Swaps `op` with the head of `ready`, if any: the head takes the seat
    /// and `op` parks at the tail of `ready`. No-op when nothing is ready.
    pub(crate) fn preempt(&self, op: &OpRef) {
        let shared = self.core.shared.lock();
        if let Some(next) = self.core.ready.next() {
            op.add_to_queue(Some(&self.core.ready), false);
            next.add_to_queue(Some(&self.core.running), false);
            next.open_gate();
            tracing::trace!(op = %op.name(), next = %next.name(), "preempted");
            drop(shared);

            op.close_gate();
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.core.shared.lock();
        f.debug_struct("Scheduler")
            .field("parallelism", &self.core.parallelism)
            .field("active", &shared.active)
            .field("blocked", &shared.bcnt)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Execution;
    use crate::sync::Trigger;
    use crate::test_util::{init_tracing, settle, wait_done};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    #[should_panic(expected = "parallelism must be positive")]
    fn zero_parallelism_rejected() {
        let _ = Scheduler::new(0);
    }

    #[test]
    fn running_never_exceeds_parallelism() {
        init_tracing();
        let scheduler = Scheduler::new(2);
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let executions: Vec<_> = (0..6)
            .map(|i| {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                Execution::named(&scheduler, &format!("probe-{i}"), move |_op| {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(50));
                    current.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for execution in &executions {
            execution.start();
        }

        wait_done(&executions.iter().collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.blocked_count(), 0);
    }

    #[test]
    fn blocked_operations_release_their_seats() {
        init_tracing();
        let scheduler = Scheduler::new(2);
        let hold = Trigger::armed(None, &[]);

        let executions: Vec<_> = (0..3)
            .map(|i| {
                let hold = hold.clone();
                Execution::named(&scheduler, &format!("holder-{i}"), move |op| {
                    hold.wait(Some(op));
                })
            })
            .collect();
        for execution in &executions {
            execution.start();
        }
        settle();

        // all three blocked on the trigger's wait queue
        assert_eq!(scheduler.running_count(), 0);
        assert_eq!(scheduler.ready_count(), 0);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.blocked_count(), 3);
        assert_eq!(scheduler.waiting_count(), 3);

        hold.trigger();
        wait_done(&executions.iter().collect::<Vec<_>>());
        assert_eq!(scheduler.blocked_count(), 0);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[test]
    fn over_cap_admission_parks_in_ready() {
        init_tracing();
        let scheduler = Scheduler::new(1);
        let hold = Trigger::armed(None, &[]);
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Execution::named(&scheduler, "first", {
            let hold = hold.clone();
            let order = Arc::clone(&order);
            move |op| {
                order.lock().push("first:enter");
                hold.wait(Some(op));
                order.lock().push("first:exit");
            }
        });
        let second = Execution::named(&scheduler, "second", {
            let order = Arc::clone(&order);
            move |_op| order.lock().push("second:run")
        });

        first.start();
        settle();
        // first has blocked on the trigger and surrendered the only seat
        assert_eq!(scheduler.running_count(), 0);
        assert_eq!(scheduler.blocked_count(), 1);

        second.start();
        wait_done(&[&second]);
        assert!(!first.is_done());

        hold.trigger();
        wait_done(&[&first, &second]);
        let order = order.lock();
        assert_eq!(order[0], "first:enter");
        assert!(order.contains(&"second:run"));
        assert!(order.contains(&"first:exit"));
    }

    #[test]
    fn preempt_yields_to_ready_head() {
        init_tracing();
        let scheduler = Scheduler::new(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        let yielder = Execution::named(&scheduler, "yielder", {
            let order = Arc::clone(&order);
            move |op| {
                order.lock().push("yielder:before");
                // give the other operation time to land in ready
                thread::sleep(Duration::from_millis(200));
                op.preempt();
                order.lock().push("yielder:after");
            }
        });
        let other = Execution::named(&scheduler, "other", {
            let order = Arc::clone(&order);
            move |_op| order.lock().push("other:run")
        });

        yielder.start();
        other.start();
        wait_done(&[&yielder, &other]);

        assert_eq!(
            order.lock().as_slice(),
            ["yielder:before", "other:run", "yielder:after"]
        );
    }

    #[test]
    fn panicking_operation_completes_and_releases_waiters() {
        init_tracing();
        let scheduler = Scheduler::new(2);

        let panicking = Execution::named(&scheduler, "panicking", |_op| panic!("worker exploded"));
        let waiter = Execution::named(&scheduler, "waiter", {
            let panicking = panicking.clone();
            move |op| panicking.wait(Some(op))
        });

        waiter.start();
        panicking.start();

        // bounded poll: a stranded waiter fails the test instead of hanging
        wait_done(&[&panicking, &waiter]);
        assert!(panicking.is_done());
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.blocked_count(), 0);

        // host-thread waits observe the completion as well
        panicking.wait(None);
    }

    #[test]
    fn preempt_without_ready_is_noop() {
        init_tracing();
        let scheduler = Scheduler::new(2);
        let execution = Execution::new(&scheduler, |op| op.preempt());
        execution.start();
        wait_done(&[&execution]);
    }
}
