// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::park::Gate;
use crate::queue::Queue;
use crate::scheduler::Scheduler;
use crate::sync::Trigger;
use parking_lot::Mutex;
use static_assertions::assert_impl_all;
use std::fmt;
use std::sync::Arc;

/// The function executed by an operation's worker thread.
///
/// It receives the handle of the operation it runs as, which it uses to
/// block on the scheduler-aware primitives. The handle must only be used by
/// the worker thread it was handed to.
pub type OperationFn = Box<dyn FnOnce(&OpRef) + Send + 'static>;

/// Handle to a scheduled operation's control block.
///
/// Cheap to clone; two handles compare equal iff they refer to the same
/// operation. The control block carries the operation between the scheduler
/// queues, owns the [`Gate`] that parks and resumes its worker thread, and
/// fires a completion trigger exactly once when the operation function
/// returns or the operation is skipped.
#[derive(Clone)]
pub struct OpRef {
    state: Arc<OpState>,
}

assert_impl_all!(OpRef: Send, Sync);

struct OpState {
    name: String,
    scheduler: Scheduler,
    gate: Gate,
    done: Trigger,
    shared: Mutex<OpShared>,
}

struct OpShared {
    /// True iff the worker thread is (or is about to be) parked on the gate.
    blocked: bool,
    /// The one queue this operation is currently a member of.
    queue: Option<Arc<Queue>>,
}

impl OpRef {
    pub(crate) fn new(scheduler: Scheduler, name: String) -> Self {
        Self {
            state: Arc::new(OpState {
                name,
                scheduler,
                gate: Gate::new(),
                done: Trigger::armed(None, &[]),
                shared: Mutex::new(OpShared {
                    blocked: false,
                    queue: None,
                }),
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.state.name
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.state.scheduler
    }

    /// Whether the operation's completion trigger has fired.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state.done.is_triggered()
    }

    /// Whether the operation is parked on a wait queue.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.state.shared.lock().blocked
    }

    /// Blocks this operation on `queue` (or the scheduler's global blocked
    /// queue if none), yielding its seat to a ready operation.
    ///
    /// `release` is invoked while the scheduler holds its own lock, after the
    /// operation has been enqueued but before the worker parks. Primitives
    /// use it to surrender their inner lock only once the operation is
    /// reachable from the wait queue, which closes the lost-wakeup window.
    pub fn block(&self, queue: Option<&Arc<Queue>>, release: Option<&dyn Fn()>) {
        self.state.scheduler.block(self, queue, release);
    }

    /// Makes this blocked operation runnable again: it is promoted straight
    /// to `running` if a seat is free, to `ready` otherwise.
    pub fn unblock(&self) {
        self.state.scheduler.unblock(self);
    }

    /// Yields the seat to the longest-waiting ready operation, if any,
    /// parking the caller in `ready`. No-op when nothing is ready.
    pub fn preempt(&self) {
        self.state.scheduler.preempt(self);
    }

    /// Fires the completion trigger without the operation function having
    /// run.
    pub(crate) fn skip(&self) {
        self.state.done.trigger();
    }

    pub(crate) fn done_trigger(&self) -> &Trigger {
        &self.state.done
    }

    pub(crate) fn close_gate(&self) {
        self.state.gate.close();
    }

    pub(crate) fn open_gate(&self) {
        self.state.gate.open();
    }

    /// Moves the operation to `queue` (removing it from any previous queue)
    /// and records the blocked flag.
    pub(crate) fn add_to_queue(&self, queue: Option<&Arc<Queue>>, blocked: bool) {
        let mut shared = self.state.shared.lock();
        shared.blocked = blocked;

        let unchanged = match (&shared.queue, queue) {
            (Some(current), Some(new)) => Arc::ptr_eq(current, new),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        if let Some(old) = shared.queue.take() {
            old.remove(self);
        }
        if let Some(queue) = queue {
            shared.queue = Some(Arc::clone(queue));
            queue.add(self.clone());
        }
    }

    /// Clears the back-pointer iff it still points at `queue`.
    pub(crate) fn removed_from_queue(&self, queue: &Arc<Queue>) {
        let mut shared = self.state.shared.lock();
        if shared
            .queue
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, queue))
        {
            shared.queue = None;
        }
    }
}

impl PartialEq for OpRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Eq for OpRef {}

impl fmt::Debug for OpRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpRef")
            .field("name", &self.state.name)
            .finish_non_exhaustive()
    }
}
