// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::op::OpRef;
use crate::queue::Queue;
use crate::sync::Mutex;
use crate::util::element_name;
use std::fmt;
use std::sync::Arc;

/// A condition operations can wait on inside a [`Monitor`].
///
/// A condition owns nothing but its wait queue; it belongs to a monitor by
/// convention only: the monitor passes itself when parking and waking.
#[derive(Clone)]
pub struct Condition {
    waiting: Arc<Queue>,
}

impl Condition {
    #[must_use]
    pub fn new() -> Self {
        Self::named_impl(None)
    }

    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::named_impl(Some(name))
    }

    fn named_impl(name: Option<&str>) -> Self {
        Self {
            waiting: Queue::new(element_name("condition", name)),
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("name", &self.waiting.name())
            .field("waiting", &self.waiting.len())
            .finish()
    }
}

/// A [`Mutex`] with condition variables: in-monitor wait and notify with
/// monitor hand-off.
///
/// `notify` uses signal-and-continue semantics with a twist: the signalled
/// waiter inherits the monitor *before* the notifier resumes its own critical
/// section, and the notifier re-queues for the monitor behind it. The woken
/// waiter therefore never re-contends and cannot observe state invalidated by
/// another acquirer.
///
/// Both [`wait`](Self::wait) and [`notify`](Self::notify) require the caller
/// to hold the monitor; violating that is a programming error and fatal.
#[derive(Clone)]
pub struct Monitor {
    mutex: Mutex,
}

impl Monitor {
    #[must_use]
    pub fn new() -> Self {
        Self::with_kind("monitor", None)
    }

    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::with_kind("monitor", Some(name))
    }

    pub(crate) fn with_kind(kind: &str, name: Option<&str>) -> Self {
        Self {
            mutex: Mutex::with_kind(kind, name),
        }
    }

    /// Enters the monitor as `op`.
    pub fn lock(&self, op: &OpRef) {
        self.mutex.lock(op);
    }

    /// Leaves the monitor.
    ///
    /// # Panics
    ///
    /// Panics if the monitor is not held.
    pub fn unlock(&self) {
        self.mutex.unlock();
    }

    /// Releases the monitor and parks the holder on `cond` in one step; on
    /// return the monitor is held again, handed over by the notifier.
    ///
    /// # Panics
    ///
    /// Panics if the monitor is not held.
    pub fn wait(&self, cond: &Condition) {
        let inner = self.mutex.inner();
        inner.raw_lock();
        let Some(holder) = inner.holder() else {
            inner.raw_unlock();
            panic!("wait executed outside monitor");
        };

        // enqueue on the condition, then surrender the monitor through the
        // release hook; the notifier hands the monitor back together with the
        // wake-up
        holder.block(Some(cond.queue()), Some(&|| inner.unlock_locked()));

        // restore the holder the notifier left untouched
        inner.raw_lock();
        inner.set_holder(holder);
        inner.raw_unlock();
    }

    /// Wakes the longest-waiting operation on `cond`, handing it the monitor,
    /// then re-acquires the monitor before returning so the notifier still
    /// holds it. No-op when nobody waits.
    ///
    /// # Panics
    ///
    /// Panics if the monitor is not held.
    pub fn notify(&self, cond: &Condition) {
        let inner = self.mutex.inner();
        inner.raw_lock();
        let Some(holder) = inner.holder() else {
            inner.raw_unlock();
            panic!("notify executed outside monitor");
        };

        if let Some(next) = cond.queue().next() {
            tracing::trace!(monitor = inner.name(), to = %next.name(), "notify hand-off");
            inner.raw_unlock();
            // the monitor passes to the woken waiter; re-queue behind it
            next.unblock();
            self.mutex.lock(&holder);
        } else {
            inner.raw_unlock();
        }
    }
}

impl Condition {
    pub(crate) fn queue(&self) -> &Arc<Queue> {
        &self.waiting
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("name", &self.mutex.inner().name())
            .finish_non_exhaustive()
    }
}
