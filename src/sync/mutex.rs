// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::op::OpRef;
use crate::park::RawMutex;
use crate::queue::Queue;
use crate::util::element_name;
use static_assertions::assert_impl_all;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::thread;

/// Scheduler-aware mutual exclusion.
///
/// Unlike a host mutex, blocking on this lock returns the operation's seat to
/// the scheduler so a ready operation can run in its place. Unlocking hands
/// the mutex directly to the longest-waiting operation: the successor is
/// chosen and woken without re-contending with fresh callers, which keeps
/// acquisition order FIFO and avoids the thundering herd.
#[derive(Clone)]
pub struct Mutex {
    inner: Arc<MutexInner>,
}

assert_impl_all!(Mutex: Send, Sync);

pub(crate) struct MutexInner {
    /// Host lock guarding `state`. Held *across* a hand-off: the unlocking
    /// thread keeps it and the woken operation releases it once it has
    /// claimed the mutex, so no fresh caller can slip in between.
    lock: RawMutex,
    /// Guarded by `lock`.
    state: UnsafeCell<MutexState>,
    waiting: Arc<Queue>,
}

// Safety: `state` is only ever accessed while `lock` is held (or conceptually
// handed off, which transfers exclusive access along with it).
unsafe impl Send for MutexInner {}
// Safety: see above.
unsafe impl Sync for MutexInner {}

struct MutexState {
    locked: bool,
    holder: Option<OpRef>,
}

impl MutexInner {
    pub(crate) fn new(kind: &str, name: Option<&str>) -> Self {
        Self {
            lock: RawMutex::new(),
            state: UnsafeCell::new(MutexState {
                locked: false,
                holder: None,
            }),
            waiting: Queue::new(element_name(kind, name)),
        }
    }

    /// # Safety
    ///
    /// The caller must hold `lock` (or have had it handed off to it).
    unsafe fn with_state<T>(&self, f: impl FnOnce(&mut MutexState) -> T) -> T {
        // Safety: the caller holds `lock`, which serializes all access.
        f(unsafe { &mut *self.state.get() })
    }

    pub(crate) fn name(&self) -> &str {
        self.waiting.name()
    }

    /// Acquires the mutex as `op`, blocking through the scheduler while it
    /// is held by someone else.
    pub(crate) fn lock_as(&self, op: &OpRef) {
        self.lock.lock();
        loop {
            // a hand-off leaves `locked` set with no holder; only the woken
            // head of the wait queue can observe that state, because the
            // unlocker kept the inner lock for it
            // Safety: `lock` is held at the top of every iteration.
            let held = unsafe { self.with_state(|state| state.locked && state.holder.is_some()) };
            if !held {
                break;
            }
            op.block(Some(&self.waiting), Some(&|| self.lock.unlock()));
            // resumed: the inner lock was handed back to us along with the
            // wake-up, so the next iteration may inspect the state again
        }
        // Safety: `lock` is held.
        unsafe {
            self.with_state(|state| {
                state.locked = true;
                state.holder = Some(op.clone());
            });
        }
        self.lock.unlock();
    }

    /// Returns the current holder. Caller must hold `lock`.
    pub(crate) fn holder(&self) -> Option<OpRef> {
        // Safety: contract of this function.
        unsafe { self.with_state(|state| state.holder.clone()) }
    }

    /// Restores `holder` after a monitor wait. Caller must hold `lock`.
    pub(crate) fn set_holder(&self, holder: OpRef) {
        // Safety: contract of this function.
        unsafe {
            self.with_state(|state| state.holder = Some(holder));
        }
    }

    pub(crate) fn raw_lock(&self) {
        self.lock.lock();
    }

    pub(crate) fn raw_unlock(&self) {
        self.lock.unlock();
    }

    /// Releases the mutex. Caller holds `lock`.
    ///
    /// With waiters, the head is woken on a separate thread and the mutex is
    /// handed to it: `locked` stays set and `lock` stays held until the woken
    /// operation has claimed ownership. Without waiters both are released.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is not locked; that is a programming error and the
    /// internal invariants cannot be trusted afterwards.
    pub(crate) fn unlock_locked(&self) {
        // Safety: caller holds `lock`.
        unsafe {
            self.with_state(|state| {
                assert!(state.locked, "unlocking unlocked mutex");
                state.holder = None;
            });
        }

        if let Some(next) = self.waiting.next() {
            tracing::trace!(mutex = self.name(), to = %next.name(), "hand-off");
            // wake on a separate thread; `lock` is intentionally not released
            thread::spawn(move || next.unblock());
        } else {
            // Safety: caller holds `lock`.
            unsafe {
                self.with_state(|state| state.locked = false);
            }
            self.lock.unlock();
        }
    }
}

impl Mutex {
    /// Creates an unnamed mutex.
    #[must_use]
    pub fn new() -> Self {
        Self::with_kind("mutex", None)
    }

    /// Creates a mutex carrying `name` for diagnostics.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::with_kind("mutex", Some(name))
    }

    pub(crate) fn with_kind(kind: &str, name: Option<&str>) -> Self {
        Self {
            inner: Arc::new(MutexInner::new(kind, name)),
        }
    }

    pub(crate) fn inner(&self) -> &MutexInner {
        &self.inner
    }

    /// Acquires the mutex as `op`.
    ///
    /// While the mutex is held by another operation, `op` is parked on the
    /// wait queue and its seat goes back to the scheduler.
    pub fn lock(&self, op: &OpRef) {
        self.inner.lock_as(op);
    }

    /// Releases the mutex, handing it to the longest-waiting operation if
    /// there is one.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is not locked.
    pub fn unlock(&self) {
        self.inner.lock.lock();
        self.inner.unlock_locked();
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("name", &self.inner.name())
            .finish_non_exhaustive()
    }
}
