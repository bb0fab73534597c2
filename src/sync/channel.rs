// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::Closed;
use crate::op::OpRef;
use crate::sync::monitor::{Condition, Monitor};
use static_assertions::assert_impl_all;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A bounded FIFO channel for communication between operations.
///
/// Sends block once the buffer holds `capacity` messages, receives block
/// while it is empty; both block through the scheduler, so a parked sender or
/// receiver frees its seat. After [`close`](Self::close), sends fail with
/// [`Closed`], receives drain the remaining messages and fail afterwards.
pub struct Channel<T> {
    inner: Arc<ChannelInner<T>>,
}

assert_impl_all!(Channel<()>: Send, Sync);

struct ChannelInner<T> {
    monitor: Monitor,
    not_full: Condition,
    not_empty: Condition,
    capacity: usize,
    /// Guarded by holding `monitor`.
    state: UnsafeCell<ChanState<T>>,
    closed: AtomicBool,
}

// Safety: `state` is only ever accessed by the operation currently holding
// `monitor`; the monitor's hand-off protocol guarantees a single holder.
unsafe impl<T: Send> Send for ChannelInner<T> {}
// Safety: see above.
unsafe impl<T: Send> Sync for ChannelInner<T> {}

struct ChanState<T> {
    buffer: Vec<Option<T>>,
    first: usize,
    size: usize,
}

impl<T> ChannelInner<T> {
    /// # Safety
    ///
    /// The caller must hold `monitor`.
    unsafe fn with_state<U>(&self, f: impl FnOnce(&mut ChanState<T>) -> U) -> U {
        // Safety: the caller holds the monitor, which serializes all access.
        f(unsafe { &mut *self.state.get() })
    }
}

impl<T: Send> Channel<T> {
    /// Creates a channel buffering up to `capacity` messages.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::named_impl(capacity, None)
    }

    /// Creates a channel carrying `name` for diagnostics.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn named(capacity: usize, name: &str) -> Self {
        Self::named_impl(capacity, Some(name))
    }

    fn named_impl(capacity: usize, name: Option<&str>) -> Self {
        assert!(capacity > 0, "capacity must be positive");
        Self {
            inner: Arc::new(ChannelInner {
                monitor: Monitor::with_kind("channel", name),
                not_full: Condition::named("send"),
                not_empty: Condition::named("receive"),
                capacity,
                state: UnsafeCell::new(ChanState {
                    buffer: (0..capacity).map(|_| None).collect(),
                    first: 0,
                    size: 0,
                }),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Sends `value`, blocking `op` while the buffer is full.
    ///
    /// # Errors
    ///
    /// Returns [`Closed`] if the channel has been closed.
    pub fn send(&self, op: &OpRef, value: T) -> Result<(), Closed> {
        let inner = &*self.inner;
        if inner.closed.load(Ordering::Acquire) {
            return Err(Closed(()));
        }

        inner.monitor.lock(op);
        loop {
            // Safety: we hold the monitor.
            let full = unsafe { inner.with_state(|state| state.size >= inner.capacity) };
            if !full {
                break;
            }
            inner.monitor.wait(&inner.not_full);
        }
        // Safety: we hold the monitor.
        unsafe {
            inner.with_state(|state| {
                let slot = (state.first + state.size) % inner.capacity;
                state.buffer[slot] = Some(value);
                state.size += 1;
            });
        }
        inner.monitor.notify(&inner.not_empty);
        inner.monitor.unlock();
        Ok(())
    }

    /// Receives the oldest message, blocking `op` while the buffer is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Closed`] once the channel is closed and drained.
    pub fn receive(&self, op: &OpRef) -> Result<T, Closed> {
        let inner = &*self.inner;
        inner.monitor.lock(op);
        loop {
            // Safety: we hold the monitor.
            let empty = unsafe { inner.with_state(|state| state.size == 0) };
            if !empty {
                break;
            }
            if inner.closed.load(Ordering::Acquire) {
                inner.monitor.unlock();
                return Err(Closed(()));
            }
            inner.monitor.wait(&inner.not_empty);
        }
        // Safety: we hold the monitor.
        let value = unsafe {
            inner.with_state(|state| {
                let value = state.buffer[state.first].take();
                state.size -= 1;
                state.first = (state.first + 1) % inner.capacity;
                value
            })
        }
        .expect("occupied ring buffer slot was empty");
        inner.monitor.notify(&inner.not_full);
        inner.monitor.unlock();
        Ok(value)
    }

    /// Closes the channel.
    ///
    /// # Errors
    ///
    /// Returns [`Closed`] if the channel was already closed.
    pub fn close(&self) -> Result<(), Closed> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            Err(Closed(()))
        } else {
            Ok(())
        }
    }
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("capacity", &self.inner.capacity)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
