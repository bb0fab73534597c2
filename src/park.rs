// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Host parking primitives the scheduler is built on: a binary-semaphore
//! style lock whose release may happen on a different thread than the
//! acquisition ([`RawMutex`]), and the single-owner park/unpark [`Gate`]
//! derived from it.

use parking_lot::{Condvar, Mutex};

/// A host lock that, unlike a guard-based mutex, can be released from a
/// thread other than the one that acquired it.
///
/// This is the property the hand-off protocols rely on: an unlocking thread
/// keeps the lock held while transferring a primitive to a woken waiter, and
/// the waiter releases it once it has claimed ownership. Implemented as a
/// flag plus condvar, i.e. a binary semaphore used in lock/unlock pairs.
#[derive(Debug)]
pub(crate) struct RawMutex {
    locked: Mutex<bool>,
    unlocked: Condvar,
}

impl RawMutex {
    pub(crate) const fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            unlocked: Condvar::new(),
        }
    }

    /// Acquires the lock, blocking the calling thread while it is held.
    pub(crate) fn lock(&self) {
        let mut locked = self.locked.lock();
        while *locked {
            self.unlocked.wait(&mut locked);
        }
        *locked = true;
    }

    /// Releases the lock, admitting exactly one pending or future [`lock`].
    ///
    /// May be called from any thread.
    ///
    /// [`lock`]: Self::lock
    pub(crate) fn unlock(&self) {
        let mut locked = self.locked.lock();
        debug_assert!(*locked, "unlocking an unlocked host lock");
        *locked = false;
        drop(locked);
        self.unlocked.notify_one();
    }
}

/// Single-owner park/unpark primitive for an operation's worker thread.
///
/// A freshly constructed gate is *open*: the first [`close`] takes the gate
/// without blocking. A subsequent [`close`] parks the caller until a matching
/// [`open`], which admits exactly one pending or future [`close`]. The worker
/// closes its own gate to park itself; the scheduler opens it from another
/// thread to resume it.
///
/// [`close`]: Self::close
/// [`open`]: Self::open
#[derive(Debug)]
pub struct Gate {
    inner: RawMutex,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: RawMutex::new(),
        }
    }

    /// Takes the gate, parking the calling thread until it is open.
    pub fn close(&self) {
        self.inner.lock();
    }

    /// Opens the gate, resuming one parked (or admitting one future) `close`.
    pub fn open(&self) {
        self.inner.unlock();
    }
}
