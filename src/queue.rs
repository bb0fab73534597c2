// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::op::OpRef;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// A named FIFO of operation handles.
///
/// Queues are the canonical ordering mechanism: every primitive that grants a
/// resource to a waiter grants it to the head of its queue. Queue identity is
/// `Arc` pointer identity; an operation's back-pointer records the one queue
/// it is currently a member of.
pub struct Queue {
    name: String,
    list: Mutex<VecDeque<OpRef>>,
}

impl Queue {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            list: Mutex::new(VecDeque::new()),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.list.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }

    /// Appends `op` to the tail.
    ///
    /// The operation's back-pointer is maintained by the caller (see
    /// `OpRef::add_to_queue`); `add` only orders the handle.
    pub fn add(&self, op: OpRef) {
        self.list.lock().push_back(op);
    }

    /// Pops the head, clearing its back-pointer atomically with the removal.
    pub fn next(self: &Arc<Self>) -> Option<OpRef> {
        let mut list = self.list.lock();
        let op = list.pop_front()?;
        op.removed_from_queue(self);
        Some(op)
    }

    /// Removes `op` by identity, returning whether it was present.
    pub fn remove(&self, op: &OpRef) -> bool {
        let mut list = self.list.lock();
        if let Some(idx) = list.iter().position(|e| e == op) {
            list.remove(idx);
            true
        } else {
            false
        }
    }
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}
