// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Scheduler-aware synchronization primitives.
//!
//! All primitives in this module express blocking strictly through the
//! scheduler: an operation that blocks yields its seat so a ready operation
//! can take over, and unblocking re-enters the scheduling discipline. Wake-up
//! order is FIFO per primitive, and mutex/monitor ownership is handed off
//! directly to the woken waiter rather than re-contended.

mod channel;
mod monitor;
mod mutex;
mod trigger;

pub use channel::Channel;
pub use monitor::{Condition, Monitor};
pub use mutex::Mutex;
pub use trigger::{Action, Dependency, TaskHandle, Trigger};
