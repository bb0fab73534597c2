// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Error produced by tasks and propagated along task dependency edges.
///
/// A failed dependency's `TaskError` becomes the status of every task that
/// depends on it, which is then skipped without running.
pub type TaskError = Arc<dyn Error + Send + Sync + 'static>;

/// Returned when a [`Channel`](crate::Channel) has been closed.
///
/// Senders observe this for every send after the close; receivers first drain
/// the remaining buffered values and observe it afterwards. Closing an
/// already-closed channel returns it as well.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Closed(pub(crate) ());

impl fmt::Display for Closed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("already closed")
    }
}

impl Error for Closed {}

/// Returned when dependencies are added to a [`Trigger`](crate::Trigger)
/// after it has been armed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AlreadyArmed(pub(crate) ());

impl fmt::Display for AlreadyArmed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("trigger already armed")
    }
}

impl Error for AlreadyArmed {}

/// The status of a task whose worker terminated without producing a result,
/// e.g. because the operation function panicked.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Abandoned(pub(crate) ());

impl fmt::Display for Abandoned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("operation finished without producing a result")
    }
}

impl Error for Abandoned {}
