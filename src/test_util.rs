// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Shared helpers for the scenario tests: a trace log collecting observable
//! events in order, and a stepper feeding scripted steps to an operation.

use crate::exec::Execution;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

pub(crate) fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Gives in-flight transitions time to come to rest between scripted steps.
pub(crate) fn settle() {
    thread::sleep(Duration::from_millis(200));
}

/// Polls until all executions completed, failing the test after a generous
/// timeout.
pub(crate) fn wait_done(executions: &[&Execution]) {
    for _ in 0..100 {
        if executions.iter().all(|e| e.is_done()) {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("executions did not complete in time");
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    Lock,
    Unlock,
    Lock2,
    Unlock2,
    Wait,
    Notify,
    Send,
    Receive,
}

impl Step {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Step::Lock => "lock",
            Step::Unlock => "unlock",
            Step::Lock2 => "lock2",
            Step::Unlock2 => "unlock2",
            Step::Wait => "wait",
            Step::Notify => "notify",
            Step::Send => "send",
            Step::Receive => "receive",
        }
    }
}

/// Collects observable events in the order they happened.
pub(crate) struct TraceLog {
    list: Mutex<Vec<String>>,
}

impl TraceLog {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            list: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn started(&self, name: &str, step: &str) {
        self.push(format!("{name} start: {step}"));
    }

    pub(crate) fn finished(&self, name: &str, step: &str) {
        self.push(format!("{name}: {step}"));
    }

    pub(crate) fn finished_with(&self, name: &str, detail: &str, step: &str) {
        self.push(format!("{name} {detail}: {step}"));
    }

    fn push(&self, entry: String) {
        tracing::debug!(%entry, "trace");
        self.list.lock().push(entry);
    }

    pub(crate) fn snapshot(&self) -> Vec<String> {
        self.list.lock().clone()
    }
}

/// Feeds scripted steps to an operation through a host channel; dropping it
/// ends the operation's loop.
pub(crate) struct Stepper {
    tx: mpsc::Sender<Step>,
}

impl Stepper {
    pub(crate) fn new() -> (Self, mpsc::Receiver<Step>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    pub(crate) fn step(&self, step: Step) {
        self.tx.send(step).expect("operation ended early");
    }

    pub(crate) fn finish(self) {
        drop(self);
    }
}
