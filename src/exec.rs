// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::op::{OpRef, OperationFn};
use crate::scheduler::Scheduler;
use crate::sync::{Action, Dependency};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// The scheduled execution of an operation function.
///
/// An execution owns its operation's control block and hands the function to
/// the scheduler exactly once. It is a [`Dependency`]: its completion trigger
/// fires when the function returns (or the operation is skipped), so triggers
/// and tasks can wait on it.
#[derive(Clone)]
pub struct Execution {
    inner: Arc<ExecInner>,
}

struct ExecInner {
    /// Taken by the first `start`.
    function: Mutex<Option<OperationFn>>,
    state: OpRef,
}

impl Execution {
    pub fn new(scheduler: &Scheduler, f: impl FnOnce(&OpRef) + Send + 'static) -> Self {
        Self::with_kind(scheduler, "execution", None, Box::new(f))
    }

    pub fn named(
        scheduler: &Scheduler,
        name: &str,
        f: impl FnOnce(&OpRef) + Send + 'static,
    ) -> Self {
        Self::with_kind(scheduler, "execution", Some(name), Box::new(f))
    }

    pub(crate) fn with_kind(
        scheduler: &Scheduler,
        kind: &str,
        name: Option<&str>,
        f: OperationFn,
    ) -> Self {
        Self {
            inner: Arc::new(ExecInner {
                function: Mutex::new(Some(f)),
                state: scheduler.new_operation(kind, name),
            }),
        }
    }

    /// Hands the operation function to the scheduler.
    ///
    /// Returns whether this call started the execution; every call after the
    /// first is a no-op returning `false`.
    pub fn start(&self) -> bool {
        let Some(f) = self.inner.function.lock().take() else {
            return false;
        };
        self.inner.state.scheduler().start(&self.inner.state, f);
        true
    }

    /// Waits for the execution to complete (or be skipped). Scheduler-aware
    /// when an operation handle is given, parks the host thread otherwise.
    pub fn wait(&self, op: Option<&OpRef>) {
        self.inner.state.done_trigger().wait(op);
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.state.is_done()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.state.name()
    }

    pub(crate) fn op(&self) -> &OpRef {
        &self.inner.state
    }
}

impl Dependency for Execution {
    fn register_action(&self, action: Action) {
        self.inner.state.done_trigger().register_action(action);
    }
}

impl fmt::Debug for Execution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Execution")
            .field("name", &self.name())
            .field("done", &self.is_done())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Trigger;
    use crate::test_util::{init_tracing, wait_done};
    use std::collections::HashMap;

    #[derive(Clone, Default)]
    struct Results {
        map: Arc<Mutex<HashMap<String, String>>>,
    }

    impl Results {
        fn set(&self, name: &str) {
            self.map.lock().insert(name.to_owned(), "done".to_owned());
        }

        fn snapshot(&self) -> HashMap<String, String> {
            self.map.lock().clone()
        }
    }

    fn simple(name: &'static str, results: Results) -> impl FnOnce(&OpRef) + Send + 'static {
        move |_op| results.set(name)
    }

    fn waiting(
        name: &'static str,
        predecessor: Option<Execution>,
        results: Results,
    ) -> impl FnOnce(&OpRef) + Send + 'static {
        move |op| {
            if let Some(predecessor) = predecessor {
                predecessor.wait(Some(op));
            }
            results.set(name);
        }
    }

    #[test]
    fn single_execution_completes() {
        init_tracing();
        let scheduler = Scheduler::new(2);
        let results = Results::default();

        let e1 = Execution::named(&scheduler, "test1", simple("test1", results.clone()));
        assert!(e1.start());
        assert!(!e1.start());

        wait_done(&[&e1]);
        assert_eq!(results.snapshot().get("test1").map(String::as_str), Some("done"));
    }

    #[test]
    fn more_executions_than_seats_complete() {
        init_tracing();
        let scheduler = Scheduler::new(2);
        let results = Results::default();

        let executions: Vec<_> = ["test1", "test2", "test3"]
            .into_iter()
            .map(|name| Execution::named(&scheduler, name, simple(name, results.clone())))
            .collect();
        for execution in &executions {
            execution.start();
        }

        wait_done(&executions.iter().collect::<Vec<_>>());
        assert_eq!(results.snapshot().len(), 3);
    }

    #[test]
    fn chained_waits_complete_in_dependency_order() {
        init_tracing();
        let scheduler = Scheduler::new(2);
        let results = Results::default();

        let e1 = Execution::named(&scheduler, "test1", waiting("test1", None, results.clone()));
        let e2 = Execution::named(&scheduler, "test2", waiting("test2", Some(e1.clone()), results.clone()));
        let e3 = Execution::named(&scheduler, "test3", waiting("test3", Some(e2.clone()), results.clone()));

        // start in reverse so the waiters are admitted first
        e3.start();
        e2.start();
        e1.start();

        wait_done(&[&e1, &e2, &e3]);
        assert_eq!(results.snapshot().len(), 3);
    }

    #[test]
    fn dependency_trigger_returns_after_all_complete() {
        init_tracing();
        let scheduler = Scheduler::new(2);
        let results = Results::default();

        let e1 = Execution::named(&scheduler, "test1", waiting("test1", None, results.clone()));
        let e2 = Execution::named(&scheduler, "test2", waiting("test2", Some(e1.clone()), results.clone()));
        let e3 = Execution::named(&scheduler, "test3", waiting("test3", Some(e2.clone()), results.clone()));

        let sync = Trigger::dependency(None, &[&e1, &e2, &e3]);

        e3.start();
        e2.start();
        e1.start();

        sync.wait(None);
        assert!(e1.is_done() && e2.is_done() && e3.is_done());

        let expected: HashMap<_, _> = ["test1", "test2", "test3"]
            .into_iter()
            .map(|name| (name.to_owned(), "done".to_owned()))
            .collect();
        assert_eq!(results.snapshot(), expected);
    }
}
