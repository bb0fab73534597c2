// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::{Abandoned, TaskError};
use crate::exec::Execution;
use crate::op::OpRef;
use crate::scheduler::Scheduler;
use crate::sync::{Action, Dependency, TaskHandle, Trigger};
use parking_lot::Mutex;
use std::fmt;
use std::sync::{Arc, Weak};

/// The function a [`Task`] runs, producing a typed result or an error.
pub type TaskFn<R> = Box<dyn FnOnce(&OpRef) -> Result<R, TaskError> + Send + 'static>;

/// Non-blocking view of a task's outcome, used when it is recorded as a
/// dependency of another task.
pub trait TaskStatus {
    /// The task's error, if any. `None` before completion and on success.
    fn status(&self) -> Option<TaskError>;

    /// Whether the task was skipped because a dependency failed.
    fn is_skipped(&self) -> bool;
}

/// An execution gated by a trigger, with a typed result and dependency-skip
/// propagation.
///
/// A task starts once [`start`](Self::start) has been called *and* all of its
/// dependencies have fired. Dependencies that are themselves tasks must have
/// succeeded: the first failed one causes this task to be *skipped*; its
/// completion trigger fires without the function ever running, and the
/// failing status propagates to it (and, transitively, to its dependents).
pub struct Task<R> {
    inner: Arc<TaskInner<R>>,
}

struct TaskInner<R> {
    trigger: Trigger,
    execution: Execution,
    shared: Mutex<TaskShared<R>>,
}

struct TaskShared<R> {
    /// Taken when the task actually runs.
    function: Option<TaskFn<R>>,
    /// Task dependencies in registration order, inspected on start.
    deps: Vec<TaskHandle>,
    skipped: bool,
    result: Option<R>,
    err: Option<TaskError>,
}

impl<R: Clone + Send + 'static> Task<R> {
    pub fn new(
        scheduler: &Scheduler,
        f: impl FnOnce(&OpRef) -> Result<R, TaskError> + Send + 'static,
    ) -> Self {
        Self::named_impl(scheduler, None, Box::new(f))
    }

    pub fn named(
        scheduler: &Scheduler,
        name: &str,
        f: impl FnOnce(&OpRef) -> Result<R, TaskError> + Send + 'static,
    ) -> Self {
        Self::named_impl(scheduler, Some(name), Box::new(f))
    }

    fn named_impl(scheduler: &Scheduler, name: Option<&str>, f: TaskFn<R>) -> Self {
        // the closures registered on the trigger and the execution hold weak
        // references so an abandoned, never-started task is still dropped
        let inner = Arc::new_cyclic(|weak: &Weak<TaskInner<R>>| {
            let run = weak.clone();
            let execution = Execution::with_kind(
                scheduler,
                "task",
                name,
                Box::new(move |op| {
                    if let Some(task) = run.upgrade() {
                        TaskInner::run(&task, op);
                    }
                }),
            );

            let start = weak.clone();
            let trigger = Trigger::new();
            trigger.register_action(Box::new(move || {
                if let Some(task) = start.upgrade() {
                    TaskInner::start_or_skip(&task);
                }
            }));

            TaskInner {
                trigger,
                execution,
                shared: Mutex::new(TaskShared {
                    function: Some(f),
                    deps: Vec::new(),
                    skipped: false,
                    result: None,
                    err: None,
                }),
            }
        });
        Self { inner }
    }

    /// Arms and trips the task's trigger: the task runs (or is skipped) as
    /// soon as all dependencies have fired.
    pub fn start(&self) {
        self.inner.trigger.arm();
        self.inner.trigger.trigger();
    }

    /// Adds dependencies. Dependencies that are tasks are additionally
    /// recorded so their status gates this task's start.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyArmed`](crate::AlreadyArmed) if the task has been
    /// started.
    pub fn depends_on(&self, deps: &[&dyn Dependency]) -> Result<(), crate::AlreadyArmed> {
        for dep in deps {
            self.inner.trigger.depend_on(*dep)?;
            if let Some(handle) = dep.as_task() {
                self.inner.shared.lock().deps.push(handle);
            }
        }
        Ok(())
    }

    /// Waits for the task to complete or be skipped and returns its final
    /// outcome. Scheduler-aware when an operation handle is given, parks the
    /// host thread otherwise.
    ///
    /// # Errors
    ///
    /// Returns the task function's error, a skipped task's propagated
    /// dependency error, or [`Abandoned`] if the worker terminated without
    /// producing a result.
    pub fn wait(&self, op: Option<&OpRef>) -> Result<R, TaskError> {
        self.inner.execution.wait(op);

        let shared = self.inner.shared.lock();
        if let Some(err) = &shared.err {
            return Err(Arc::clone(err));
        }
        match &shared.result {
            Some(result) => Ok(result.clone()),
            None => Err(Arc::new(Abandoned(()))),
        }
    }

    /// The task's error status, without blocking. `None` means "no error
    /// yet": not finished, or finished successfully.
    #[must_use]
    pub fn status(&self) -> Option<TaskError> {
        self.inner.shared.lock().err.clone()
    }

    /// Whether the task was skipped because a dependency failed.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.inner.shared.lock().skipped
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.execution.is_done()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.execution.name()
    }
}

impl<R: Clone + Send + 'static> TaskInner<R> {
    /// Runs when the task's trigger fires: the task starts, unless a
    /// recorded task dependency failed, in which case it is skipped and the
    /// first failing status becomes its own.
    fn start_or_skip(this: &Arc<Self>) {
        let failed = {
            let mut shared = this.shared.lock();
            let failed = shared.deps.iter().find_map(|dep| dep.status());
            if let Some(err) = &failed {
                shared.err = Some(Arc::clone(err));
                shared.skipped = true;
            }
            failed
        };

        if failed.is_none() {
            this.execution.start();
        } else {
            tracing::debug!(task = %this.execution.name(), "skipped: dependency failed");
            this.execution.op().skip();
        }
    }

    fn run(this: &Arc<Self>, op: &OpRef) {
        let Some(f) = this.shared.lock().function.take() else {
            return;
        };
        let outcome = f(op);
        let mut shared = this.shared.lock();
        match outcome {
            Ok(result) => shared.result = Some(result),
            Err(err) => shared.err = Some(err),
        }
    }
}

impl<R: Send> TaskStatus for TaskInner<R> {
    fn status(&self) -> Option<TaskError> {
        self.shared.lock().err.clone()
    }

    fn is_skipped(&self) -> bool {
        self.shared.lock().skipped
    }
}

impl<R: Clone + Send + 'static> Dependency for Task<R> {
    fn register_action(&self, action: Action) {
        self.inner.execution.register_action(action);
    }

    fn as_task(&self) -> Option<TaskHandle> {
        Some(Arc::clone(&self.inner) as TaskHandle)
    }
}

impl<R> Clone for Task<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R> fmt::Debug for Task<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.inner.execution.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::init_tracing;
    use std::thread;
    use std::time::Duration;

    #[derive(Debug)]
    struct Broken;

    impl fmt::Display for Broken {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.pad("broken")
        }
    }

    impl std::error::Error for Broken {}

    fn recording(
        name: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    ) -> impl FnOnce(&OpRef) -> Result<String, TaskError> + Send + 'static {
        move |_op| {
            order.lock().push(name);
            Ok(name.to_owned())
        }
    }

    #[test]
    fn diamond_graph_runs_in_dependency_order() {
        init_tracing();
        let scheduler = Scheduler::new(2);
        let order = Arc::new(Mutex::new(Vec::new()));

        let t1 = Task::named(&scheduler, "t1", recording("t1", Arc::clone(&order)));
        let t2 = Task::named(&scheduler, "t2", recording("t2", Arc::clone(&order)));
        let t3 = Task::named(&scheduler, "t3", recording("t3", Arc::clone(&order)));
        let t4 = Task::named(&scheduler, "t4", recording("t4", Arc::clone(&order)));

        t4.depends_on(&[&t2, &t3]).unwrap();
        t3.depends_on(&[&t1]).unwrap();
        t2.depends_on(&[&t1, &t3]).unwrap();

        t4.start();
        t3.start();
        t2.start();
        t1.start();

        let sync = Trigger::dependency(None, &[&t1, &t2, &t3, &t4]);
        sync.wait(None);

        assert_eq!(order.lock().as_slice(), ["t1", "t3", "t2", "t4"]);
        assert_eq!(t1.wait(None).unwrap(), "t1");
        assert_eq!(t2.wait(None).unwrap(), "t2");
        assert_eq!(t3.wait(None).unwrap(), "t3");
        assert_eq!(t4.wait(None).unwrap(), "t4");
        assert!(!t4.is_skipped());
    }

    #[test]
    fn failed_dependency_skips_dependents() {
        init_tracing();
        let scheduler = Scheduler::new(2);
        let order = Arc::new(Mutex::new(Vec::new()));

        let failing: Task<String> =
            Task::named(&scheduler, "failing", |_op| Err(Arc::new(Broken) as TaskError));
        let dependent = Task::named(&scheduler, "dependent", recording("dependent", Arc::clone(&order)));
        let transitive = Task::named(&scheduler, "transitive", recording("transitive", Arc::clone(&order)));

        dependent.depends_on(&[&failing]).unwrap();
        transitive.depends_on(&[&dependent]).unwrap();

        transitive.start();
        dependent.start();
        failing.start();

        let sync = Trigger::dependency(None, &[&failing, &dependent, &transitive]);
        sync.wait(None);

        // the failing task itself ran and failed, the others were skipped
        assert!(!failing.is_skipped());
        assert!(failing.status().is_some());
        assert!(dependent.is_skipped());
        assert!(transitive.is_skipped());
        assert!(order.lock().is_empty());

        assert_eq!(dependent.wait(None).unwrap_err().to_string(), "broken");
        assert_eq!(transitive.wait(None).unwrap_err().to_string(), "broken");
    }

    #[test]
    fn panicking_task_completes_without_a_result() {
        init_tracing();
        let scheduler = Scheduler::new(2);

        let exploding: Task<String> =
            Task::named(&scheduler, "exploding", |_op| panic!("task exploded"));
        exploding.start();

        // bounded poll: a regression that never fires the completion trigger
        // fails here instead of hanging in `wait`
        for _ in 0..100 {
            if exploding.is_done() {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
        assert!(exploding.is_done());

        let err = exploding.wait(None).unwrap_err();
        assert!(err.downcast_ref::<Abandoned>().is_some());
        assert!(!exploding.is_skipped());
        assert!(exploding.status().is_none());
    }

    #[test]
    fn depends_on_after_start_is_rejected() {
        init_tracing();
        let scheduler = Scheduler::new(2);
        let t1: Task<String> = Task::new(&scheduler, |_op| Ok("t1".to_owned()));
        let t2: Task<String> = Task::new(&scheduler, |_op| Ok("t2".to_owned()));

        t1.start();
        assert!(t1.depends_on(&[&t2]).is_err());
    }
}
