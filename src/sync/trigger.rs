// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::error::AlreadyArmed;
use crate::op::OpRef;
use crate::park::{Gate, RawMutex};
use crate::queue::Queue;
use crate::task::TaskStatus;
use crate::util::element_name;
use static_assertions::assert_impl_all;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem;
use std::sync::Arc;

/// A function fired exactly once when a [`Trigger`] becomes effective.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Shared handle to a task recorded as a dependency, used to inspect its
/// status when deciding whether a dependent task starts or is skipped.
pub type TaskHandle = Arc<dyn TaskStatus + Send + Sync>;

/// Something a [`Trigger`] can depend on.
///
/// A dependency fires the actions registered with it exactly once. Triggers,
/// executions and tasks are dependencies; a trigger depending on another
/// trigger becomes effective only after all its dependencies have fired.
pub trait Dependency {
    /// Registers `action` to run when this dependency fires. If it has
    /// already fired, `action` runs immediately.
    fn register_action(&self, action: Action);

    /// The task behind this dependency, if it is one. Dependents record task
    /// handles so a failed dependency's status can be propagated.
    fn as_task(&self) -> Option<TaskHandle> {
        None
    }
}

/// A one-shot, armed, dependency-counted signal.
///
/// A trigger becomes *effective* once it is armed, has been triggered, and
/// all of its dependencies have fired. At that point it fires its registered
/// actions in registration order and releases all waiters, exactly once.
/// Operations wait for it through the scheduler so their seat is freed while
/// they are parked; plain host threads can wait as well.
#[derive(Clone)]
pub struct Trigger {
    shared: Arc<TriggerShared>,
}

assert_impl_all!(Trigger: Send, Sync);

struct TriggerShared {
    lock: RawMutex,
    /// Guarded by `lock`.
    state: UnsafeCell<TriggerState>,
    waiting: Arc<Queue>,
}

// Safety: `state` is only ever accessed while `lock` is held.
unsafe impl Send for TriggerShared {}
// Safety: `state` is only ever accessed while `lock` is held.
unsafe impl Sync for TriggerShared {}

struct TriggerState {
    armed: bool,
    triggered: bool,
    dependencies: usize,
    actions: Vec<Action>,
}

impl TriggerState {
    fn effective(&self) -> bool {
        self.armed && self.triggered && self.dependencies == 0
    }
}

impl TriggerShared {
    /// # Safety
    ///
    /// The caller must hold `lock`.
    unsafe fn with_state<T>(&self, f: impl FnOnce(&mut TriggerState) -> T) -> T {
        // Safety: the caller holds `lock`, which serializes all access.
        f(unsafe { &mut *self.state.get() })
    }

    /// Fires actions and releases waiters if the trigger is effective.
    /// Draining the action list makes firing idempotent. Caller holds
    /// `lock`.
    fn fire_if_effective(&self) {
        // Safety: caller holds `lock`.
        let actions = unsafe {
            self.with_state(|state| {
                if state.effective() {
                    Some(mem::take(&mut state.actions))
                } else {
                    None
                }
            })
        };
        let Some(actions) = actions else { return };

        if !actions.is_empty() || !self.waiting.is_empty() {
            tracing::trace!(trigger = self.waiting.name(), "fired");
        }
        for action in actions {
            action();
        }
        while let Some(op) = self.waiting.next() {
            op.unblock();
        }
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

impl Trigger {
    /// Creates an unarmed trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::named_impl(None)
    }

    /// Creates an unarmed trigger carrying `name` for diagnostics.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self::named_impl(Some(name))
    }

    fn named_impl(name: Option<&str>) -> Self {
        Self {
            shared: Arc::new(TriggerShared {
                lock: RawMutex::new(),
                state: UnsafeCell::new(TriggerState {
                    armed: false,
                    triggered: false,
                    dependencies: 0,
                    actions: Vec::new(),
                }),
                waiting: Queue::new(element_name("trigger", name)),
            }),
        }
    }

    /// Creates an already armed trigger with the given action and
    /// dependencies. It fires once [`trigger`](Self::trigger) is called and
    /// all dependencies have fired.
    #[must_use]
    pub fn armed(action: Option<Action>, deps: &[&dyn Dependency]) -> Self {
        let trigger = Self::new();
        for dep in deps {
            trigger
                .depend_on(*dep)
                .expect("freshly created trigger is not armed");
        }
        if let Some(action) = action {
            trigger.register_action(action);
        }
        trigger.arm();
        trigger
    }

    /// Creates an armed and triggered trigger: it fires exactly when all of
    /// `deps` have fired.
    #[must_use]
    pub fn dependency(action: Option<Action>, deps: &[&dyn Dependency]) -> Self {
        let trigger = Self::armed(action, deps);
        trigger.trigger();
        trigger
    }

    /// Arms the trigger. Idempotent.
    pub fn arm(&self) {
        self.shared.lock.lock();
        // Safety: we hold the lock.
        unsafe { self.shared.with_state(|state| state.armed = true) };
        self.shared.fire_if_effective();
        self.shared.lock.unlock();
    }

    /// Trips the trigger. Idempotent; actions fire exactly once, when the
    /// trigger becomes effective.
    pub fn trigger(&self) {
        self.shared.lock.lock();
        // Safety: we hold the lock.
        let newly = unsafe {
            self.shared.with_state(|state| {
                if state.triggered {
                    false
                } else {
                    state.triggered = true;
                    true
                }
            })
        };
        if newly {
            self.shared.fire_if_effective();
        }
        self.shared.lock.unlock();
    }

    /// Whether the trigger is effective (armed, triggered, no outstanding
    /// dependencies).
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.shared.lock.lock();
        // Safety: we hold the lock.
        let effective = unsafe { self.shared.with_state(|state| state.effective()) };
        self.shared.lock.unlock();
        effective
    }

    /// Registers `action` to run when the trigger fires; if it is already
    /// effective, `action` runs immediately.
    pub fn register_action(&self, action: Action) {
        self.shared.lock.lock();
        // Safety: we hold the lock.
        let immediate = unsafe {
            self.shared.with_state(|state| {
                if state.effective() {
                    Some(action)
                } else {
                    state.actions.push(action);
                    None
                }
            })
        };
        self.shared.lock.unlock();
        if let Some(action) = immediate {
            action();
        }
    }

    /// Makes this trigger depend on `dep`: it cannot become effective before
    /// `dep` has fired. Only allowed before arming.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyArmed`] (without mutating any state) if the trigger
    /// has been armed.
    pub fn depend_on(&self, dep: &dyn Dependency) -> Result<(), AlreadyArmed> {
        self.shared.lock.lock();
        // Safety: we hold the lock.
        let armed = unsafe {
            self.shared.with_state(|state| {
                if state.armed {
                    true
                } else {
                    state.dependencies += 1;
                    false
                }
            })
        };
        self.shared.lock.unlock();
        if armed {
            return Err(AlreadyArmed(()));
        }

        // registered outside our own lock: if `dep` already fired, the
        // decrement below runs on this thread right away
        let this = self.clone();
        dep.register_action(Box::new(move || this.dep_fired()));
        Ok(())
    }

    /// One of our dependencies fired.
    fn dep_fired(&self) {
        self.shared.lock.lock();
        // Safety: we hold the lock.
        unsafe { self.shared.with_state(|state| state.dependencies -= 1) };
        self.shared.fire_if_effective();
        self.shared.lock.unlock();
    }

    /// Waits for the trigger to become effective.
    ///
    /// With an operation handle the wait goes through the scheduler: the
    /// operation is parked on the trigger's wait queue and its seat is handed
    /// to a ready operation. Without one, the calling host thread parks on a
    /// gate that is opened by a registered action. Returns immediately if the
    /// trigger is already effective; there are no spurious wakeups.
    pub fn wait(&self, op: Option<&OpRef>) {
        self.shared.lock.lock();
        // Safety: we hold the lock.
        let effective = unsafe { self.shared.with_state(|state| state.effective()) };
        if effective {
            self.shared.lock.unlock();
            return;
        }

        match op {
            Some(op) => {
                // enqueued first, then the trigger lock is surrendered by the
                // scheduler once the operation is reachable from the queue
                op.block(Some(&self.shared.waiting), Some(&|| self.shared.lock.unlock()));
            }
            None => {
                let gate = Arc::new(Gate::new());
                gate.close();
                let opened = Arc::clone(&gate);
                // Safety: we hold the lock.
                unsafe {
                    self.shared
                        .with_state(|state| state.actions.push(Box::new(move || opened.open())));
                }
                self.shared.lock.unlock();
                gate.close();
            }
        }
    }
}

impl Dependency for Trigger {
    fn register_action(&self, action: Action) {
        // delegates to the inherent method
        Trigger::register_action(self, action);
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("name", &self.shared.waiting.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn counting_action(counter: &Arc<AtomicUsize>) -> Action {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fires_exactly_once() {
        let fired = Arc::new(AtomicUsize::new(0));
        let trigger = Trigger::new();
        trigger.register_action(counting_action(&fired));

        assert!(!trigger.is_triggered());
        trigger.trigger();
        assert!(!trigger.is_triggered());
        trigger.arm();
        assert!(trigger.is_triggered());
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // both idempotent
        trigger.arm();
        trigger.trigger();
        assert!(trigger.is_triggered());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn register_on_effective_runs_immediately() {
        let fired = Arc::new(AtomicUsize::new(0));
        let trigger = Trigger::dependency(None, &[]);
        assert!(trigger.is_triggered());

        trigger.register_action(counting_action(&fired));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn depend_on_after_arm_is_rejected() {
        let trigger = Trigger::armed(None, &[]);
        let other = Trigger::new();
        assert_eq!(trigger.depend_on(&other), Err(AlreadyArmed(())));

        // the rejected call must not have mutated anything
        trigger.trigger();
        assert!(trigger.is_triggered());
    }

    #[test]
    fn dependencies_gate_effectiveness() {
        let fired = Arc::new(AtomicUsize::new(0));
        let dep1 = Trigger::armed(None, &[]);
        let dep2 = Trigger::armed(None, &[]);
        let trigger = Trigger::dependency(Some(counting_action(&fired)), &[&dep1, &dep2]);

        assert!(!trigger.is_triggered());
        dep1.trigger();
        assert!(!trigger.is_triggered());
        dep2.trigger();
        assert!(trigger.is_triggered());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn depend_on_already_fired_dependency() {
        let dep = Trigger::dependency(None, &[]);
        assert!(dep.is_triggered());

        let trigger = Trigger::new();
        trigger.depend_on(&dep).unwrap();
        trigger.arm();
        trigger.trigger();
        assert!(trigger.is_triggered());
    }

    #[test]
    fn host_thread_wait_parks_until_fired() {
        let trigger = Trigger::armed(None, &[]);
        let waited = {
            let trigger = trigger.clone();
            thread::spawn(move || trigger.wait(None))
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!waited.is_finished());

        trigger.trigger();
        waited.join().unwrap();
    }

    #[test]
    fn wait_on_effective_trigger_returns_immediately() {
        let trigger = Trigger::dependency(None, &[]);
        trigger.wait(None);
    }
}
