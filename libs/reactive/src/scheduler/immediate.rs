//! Inline scheduler

use super::{panic_message, ActiveGuard, Scheduler, SchedulerToken, Task};
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

/// Runs every task synchronously on the thread that queues it
///
/// Active only for the duration of a task. Suited to single-threaded tests and
/// to in-process wires where delivery order already matches call order.
#[derive(Debug)]
pub struct ImmediateScheduler {
    name: String,
}

impl ImmediateScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Run `f` inline as a task of this scheduler and return its result
    ///
    /// Unlike [`Scheduler::queue`] the closure may borrow from the caller.
    /// Panics propagate to the caller.
    pub fn run<R>(&self, f: impl FnOnce(&SchedulerToken) -> R) -> R {
        let _guard = ActiveGuard::enter(self);
        f(&SchedulerToken::new())
    }
}

impl Default for ImmediateScheduler {
    fn default() -> Self {
        Self::new("immediate")
    }
}

impl Scheduler for ImmediateScheduler {
    fn queue(&self, task: Task) {
        let _guard = ActiveGuard::enter(self);
        let token = SchedulerToken::new();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task(&token))) {
            error!(
                scheduler = %self.name,
                error = %panic_message(payload.as_ref()),
                "Scheduled task panicked"
            );
        }
    }

    fn is_active(&self) -> bool {
        ActiveGuard::is_active(self)
    }

    fn flush(&self) {}

    fn name(&self) -> &str {
        &self.name
    }
}
