//! Deterministic test scheduler

use super::{panic_message, ActiveGuard, Scheduler, SchedulerToken, Task};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use tracing::{error, trace};

/// Queue that only runs when pumped
///
/// Tasks accumulate until [`ManualScheduler::pump`] is called, which lets tests
/// interleave deliveries precisely. `flush` is an alias for `pump`.
#[derive(Default)]
pub struct ManualScheduler {
    name: String,
    queue: Mutex<VecDeque<Task>>,
}

impl ManualScheduler {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued tasks, including ones queued while pumping, until empty
    pub fn pump(&self) -> usize {
        let _guard = ActiveGuard::enter(self);
        let mut executed = 0;

        loop {
            // Lock released before the task runs so tasks may queue more work
            let next = self.queue.lock().pop_front();
            let Some(task) = next else {
                break;
            };

            let token = SchedulerToken::new();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| task(&token))) {
                error!(
                    scheduler = %self.name,
                    error = %panic_message(payload.as_ref()),
                    "Scheduled task panicked"
                );
            }
            executed += 1;
        }

        trace!(scheduler = %self.name, executed, "Pumped manual scheduler");
        executed
    }
}

impl Scheduler for ManualScheduler {
    fn queue(&self, task: Task) {
        self.queue.lock().push_back(task);
    }

    fn is_active(&self) -> bool {
        ActiveGuard::is_active(self)
    }

    fn flush(&self) {
        self.pump();
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_tasks_wait_for_pump() {
        let scheduler = Arc::new(ManualScheduler::new("manual"));
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let log = Arc::clone(&log);
            scheduler.queue(Box::new(move |_| log.lock().push(i)));
        }
        assert_eq!(scheduler.pending(), 3);
        assert!(log.lock().is_empty());

        assert_eq!(scheduler.pump(), 3);
        assert_eq!(*log.lock(), vec![0, 1, 2]);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_pump_runs_tasks_queued_while_pumping() {
        let scheduler = Arc::new(ManualScheduler::new("manual"));
        let log = Arc::new(Mutex::new(Vec::new()));

        let inner = Arc::clone(&scheduler);
        let outer_log = Arc::clone(&log);
        scheduler.queue(Box::new(move |_| {
            outer_log.lock().push("outer");
            assert!(inner.is_active());
            let log = Arc::clone(&outer_log);
            inner.queue(Box::new(move |_| log.lock().push("inner")));
        }));

        assert_eq!(scheduler.pump(), 2);
        assert_eq!(*log.lock(), vec!["outer", "inner"]);
        assert!(!scheduler.is_active());
    }
}
