//! Dedicated worker thread scheduler

use super::{panic_message, Scheduler, SchedulerToken, Task};
use crossbeam_channel::{bounded, unbounded, Sender};
use parking_lot::Mutex;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, error, warn};

enum Command {
    Run(Task),
    Flush(Sender<()>),
}

/// FIFO scheduler backed by one named worker thread
///
/// Tasks run in queue order. A panicking task is logged and the worker keeps
/// going. Dropping the scheduler drains the queue and joins the worker.
pub struct SingleThreadScheduler {
    name: String,
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl SingleThreadScheduler {
    /// Spawn the worker thread
    pub fn new(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let (tx, rx) = unbounded::<Command>();
        let worker_name = name.clone();

        let worker = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(scheduler = %worker_name, "Scheduler worker started");
                for command in rx {
                    match command {
                        Command::Run(task) => {
                            let token = SchedulerToken::new();
                            if let Err(payload) =
                                panic::catch_unwind(AssertUnwindSafe(|| task(&token)))
                            {
                                error!(
                                    scheduler = %worker_name,
                                    error = %panic_message(payload.as_ref()),
                                    "Scheduled task panicked"
                                );
                            }
                        }
                        Command::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                debug!(scheduler = %worker_name, "Scheduler worker stopped");
            })?;

        let worker_id = worker.thread().id();
        Ok(Self {
            name,
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            worker_id,
        })
    }

    fn send(&self, command: Command) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(command).is_ok(),
            None => false,
        }
    }
}

impl Scheduler for SingleThreadScheduler {
    fn queue(&self, task: Task) {
        if !self.send(Command::Run(task)) {
            warn!(scheduler = %self.name, "Task queued on stopped scheduler, dropping");
        }
    }

    fn is_active(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    fn flush(&self) {
        // The worker cannot wait on itself
        if self.is_active() {
            return;
        }

        let (done_tx, done_rx) = bounded(1);
        if self.send(Command::Flush(done_tx)) {
            let _ = done_rx.recv();
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SingleThreadScheduler {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish the backlog and exit
        drop(self.sender.lock().take());

        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                error!(scheduler = %self.name, "Scheduler worker terminated abnormally");
            }
        }
    }
}

impl std::fmt::Debug for SingleThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleThreadScheduler")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_tasks_run_in_fifo_order() {
        let scheduler = SingleThreadScheduler::new("fifo").unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        for i in 0..100 {
            let log = Arc::clone(&log);
            scheduler.queue(Box::new(move |_| log.lock().push(i)));
        }
        scheduler.flush();

        assert_eq!(*log.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_is_active_only_on_worker() {
        let scheduler = Arc::new(SingleThreadScheduler::new("active").unwrap());
        assert!(!scheduler.is_active());

        let inner = Arc::clone(&scheduler);
        let observed = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&observed);
        scheduler.queue(Box::new(move |_| {
            seen.store(inner.is_active(), Ordering::SeqCst);
            // Flushing from the worker must not deadlock
            inner.flush();
        }));
        scheduler.flush();

        assert!(observed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_worker_survives_panicking_task() {
        let scheduler = SingleThreadScheduler::new("panics").unwrap();
        let ran = Arc::new(AtomicBool::new(false));
        let seen = Arc::clone(&ran);

        scheduler.queue(Box::new(|_| panic!("task failure")));
        scheduler.queue(Box::new(move |_| seen.store(true, Ordering::SeqCst)));
        scheduler.flush();

        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_drop_drains_backlog() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let scheduler = SingleThreadScheduler::new("drain").unwrap();
            for i in 0..10 {
                let log = Arc::clone(&log);
                scheduler.queue(Box::new(move |_| log.lock().push(i)));
            }
        }
        assert_eq!(log.lock().len(), 10);
    }
}
