//! Schedulers
//!
//! Every mutation of a synchronized entity, and every inbound wire delivery,
//! runs as a [`Task`] on a [`Scheduler`]. While a task runs the scheduler hands
//! it a [`SchedulerToken`]; entity APIs that mutate state demand `&SchedulerToken`,
//! which confines mutation to scheduler execution without runtime thread checks.
//!
//! ## Implementations
//!
//! - [`ImmediateScheduler`]: runs tasks inline on the calling thread
//! - [`SingleThreadScheduler`]: FIFO queue drained by one named worker thread
//! - [`ManualScheduler`]: deterministic queue pumped explicitly by tests

mod immediate;
mod manual;
mod single_thread;

pub use immediate::ImmediateScheduler;
pub use manual::ManualScheduler;
pub use single_thread::SingleThreadScheduler;

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;

/// Unit of work queued on a scheduler
pub type Task = Box<dyn FnOnce(&SchedulerToken) + Send>;

/// Proof that the current code runs inside a scheduler task
///
/// The token is `!Send` and `!Sync`, so it cannot escape the executing thread.
pub struct SchedulerToken {
    _not_send: PhantomData<*const ()>,
}

impl SchedulerToken {
    /// Minted by scheduler implementations immediately before running a task
    pub(crate) fn new() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

impl fmt::Debug for SchedulerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SchedulerToken")
    }
}

/// Serial execution context for entity mutation and wire dispatch
pub trait Scheduler: Send + Sync {
    /// Enqueue a task. Tasks queued from one thread run in queue order.
    fn queue(&self, task: Task);

    /// True when the calling code is currently executing on this scheduler
    fn is_active(&self) -> bool;

    /// Block until every task queued before this call has run
    fn flush(&self);

    /// Human readable scheduler name for logs
    fn name(&self) -> &str;
}

impl dyn Scheduler {
    /// Queue a closure without boxing it at the call site
    pub fn invoke<F>(&self, f: F)
    where
        F: FnOnce(&SchedulerToken) + Send + 'static,
    {
        self.queue(Box::new(f))
    }
}

thread_local! {
    // Addresses of inline schedulers currently running a task on this thread
    static ACTIVE: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

/// Marks an inline scheduler as active on this thread until dropped
pub(crate) struct ActiveGuard {
    address: usize,
}

impl ActiveGuard {
    pub(crate) fn enter<T>(scheduler: &T) -> Self {
        let address = scheduler as *const T as usize;
        ACTIVE.with(|active| active.borrow_mut().push(address));
        Self { address }
    }

    pub(crate) fn is_active<T>(scheduler: &T) -> bool {
        let address = scheduler as *const T as usize;
        ACTIVE.with(|active| active.borrow().contains(&address))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(position) = active.iter().rposition(|a| *a == self.address) {
                active.remove(position);
            }
        });
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_invoke_through_trait_object() {
        let scheduler: Arc<dyn Scheduler> = Arc::new(ImmediateScheduler::new("inline"));
        let counter = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&counter);

        scheduler.invoke(move |_token| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.name(), "inline");
    }

    #[test]
    fn test_active_guard_is_per_instance() {
        let first = ImmediateScheduler::new("first");
        let second = ImmediateScheduler::new("second");

        let guard = ActiveGuard::enter(&first);
        assert!(ActiveGuard::is_active(&first));
        assert!(!ActiveGuard::is_active(&second));
        drop(guard);
        assert!(!ActiveGuard::is_active(&first));
    }
}
