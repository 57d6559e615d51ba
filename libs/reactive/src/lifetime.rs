//! Lifetime Scopes
//!
//! A [`LifetimeDefinition`] exclusively owns a termination scope. Any number of
//! cheap [`Lifetime`] handles observe the same scope and register cleanup
//! actions against it. Terminating the definition unwinds the scope exactly once:
//!
//! 1. every nested child scope is terminated, most-recently-attached first;
//! 2. the scope's own actions run, most-recently-added first.
//!
//! Panics raised by cleanup actions are caught, logged and reported once the
//! unwind has completed. They never abort the unwind.
//!
//! Eternal scopes never terminate. Registrations against them succeed and are
//! silently discarded.

use crate::error::{LifetimeError, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, trace, warn};

static NEXT_LIFETIME_ID: AtomicU32 = AtomicU32::new(1);

static ETERNAL: Lazy<Lifetime> = Lazy::new(|| Lifetime {
    inner: Arc::new(LifetimeImpl::new(true)),
});

/// Reinitialize the process-wide lifetime id counter (test runs only)
pub fn reset_lifetime_ids() {
    NEXT_LIFETIME_ID.store(1, Ordering::SeqCst);
}

/// Handle returned by [`Lifetime::add_action`], used to unregister the action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(u64);

impl ActionId {
    /// Sentinel returned by eternal scopes; removing it is a no-op
    pub const ETERNAL: ActionId = ActionId(u64::MAX);

    pub fn is_eternal(self) -> bool {
        self == Self::ETERNAL
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

/// Scope state machine: `Active -> Terminating -> Terminated`, entered once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifetimeStatus {
    Active = 0,
    Terminating = 1,
    Terminated = 2,
}

impl LifetimeStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifetimeStatus::Active,
            1 => LifetimeStatus::Terminating,
            _ => LifetimeStatus::Terminated,
        }
    }
}

type Action = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Registry {
    next_action_id: u64,
    actions: BTreeMap<ActionId, Action>,
    children: BTreeMap<ActionId, Arc<LifetimeImpl>>,
}

impl Registry {
    fn allocate(&mut self) -> ActionId {
        let id = ActionId(self.next_action_id);
        self.next_action_id += 1;
        id
    }
}

struct LifetimeImpl {
    id: u32,
    eternal: bool,
    terminated: AtomicBool,
    status: AtomicU8,
    registry: Mutex<Registry>,
}

impl LifetimeImpl {
    fn new(eternal: bool) -> Self {
        Self {
            id: NEXT_LIFETIME_ID.fetch_add(1, Ordering::SeqCst),
            eternal,
            terminated: AtomicBool::new(false),
            status: AtomicU8::new(LifetimeStatus::Active as u8),
            registry: Mutex::new(Registry::default()),
        }
    }

    fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    fn status(&self) -> LifetimeStatus {
        LifetimeStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Register an action, handing it back if the scope is already dead
    fn try_add(&self, action: Action) -> std::result::Result<ActionId, Action> {
        if self.eternal {
            return Ok(ActionId::ETERNAL);
        }
        if self.is_terminated() {
            return Err(action);
        }

        let mut registry = self.registry.lock();
        // The flag is flipped under this lock, so this check is authoritative
        if self.is_terminated() {
            return Err(action);
        }
        let id = registry.allocate();
        registry.actions.insert(id, action);
        trace!(lifetime = self.id, action = id.0, "Registered lifetime action");
        Ok(id)
    }

    fn add_action(&self, action: Action) -> Result<ActionId> {
        self.try_add(action)
            .map_err(|_| LifetimeError::already_terminated(self.id))
    }

    fn remove_action(&self, id: ActionId) {
        if self.eternal || id.is_eternal() {
            return;
        }

        let (action, child) = {
            let mut registry = self.registry.lock();
            let action = registry.actions.remove(&id);
            let child = if action.is_none() {
                registry.children.remove(&id)
            } else {
                None
            };
            (action, child)
        };

        // Captured state is released outside the registry lock
        drop(action);
        drop(child);
    }

    fn attach_child(self: &Arc<Self>, child: &Arc<LifetimeImpl>) -> Result<()> {
        if self.eternal || child.eternal || Arc::ptr_eq(self, child) {
            return Ok(());
        }

        let action_id = {
            let mut registry = self.registry.lock();
            if self.is_terminated() {
                return Err(LifetimeError::already_terminated(self.id));
            }
            let id = registry.allocate();
            registry.children.insert(id, Arc::clone(child));
            id
        };

        let parent = Arc::downgrade(self);
        let detach: Action = Box::new(move || detach_from(&parent, action_id));
        if child.try_add(detach).is_err() {
            // Child died before it could be linked back; undo the attachment
            self.remove_action(action_id);
        }

        trace!(parent = self.id, child = child.id, "Attached nested lifetime");
        Ok(())
    }

    fn terminate(&self) -> Result<()> {
        if self.eternal {
            return Ok(());
        }

        if self
            .status
            .compare_exchange(
                LifetimeStatus::Active as u8,
                LifetimeStatus::Terminating as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            trace!(lifetime = self.id, "Lifetime already terminating");
            return Ok(());
        }

        let (children, actions) = {
            let mut registry = self.registry.lock();
            self.terminated.store(true, Ordering::Release);
            (
                mem::take(&mut registry.children),
                mem::take(&mut registry.actions),
            )
        };

        debug!(
            lifetime = self.id,
            children = children.len(),
            actions = actions.len(),
            "Terminating lifetime"
        );

        let mut failures = Vec::new();

        for (_, child) in children.into_iter().rev() {
            if let Err(LifetimeError::CleanupFailed {
                failures: nested, ..
            }) = child.terminate()
            {
                failures.extend(nested);
            }
        }

        for (action_id, action) in actions.into_iter().rev() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(action)) {
                let message = panic_message(payload.as_ref());
                error!(
                    lifetime = self.id,
                    action = action_id.0,
                    error = %message,
                    "Cleanup action panicked during termination"
                );
                failures.push(message);
            }
        }

        self.status
            .store(LifetimeStatus::Terminated as u8, Ordering::Release);

        if failures.is_empty() {
            debug!(lifetime = self.id, "Lifetime terminated");
            Ok(())
        } else {
            Err(LifetimeError::cleanup_failed(self.id, failures))
        }
    }
}

fn detach_from(parent: &Weak<LifetimeImpl>, action_id: ActionId) {
    if let Some(parent) = parent.upgrade() {
        parent.remove_action(action_id);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "cleanup action panicked".to_string()
    }
}

/// Shared handle to a termination scope
///
/// Holders may register cleanup and observe termination, but only the owning
/// [`LifetimeDefinition`] can terminate the scope.
#[derive(Clone)]
pub struct Lifetime {
    inner: Arc<LifetimeImpl>,
}

impl Lifetime {
    /// The process-wide eternal scope
    pub fn eternal() -> Lifetime {
        ETERNAL.clone()
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    pub fn is_eternal(&self) -> bool {
        self.inner.eternal
    }

    pub fn status(&self) -> LifetimeStatus {
        self.inner.status()
    }

    /// Register a cleanup action to run when the scope terminates
    ///
    /// Fails with [`LifetimeError::AlreadyTerminated`] on a dead scope. On an
    /// eternal scope the action is dropped and [`ActionId::ETERNAL`] returned.
    pub fn add_action<F>(&self, action: F) -> Result<ActionId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.add_action(Box::new(action))
    }

    /// Unregister an action. No-op if it already ran or was removed.
    pub fn remove_action(&self, id: ActionId) {
        self.inner.remove_action(id)
    }

    /// Run `opening` now and `closing` when the scope terminates
    ///
    /// Returns `None` without running either closure if the scope is already
    /// terminated. If termination races in after `opening` ran, `closing` runs
    /// immediately.
    pub fn bracket<T, O, C>(&self, opening: O, closing: C) -> Option<T>
    where
        O: FnOnce() -> T,
        C: FnOnce() + Send + 'static,
    {
        if self.is_terminated() {
            return None;
        }

        let value = opening();
        if let Err(closing) = self.inner.try_add(Box::new(closing)) {
            closing();
        }
        Some(value)
    }

    /// Terminate `child` whenever this scope terminates
    ///
    /// The child's own termination detaches it again, so terminating the child
    /// first leaves this scope untouched.
    pub fn attach_nested(&self, child: &LifetimeDefinition) -> Result<()> {
        self.inner.attach_child(&child.inner)
    }

    /// Create a child scope that terminates together with this one
    pub fn create_nested(&self) -> Result<LifetimeDefinition> {
        let child = LifetimeDefinition::new();
        self.attach_nested(&child)?;
        Ok(child)
    }
}

impl PartialEq for Lifetime {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Lifetime {}

impl fmt::Debug for Lifetime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lifetime")
            .field("id", &self.inner.id)
            .field("eternal", &self.inner.eternal)
            .field("status", &self.inner.status())
            .finish()
    }
}

/// Exclusive owner of a termination scope
///
/// Dropping the definition terminates the scope.
pub struct LifetimeDefinition {
    inner: Arc<LifetimeImpl>,
}

impl LifetimeDefinition {
    /// Create a new root scope
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LifetimeImpl::new(false)),
        }
    }

    /// Create a scope that never terminates
    pub fn eternal() -> Self {
        Self {
            inner: Arc::new(LifetimeImpl::new(true)),
        }
    }

    /// Shared handle to this scope
    pub fn lifetime(&self) -> Lifetime {
        Lifetime {
            inner: Arc::clone(&self.inner),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.is_terminated()
    }

    pub fn is_eternal(&self) -> bool {
        self.inner.eternal
    }

    pub fn status(&self) -> LifetimeStatus {
        self.inner.status()
    }

    /// Terminate the scope
    ///
    /// Idempotent: only the first call (across all threads) unwinds. Nested
    /// children are terminated before any of this scope's own actions run.
    pub fn terminate(&self) -> Result<()> {
        self.inner.terminate()
    }
}

impl Default for LifetimeDefinition {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LifetimeDefinition {
    fn drop(&mut self) {
        if let Err(e) = self.inner.terminate() {
            warn!(lifetime = self.inner.id, error = %e, "Lifetime dropped with failed cleanup");
        }
    }
}

impl fmt::Debug for LifetimeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifetimeDefinition")
            .field("id", &self.inner.id)
            .field("eternal", &self.inner.eternal)
            .field("status", &self.inner.status())
            .finish()
    }
}

/// A chain of child scopes where starting the next one ends the previous one
pub struct SequentialLifetimes {
    parent: Lifetime,
    current: Mutex<Option<LifetimeDefinition>>,
}

impl SequentialLifetimes {
    pub fn new(parent: &Lifetime) -> Self {
        Self {
            parent: parent.clone(),
            current: Mutex::new(None),
        }
    }

    /// Terminate the current child and start a fresh one
    pub fn next(&self) -> Result<Lifetime> {
        self.terminate_current()?;

        let definition = self.parent.create_nested()?;
        let lifetime = definition.lifetime();
        let displaced = self.current.lock().replace(definition);
        drop(displaced);
        Ok(lifetime)
    }

    /// Terminate the current child, if any
    pub fn terminate_current(&self) -> Result<()> {
        let previous = self.current.lock().take();
        match previous {
            Some(definition) => definition.terminate(),
            None => Ok(()),
        }
    }

    /// True when no live child exists
    pub fn is_terminated(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .map_or(true, |definition| definition.is_terminated())
    }
}
