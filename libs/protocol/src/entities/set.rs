//! Synchronized set
//!
//! Wire layout of one change: `[kind: u8][value]`, kind being an
//! [`AddRemove`] code.

use super::{Binding, RdBindable};
use crate::error::Result;
use codec::{Buffer, CodecError, Deserializable, RdId, Serializable, SerializationCtx};
use parking_lot::Mutex;
use reactive::{AddRemove, Lifetime, SchedulerToken, SetEvent, Signal};
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;
use tracing::trace;

pub struct RdSet<T: 'static> {
    id: RdId,
    binding: Binding,
    items: Mutex<HashSet<T>>,
    changes: Signal<SetEvent<T>>,
}

impl<T> RdSet<T>
where
    T: Serializable + Deserializable + Hash + Eq + Clone + Send + Sync + 'static,
{
    pub fn new(id: RdId) -> Self {
        Self {
            id,
            binding: Binding::new(),
            items: Mutex::new(HashSet::new()),
            changes: Signal::new(),
        }
    }

    /// Insert `value`, returning `false` if it was already present
    pub fn add(&self, _token: &SchedulerToken, value: T) -> Result<bool> {
        if !self.items.lock().insert(value.clone()) {
            return Ok(false);
        }
        self.publish(SetEvent::added(value))?;
        Ok(true)
    }

    /// Remove `value`, returning `false` if it was absent
    pub fn remove(&self, _token: &SchedulerToken, value: &T) -> Result<bool> {
        let Some(removed) = self.items.lock().take(value) else {
            return Ok(false);
        };
        self.publish(SetEvent::removed(removed))?;
        Ok(true)
    }

    pub fn contains(&self, value: &T) -> bool {
        self.items.lock().contains(value)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().iter().cloned().collect()
    }

    /// Replay current items as `Add`, then observe changes until `lifetime`
    /// terminates
    pub fn advise<F>(&self, _token: &SchedulerToken, lifetime: &Lifetime, handler: F)
    where
        F: Fn(&SetEvent<T>) + Send + Sync + 'static,
    {
        if lifetime.is_terminated() {
            return;
        }
        for value in self.snapshot() {
            handler(&SetEvent::added(value));
        }
        self.changes.advise(lifetime, handler);
    }

    /// Local subscribers see the change even when the send fails
    fn publish(&self, event: SetEvent<T>) -> Result<()> {
        let sent = self.binding.send(self.id, |ctx, buffer| {
            buffer.write_u8(event.kind.code());
            event.value.write(ctx, buffer)
        });
        self.changes.fire(&event);
        sent
    }
}

impl<T> RdBindable for RdSet<T>
where
    T: Serializable + Deserializable + Hash + Eq + Clone + Send + Sync + 'static,
{
    fn rd_id(&self) -> RdId {
        self.id
    }

    fn binding(&self) -> &Binding {
        &self.binding
    }

    fn on_wire_received(
        &self,
        _token: &SchedulerToken,
        ctx: &SerializationCtx,
        mut buffer: Buffer,
    ) -> Result<()> {
        let offset = buffer.offset();
        let code = buffer.read_u8()?;
        let kind = AddRemove::from_code(code)
            .ok_or_else(|| CodecError::invalid_tag(code, offset, "set change kind"))?;
        let value = T::read(ctx, &mut buffer)?;

        let changed = match kind {
            AddRemove::Add => self.items.lock().insert(value.clone()),
            AddRemove::Remove => self.items.lock().remove(&value),
        };
        trace!(entity = %self.id, kind = kind.name(), changed, "Set change received");

        if changed {
            self.changes.fire(&SetEvent { kind, value });
        }
        Ok(())
    }
}

impl<T: 'static> fmt::Debug for RdSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdSet")
            .field("id", &self.id)
            .field("len", &self.items.lock().len())
            .field("binding", &self.binding)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactive::{ImmediateScheduler, LifetimeDefinition};
    use std::sync::Arc;

    #[test]
    fn test_local_changes_and_replay() {
        let set = RdSet::<i32>::new(RdId::mix("numbers"));
        let events = Arc::new(Mutex::new(Vec::new()));
        let definition = LifetimeDefinition::new();

        ImmediateScheduler::default().run(|token| {
            assert!(set.add(token, 1).unwrap());
            assert!(!set.add(token, 1).unwrap());
            assert!(set.add(token, 2).unwrap());
            assert_eq!(set.len(), 2);

            let sink = Arc::clone(&events);
            set.advise(token, &definition.lifetime(), move |event: &SetEvent<i32>| {
                sink.lock().push((event.kind, event.value))
            });

            let mut replayed = events.lock().clone();
            replayed.sort_by_key(|(_, value)| *value);
            assert_eq!(replayed, vec![(AddRemove::Add, 1), (AddRemove::Add, 2)]);

            assert!(set.remove(token, &1).unwrap());
            assert!(!set.remove(token, &1).unwrap());
            assert_eq!(events.lock().last(), Some(&(AddRemove::Remove, 1)));

            definition.terminate().unwrap();
            set.add(token, 3).unwrap();
        });
        assert_eq!(events.lock().len(), 3);
    }

    #[test]
    fn test_inbound_invalid_kind_rejected() {
        let set = RdSet::<i32>::new(RdId::of(1));
        let ctx = SerializationCtx::new(Arc::new(codec::Serializers::new()));
        let mut buffer = Buffer::new();
        buffer.write_u8(9);
        buffer.write_i32(1);

        let err = ImmediateScheduler::default()
            .run(|token| set.on_wire_received(token, &ctx, Buffer::from_bytes(buffer.freeze())))
            .unwrap_err();
        assert_eq!(err.category(), "invalid_tag");
        assert!(set.is_empty());
    }
}
