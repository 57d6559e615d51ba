//! Synchronized map with master acknowledgement
//!
//! One side of a map pair is the master. The master's local changes are
//! versioned and stay provisional until the slave acknowledges them; while a
//! key is provisional, unversioned changes for it arriving from the slave are
//! discarded, so the master wins concurrent writes.
//!
//! Wire layout of one change:
//! `[op: u8][versioned: bool][version: i64 if versioned][key][value if Add/Update]`

use super::{Binding, RdBindable};
use crate::error::Result;
use codec::{Buffer, CodecError, Deserializable, RdId, Serializable, SerializationCtx};
use parking_lot::Mutex;
use reactive::{Lifetime, MapEvent, Op, SchedulerToken, Signal};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use tracing::{debug, trace, warn};

struct MapState<K, V> {
    entries: HashMap<K, V>,
    // key -> version of the provisional master change awaiting Ack
    pending: HashMap<K, i64>,
    next_version: i64,
}

pub struct RdMap<K: 'static, V: 'static> {
    id: RdId,
    is_master: bool,
    binding: Binding,
    state: Mutex<MapState<K, V>>,
    changes: Signal<MapEvent<K, V>>,
}

impl<K, V> RdMap<K, V>
where
    K: Serializable + Deserializable + Hash + Eq + Clone + Send + Sync + 'static,
    V: Serializable + Deserializable + PartialEq + Clone + Send + Sync + 'static,
{
    pub fn new(id: RdId, is_master: bool) -> Self {
        Self {
            id,
            is_master,
            binding: Binding::new(),
            state: Mutex::new(MapState {
                entries: HashMap::new(),
                pending: HashMap::new(),
                next_version: 0,
            }),
            changes: Signal::new(),
        }
    }

    pub fn is_master(&self) -> bool {
        self.is_master
    }

    /// Insert or replace the value for `key`
    ///
    /// Setting the value already stored is not a change and emits nothing.
    pub fn set(&self, _token: &SchedulerToken, key: K, value: V) -> Result<()> {
        let (event, version) = {
            let mut state = self.state.lock();
            let old = state.entries.insert(key.clone(), value.clone());
            if old.as_ref() == Some(&value) {
                return Ok(());
            }
            let version = self.next_local_version(&mut state, &key);
            let event = match old {
                Some(old) => MapEvent::Update {
                    key,
                    old,
                    new: value,
                },
                None => MapEvent::Add { key, value },
            };
            (event, version)
        };

        self.publish(event, version)
    }

    /// Remove `key`, returning the value it held
    pub fn remove(&self, _token: &SchedulerToken, key: &K) -> Result<Option<V>> {
        let (old, version) = {
            let mut state = self.state.lock();
            let Some(old) = state.entries.remove(key) else {
                return Ok(None);
            };
            let version = self.next_local_version(&mut state, key);
            (old, version)
        };

        let event = MapEvent::Remove {
            key: key.clone(),
            old: old.clone(),
        };
        self.publish(event, version)?;
        Ok(Some(old))
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<(K, V)> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Master changes still waiting for the slave's acknowledgement
    pub fn pending_acks(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Replay current entries as `Add`, then observe changes until `lifetime`
    /// terminates
    pub fn advise<F>(&self, _token: &SchedulerToken, lifetime: &Lifetime, handler: F)
    where
        F: Fn(&MapEvent<K, V>) + Send + Sync + 'static,
    {
        if lifetime.is_terminated() {
            return;
        }
        for (key, value) in self.snapshot() {
            handler(&MapEvent::Add { key, value });
        }
        self.changes.advise(lifetime, handler);
    }

    fn next_local_version(&self, state: &mut MapState<K, V>, key: &K) -> Option<i64> {
        if !self.is_master {
            return None;
        }
        state.next_version += 1;
        let version = state.next_version;
        state.pending.insert(key.clone(), version);
        Some(version)
    }

    /// Local subscribers see the change even when the send fails. A change
    /// that never reached the slave is not left waiting for an Ack.
    fn publish(&self, event: MapEvent<K, V>, version: Option<i64>) -> Result<()> {
        let sent = self.binding.send(self.id, |ctx, buffer| {
            write_header(buffer, event.op(), version);
            event.key().write(ctx, buffer)?;
            match event.new_value() {
                Some(value) => value.write(ctx, buffer),
                None => Ok(()),
            }
        });
        if let (Err(e), Some(version)) = (&sent, version) {
            let mut state = self.state.lock();
            if state.pending.get(event.key()) == Some(&version) {
                state.pending.remove(event.key());
                debug!(
                    entity = %self.id,
                    version,
                    error = %e,
                    "Send failed, change no longer provisional"
                );
            }
        }
        self.changes.fire(&event);
        sent
    }

    fn send_ack(&self, key: &K, version: i64) -> Result<()> {
        trace!(entity = %self.id, version, "Acknowledging change");
        self.binding.send(self.id, |ctx, buffer| {
            write_header(buffer, Op::Ack, Some(version));
            key.write(ctx, buffer)
        })
    }

    fn receive_ack(&self, key: K, version: Option<i64>) {
        if !self.is_master {
            warn!(entity = %self.id, "Ack received by a non-master map, ignored");
            return;
        }
        let Some(version) = version else {
            warn!(entity = %self.id, "Unversioned Ack received, ignored");
            return;
        };

        let mut state = self.state.lock();
        if state.pending.get(&key) == Some(&version) {
            state.pending.remove(&key);
            trace!(entity = %self.id, version, "Provisional change committed");
        } else {
            // A newer local change superseded this version
            trace!(entity = %self.id, version, "Stale Ack ignored");
        }
    }

    fn apply_remote(&self, op: Op, key: K, value: Option<V>) {
        let event = {
            let mut state = self.state.lock();
            match (op, value) {
                (Op::Remove, _) => state
                    .entries
                    .remove(&key)
                    .map(|old| MapEvent::Remove { key, old }),
                (_, Some(value)) => match state.entries.insert(key.clone(), value.clone()) {
                    Some(old) if old == value => None,
                    Some(old) => Some(MapEvent::Update {
                        key,
                        old,
                        new: value,
                    }),
                    None => Some(MapEvent::Add { key, value }),
                },
                (_, None) => None,
            }
        };

        if let Some(event) = event {
            self.changes.fire(&event);
        }
    }
}

fn write_header(buffer: &mut Buffer, op: Op, version: Option<i64>) {
    buffer.write_u8(op.code());
    buffer.write_bool(version.is_some());
    if let Some(version) = version {
        buffer.write_i64(version);
    }
}

impl<K, V> RdBindable for RdMap<K, V>
where
    K: Serializable + Deserializable + Hash + Eq + Clone + Send + Sync + 'static,
    V: Serializable + Deserializable + PartialEq + Clone + Send + Sync + 'static,
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
        let op = Op::from_code(code)
            .ok_or_else(|| CodecError::invalid_tag(code, offset, "map change op"))?;
        let version = if buffer.read_bool()? {
            Some(buffer.read_i64()?)
        } else {
            None
        };
        let key = K::read(ctx, &mut buffer)?;

        if op == Op::Ack {
            self.receive_ack(key, version);
            return Ok(());
        }

        let value = if op.carries_value() {
            Some(V::read(ctx, &mut buffer)?)
        } else {
            None
        };

        let accept = version.is_some()
            || !self.is_master
            || !self.state.lock().pending.contains_key(&key);

        if accept {
            trace!(entity = %self.id, op = op.name(), ?version, "Map change received");
            self.apply_remote(op, key.clone(), value);
        } else {
            debug!(
                entity = %self.id,
                op = op.name(),
                "Discarded remote change for key with provisional local value"
            );
        }

        if let Some(version) = version {
            self.send_ack(&key, version)?;
        }
        Ok(())
    }
}

impl<K: 'static, V: 'static> fmt::Debug for RdMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("RdMap")
            .field("id", &self.id)
            .field("is_master", &self.is_master)
            .field("len", &state.entries.len())
            .field("pending_acks", &state.pending.len())
            .finish()
    }
}
