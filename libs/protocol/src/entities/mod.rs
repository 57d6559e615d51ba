//! Synchronized entities
//!
//! Each entity has a mirror with the same [`RdId`] on the remote side. Local
//! mutations require a [`SchedulerToken`](reactive::SchedulerToken), are
//! applied immediately, and are sent to the mirror once the entity is bound.
//! Inbound changes are applied and published to local subscribers but never
//! sent back.

mod map;
mod set;
mod signal;

pub use map::RdMap;
pub use set::RdSet;
pub use signal::RdSignal;

use crate::error::{Error, Result};
use crate::protocol::Protocol;
use codec::{Buffer, RdId, SerializationCtx};
use parking_lot::Mutex;
use reactive::{Lifetime, LifetimeError, SchedulerToken};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Protocol an entity is currently bound to
///
/// Installed by [`RdBindable::bind`] and cleared when the binding lifetime
/// terminates. An unbound entity behaves as a purely local container.
#[derive(Default)]
pub struct Binding {
    slot: Arc<Mutex<Option<Arc<Protocol>>>>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protocol(&self) -> Option<Arc<Protocol>> {
        self.slot.lock().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.slot.lock().is_some()
    }

    fn install(&self, id: RdId, lifetime: &Lifetime, protocol: &Arc<Protocol>) -> Result<()> {
        if self.is_bound() {
            return Err(Error::AlreadyBound { id });
        }

        let slot = Arc::clone(&self.slot);
        let weak = Arc::downgrade(&self.slot);
        let protocol = Arc::clone(protocol);
        lifetime
            .bracket(
                move || *slot.lock() = Some(protocol),
                move || {
                    if let Some(slot) = weak.upgrade() {
                        let unbound = slot.lock().take();
                        drop(unbound);
                        debug!(entity = %id, "Entity unbound");
                    }
                },
            )
            .ok_or_else(|| LifetimeError::already_terminated(lifetime.id()).into())
    }

    /// Serialize a change with `write` and send it to the mirror of `id`
    ///
    /// Does nothing while unbound.
    pub(crate) fn send<F>(&self, id: RdId, write: F) -> Result<()>
    where
        F: FnOnce(&SerializationCtx, &mut Buffer) -> codec::Result<()>,
    {
        let Some(protocol) = self.protocol() else {
            trace!(entity = %id, "Entity not bound, change kept local");
            return Ok(());
        };

        let mut buffer = Buffer::new();
        write(protocol.serialization_ctx(), &mut buffer)?;
        protocol.send(id, buffer.freeze())
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.protocol() {
            Some(protocol) => write!(f, "Binding({})", protocol.name()),
            None => f.write_str("Binding(unbound)"),
        }
    }
}

/// Entity that can be connected to its remote mirror through a [`Protocol`]
pub trait RdBindable: Send + Sync + 'static {
    fn rd_id(&self) -> RdId;

    fn binding(&self) -> &Binding;

    /// Apply a change received from the mirror
    fn on_wire_received(
        &self,
        token: &SchedulerToken,
        ctx: &SerializationCtx,
        buffer: Buffer,
    ) -> Result<()>;

    /// Connect this entity to `protocol` until `lifetime` terminates
    ///
    /// Changes the mirror sent before binding are delivered once bound.
    fn bind(self: &Arc<Self>, lifetime: &Lifetime, protocol: &Arc<Protocol>) -> Result<()>
    where
        Self: Sized,
    {
        let id = self.rd_id();
        self.binding().install(id, lifetime, protocol)?;

        let entity = Arc::downgrade(self);
        let ctx = protocol.serialization_ctx().clone();
        protocol.wire().advise(
            lifetime,
            id,
            Arc::new(move |token: &SchedulerToken, buffer: Buffer| {
                let Some(entity) = entity.upgrade() else {
                    return;
                };
                if !entity.binding().is_bound() {
                    trace!(entity = %id, "Entity unbound, inbound change dropped");
                    return;
                }
                if let Err(e) = entity.on_wire_received(token, &ctx, buffer) {
                    error!(
                        entity = %id,
                        error = %e,
                        category = e.category(),
                        "Failed to apply inbound change"
                    );
                }
            }),
        );

        debug!(entity = %id, protocol = protocol.name(), "Entity bound");
        Ok(())
    }
}
