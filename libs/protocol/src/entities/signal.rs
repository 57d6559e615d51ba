//! Synchronized signal

use super::{Binding, RdBindable};
use crate::error::Result;
use codec::{Buffer, Deserializable, RdId, Serializable, SerializationCtx};
use reactive::{Lifetime, SchedulerToken, Signal};
use std::fmt;
use tracing::trace;

/// Event stream fired on either side and observed on both
pub struct RdSignal<T: 'static> {
    id: RdId,
    binding: Binding,
    local: Signal<T>,
}

impl<T> RdSignal<T>
where
    T: Serializable + Deserializable + Send + Sync + 'static,
{
    pub fn new(id: RdId) -> Self {
        Self {
            id,
            binding: Binding::new(),
            local: Signal::new(),
        }
    }

    /// Send `value` to the mirror, then deliver it to local subscribers
    ///
    /// Local subscribers see the value even when the send fails; the send
    /// error is returned afterwards.
    pub fn fire(&self, _token: &SchedulerToken, value: T) -> Result<()> {
        let sent = self
            .binding
            .send(self.id, |ctx, buffer| value.write(ctx, buffer));
        self.local.fire(&value);
        sent
    }

    /// Observe values fired on either side until `lifetime` terminates
    pub fn advise<F>(&self, lifetime: &Lifetime, handler: F)
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.local.advise(lifetime, handler);
    }
}

impl<T> RdBindable for RdSignal<T>
where
    T: Serializable + Deserializable + Send + Sync + 'static,
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
        let value = T::read(ctx, &mut buffer)?;
        trace!(entity = %self.id, "Signal received");
        self.local.fire(&value);
        Ok(())
    }
}

impl<T: 'static> fmt::Debug for RdSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RdSignal")
            .field("id", &self.id)
            .field("binding", &self.binding)
            .finish()
    }
}
