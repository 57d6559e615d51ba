//! Protocol context
//!
//! A [`Protocol`] bundles what every bound entity needs to talk to its mirror:
//! the serializer registry, the identity generator, the scheduler inbound
//! changes run on, the wire, and the connection lifetime. It is created once
//! per session and shared by `Arc`.

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use bytes::Bytes;
use codec::{Identities, RdId, SerializationCtx, Serializers};
use network::{Wire, WireStatus};
use reactive::{Lifetime, LifetimeError, Scheduler};
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Protocol {
    config: ProtocolConfig,
    ctx: SerializationCtx,
    identities: Identities,
    scheduler: Arc<dyn Scheduler>,
    wire: Arc<dyn Wire>,
    lifetime: Lifetime,
}

impl Protocol {
    /// Create a protocol with an empty serializer registry
    pub fn new(
        config: ProtocolConfig,
        scheduler: Arc<dyn Scheduler>,
        wire: Arc<dyn Wire>,
        lifetime: &Lifetime,
    ) -> Result<Arc<Self>> {
        Self::with_serializers(
            config,
            Arc::new(Serializers::new()),
            scheduler,
            wire,
            lifetime,
        )
    }

    /// Create a protocol sharing an already populated serializer registry
    ///
    /// Fails if the configuration is invalid or `lifetime` has already
    /// terminated.
    pub fn with_serializers(
        config: ProtocolConfig,
        serializers: Arc<Serializers>,
        scheduler: Arc<dyn Scheduler>,
        wire: Arc<dyn Wire>,
        lifetime: &Lifetime,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        if lifetime.is_terminated() {
            return Err(LifetimeError::already_terminated(lifetime.id()).into());
        }

        let name = config.name.clone();
        wire.status().change().advise(lifetime, move |status: &WireStatus| match status {
            WireStatus::Disconnected { reason } => {
                warn!(protocol = %name, reason = %reason, "Protocol lost its wire")
            }
            other => info!(protocol = %name, status = %other, "Wire status changed"),
        });

        info!(
            protocol = %config.name,
            id_kind = ?config.id_kind,
            scheduler = scheduler.name(),
            "Protocol created"
        );

        Ok(Arc::new(Self {
            identities: Identities::new(config.id_kind),
            ctx: SerializationCtx::new(serializers),
            config,
            scheduler,
            wire,
            lifetime: lifetime.clone(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn serializers(&self) -> &Arc<Serializers> {
        self.ctx.serializers()
    }

    pub fn serialization_ctx(&self) -> &SerializationCtx {
        &self.ctx
    }

    pub fn identities(&self) -> &Identities {
        &self.identities
    }

    /// Allocate an id for a dynamically created entity
    pub fn next_id(&self) -> RdId {
        self.identities.next()
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn wire(&self) -> &Arc<dyn Wire> {
        &self.wire
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }

    pub fn is_connected(&self) -> bool {
        self.wire.is_connected()
    }

    /// Send an entity payload to the remote mirror of `id`
    pub fn send(&self, id: RdId, payload: Bytes) -> Result<()> {
        self.wire.send(id, payload).map_err(Error::from)
    }
}

impl fmt::Debug for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Protocol")
            .field("name", &self.config.name)
            .field("scheduler", &self.scheduler.name())
            .field("lifetime", &self.lifetime.id())
            .field("serializers", &self.serializers().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::IdKind;
    use network::InMemoryWire;
    use reactive::{ImmediateScheduler, LifetimeDefinition};

    fn wires() -> (Arc<InMemoryWire>, Arc<InMemoryWire>) {
        InMemoryWire::pair(
            Arc::new(ImmediateScheduler::new("a")),
            Arc::new(ImmediateScheduler::new("b")),
            &Default::default(),
        )
    }

    #[test]
    fn test_rejects_terminated_lifetime() {
        let (a, _b) = wires();
        let definition = LifetimeDefinition::new();
        definition.terminate().unwrap();

        let err = Protocol::new(
            ProtocolConfig::default(),
            Arc::new(ImmediateScheduler::default()),
            a,
            &definition.lifetime(),
        )
        .unwrap_err();
        assert_eq!(err.category(), "already_terminated");
    }

    #[test]
    fn test_identities_follow_configured_kind() {
        let (a, _b) = wires();
        let definition = LifetimeDefinition::new();
        let config = ProtocolConfig {
            id_kind: IdKind::Server,
            ..ProtocolConfig::default()
        };
        let protocol = Protocol::new(
            config,
            Arc::new(ImmediateScheduler::default()),
            a,
            &definition.lifetime(),
        )
        .unwrap();

        assert_eq!(protocol.next_id().value() % 2, 0);
        assert!(protocol.is_connected());
        assert_eq!(protocol.lifetime(), &definition.lifetime());
    }

    #[test]
    fn test_send_after_disconnect_fails() {
        let (a, b) = wires();
        let definition = LifetimeDefinition::new();
        let protocol = Protocol::new(
            ProtocolConfig::default(),
            Arc::new(ImmediateScheduler::default()),
            a.clone(),
            &definition.lifetime(),
        )
        .unwrap();

        b.disconnect("test");
        assert!(!protocol.is_connected());
        let err = protocol.send(RdId::of(1), Bytes::new()).unwrap_err();
        assert_eq!(err.category(), "disconnected");
    }
}
