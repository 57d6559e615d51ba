//! Protocol
//!
//! Connects reactive entities to their mirrors in a peer process.
//!
//! A [`Protocol`] is the per-session context: serializer registry, identity
//! generator, scheduler, wire and connection lifetime. Entities
//! ([`RdSignal`], [`RdSet`], [`RdMap`]) are bound to a protocol with
//! [`RdBindable::bind`]; from then on local changes travel to the mirror with
//! the same id, and the binding ends with the lifetime passed to `bind`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use network::InMemoryWire;
//! use protocol::{Protocol, ProtocolConfig, RdBindable, RdSet};
//! use reactive::{ImmediateScheduler, LifetimeDefinition, Scheduler};
//! use codec::RdId;
//!
//! # fn main() -> protocol::Result<()> {
//! let scheduler: Arc<dyn Scheduler> = Arc::new(ImmediateScheduler::default());
//! let (wire, _peer) = InMemoryWire::pair(scheduler.clone(), scheduler.clone(), &Default::default());
//! let session = LifetimeDefinition::new();
//! let protocol = Protocol::new(ProtocolConfig::default(), scheduler.clone(), wire, &session.lifetime())?;
//!
//! let tags = Arc::new(RdSet::<String>::new(RdId::mix("tags")));
//! tags.bind(&session.lifetime(), &protocol)?;
//! scheduler.invoke(move |token| {
//!     let _ = tags.add(token, "synced".to_string());
//! });
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entities;
pub mod error;
pub mod protocol;

pub use config::{ProtocolConfig, SchedulerKind};
pub use entities::{Binding, RdBindable, RdMap, RdSet, RdSignal};
pub use error::{Error, Result};
pub use protocol::Protocol;
