//! # Reactive Core
//!
//! Resource-ownership and execution primitives shared by every layer of the
//! synchronization stack.
//!
//! ## Architecture
//!
//! - **Lifetimes**: [`LifetimeDefinition`] owns a termination scope, [`Lifetime`]
//!   handles register cleanup against it. Termination unwinds nested scopes
//!   first, then the scope's own actions in reverse registration order.
//! - **Schedulers**: serial execution contexts. Running tasks receive a
//!   [`SchedulerToken`] that gates every entity mutation.
//! - **Signals**: lifetime-scoped subscriptions ([`Signal`], [`Property`]).
//! - **Viewable changes**: the [`Op`] and [`AddRemove`] change vocabulary.
//!
//! ## Example
//!
//! ```rust
//! use reactive::LifetimeDefinition;
//!
//! let definition = LifetimeDefinition::new();
//! let lifetime = definition.lifetime();
//! lifetime.add_action(|| println!("released")).unwrap();
//! definition.terminate().unwrap();
//! assert!(lifetime.is_terminated());
//! ```

pub mod error;
pub mod lifetime;
pub mod scheduler;
pub mod signal;
pub mod viewable;
pub mod void;

pub use error::{LifetimeError, Result};
pub use lifetime::{
    reset_lifetime_ids, ActionId, Lifetime, LifetimeDefinition, LifetimeStatus,
    SequentialLifetimes,
};
pub use scheduler::{
    ImmediateScheduler, ManualScheduler, Scheduler, SchedulerToken, SingleThreadScheduler, Task,
};
pub use signal::{Property, Signal};
pub use viewable::{AddRemove, MapEvent, Op, SetEvent};
pub use void::Void;
