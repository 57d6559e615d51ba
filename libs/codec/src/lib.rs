//! # Codec
//!
//! Byte-level building blocks shared by both peers of a connection.
//!
//! ## Components
//!
//! - [`Buffer`]: little-endian primitives and length-prefixed strings over `bytes`
//! - [`Serializable`] / [`Deserializable`]: values that own their byte layout
//! - [`Serializers`]: discriminator-keyed registry for type-erased encoding,
//!   including polymorphic values that carry their discriminator in-stream
//! - [`RdId`] / [`Identities`]: entity addressing and id allocation
//!
//! ## What This Crate Does NOT Contain
//!
//! - Framing or transports (belongs in `network`)
//! - Entity semantics (belongs in `protocol`)

pub mod buffer;
pub mod error;
pub mod identity;
pub mod serializable;
pub mod serializers;

pub use buffer::Buffer;
pub use error::{CodecError, Result};
pub use identity::{IdKind, Identities, RdId};
pub use serializable::{Deserializable, Polymorphic, Serializable, SerializationCtx};
pub use serializers::{Discriminator, Serializers};
