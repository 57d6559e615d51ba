//! Serializer Registry
//!
//! Maps a [`Discriminator`] to a pair of type-erased write/read functions so
//! values can be encoded without compile-time knowledge of their type. Both
//! peers register the same discriminators independently; matching
//! discriminators mean matching decode logic.
//!
//! The registry has its own lock. Registered functions are cloned out before
//! they run, so a serializer may recurse into the registry for nested
//! polymorphic fields.

use crate::buffer::Buffer;
use crate::error::{CodecError, Result};
use crate::identity::stable_hash;
use crate::serializable::{Deserializable, Serializable, SerializationCtx};
use parking_lot::RwLock;
use std::any::{self, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const DISCRIMINATOR_SEED: i64 = 19;

/// Registry key for one serializable type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Discriminator(i64);

impl Discriminator {
    pub const fn new(value: i64) -> Self {
        Discriminator(value)
    }

    /// Discriminator derived from a type name
    pub fn of(name: &str) -> Self {
        Discriminator(stable_hash(DISCRIMINATOR_SEED, name))
    }

    pub const fn value(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

type WriteFn = dyn Fn(&SerializationCtx, &mut Buffer, &dyn Any) -> Result<()> + Send + Sync;
type ReadFn = dyn Fn(&SerializationCtx, &mut Buffer) -> Result<Box<dyn Any + Send>> + Send + Sync;

struct Entry {
    type_id: TypeId,
    type_name: &'static str,
    write: Arc<WriteFn>,
    read: Arc<ReadFn>,
}

#[derive(Default)]
struct Table {
    entries: HashMap<Discriminator, Entry>,
    by_type: HashMap<TypeId, Discriminator>,
}

/// Discriminator-keyed serializer registry
#[derive(Default)]
pub struct Serializers {
    table: RwLock<Table>,
}

impl Serializers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type that knows its own byte layout
    pub fn register<T>(&self, discriminator: Discriminator) -> Result<()>
    where
        T: Serializable + Deserializable + Any + Send,
    {
        self.register_fn::<T, _, _>(
            discriminator,
            |ctx, buffer, value| value.write(ctx, buffer),
            T::read,
        )
    }

    /// Register a raw write/read function pair for `T`
    ///
    /// Registering a discriminator or a type twice fails with
    /// [`CodecError::DuplicateRegistration`].
    pub fn register_fn<T, W, R>(&self, discriminator: Discriminator, write: W, read: R) -> Result<()>
    where
        T: Any + Send,
        W: Fn(&SerializationCtx, &mut Buffer, &T) -> Result<()> + Send + Sync + 'static,
        R: Fn(&SerializationCtx, &mut Buffer) -> Result<T> + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<T>();
        let type_name = any::type_name::<T>();

        let write: Arc<WriteFn> = Arc::new(
            move |ctx: &SerializationCtx, buffer: &mut Buffer, value: &dyn Any| match value
                .downcast_ref::<T>()
            {
                Some(value) => write(ctx, buffer, value),
                None => Err(CodecError::type_mismatch(
                    discriminator.value(),
                    type_name,
                    "foreign value",
                )),
            },
        );
        let read: Arc<ReadFn> = Arc::new(move |ctx: &SerializationCtx, buffer: &mut Buffer| {
            read(ctx, buffer).map(|value| Box::new(value) as Box<dyn Any + Send>)
        });

        let mut table = self.table.write();
        if table.entries.contains_key(&discriminator) || table.by_type.contains_key(&type_id) {
            return Err(CodecError::duplicate_registration(
                discriminator.value(),
                type_name,
            ));
        }
        table.entries.insert(
            discriminator,
            Entry {
                type_id,
                type_name,
                write,
                read,
            },
        );
        table.by_type.insert(type_id, discriminator);

        debug!(%discriminator, type_name, "Registered serializer");
        Ok(())
    }

    /// Encode `value` with the serializer registered under `discriminator`
    pub fn write<T: Any>(
        &self,
        ctx: &SerializationCtx,
        buffer: &mut Buffer,
        discriminator: Discriminator,
        value: &T,
    ) -> Result<()> {
        let write = {
            let table = self.table.read();
            let entry = table
                .entries
                .get(&discriminator)
                .ok_or_else(|| CodecError::unknown_serializer(discriminator.value()))?;
            if entry.type_id != TypeId::of::<T>() {
                return Err(CodecError::type_mismatch(
                    discriminator.value(),
                    entry.type_name,
                    any::type_name::<T>(),
                ));
            }
            Arc::clone(&entry.write)
        };
        write(ctx, buffer, value as &dyn Any)
    }

    /// Decode a value of whatever type is registered under `discriminator`
    pub fn read_any(
        &self,
        ctx: &SerializationCtx,
        buffer: &mut Buffer,
        discriminator: Discriminator,
    ) -> Result<Box<dyn Any + Send>> {
        let read = {
            let table = self.table.read();
            let entry = table
                .entries
                .get(&discriminator)
                .ok_or_else(|| CodecError::unknown_serializer(discriminator.value()))?;
            Arc::clone(&entry.read)
        };
        read(ctx, buffer)
    }

    /// Decode a `T` registered under `discriminator`
    pub fn read<T: Any>(
        &self,
        ctx: &SerializationCtx,
        buffer: &mut Buffer,
        discriminator: Discriminator,
    ) -> Result<T> {
        let read = {
            let table = self.table.read();
            let entry = table
                .entries
                .get(&discriminator)
                .ok_or_else(|| CodecError::unknown_serializer(discriminator.value()))?;
            if entry.type_id != TypeId::of::<T>() {
                return Err(CodecError::type_mismatch(
                    discriminator.value(),
                    entry.type_name,
                    any::type_name::<T>(),
                ));
            }
            Arc::clone(&entry.read)
        };

        let value = read(ctx, buffer)?;
        value.downcast::<T>().map(|value| *value).map_err(|_| {
            CodecError::type_mismatch(discriminator.value(), "decoded value", any::type_name::<T>())
        })
    }

    /// Write the value's discriminator followed by its body
    pub fn write_polymorphic(
        &self,
        ctx: &SerializationCtx,
        buffer: &mut Buffer,
        value: &dyn Any,
    ) -> Result<()> {
        let (discriminator, write) = {
            let table = self.table.read();
            let discriminator = *table
                .by_type
                .get(&value.type_id())
                .ok_or_else(|| CodecError::unregistered_type(format!("{:?}", value.type_id())))?;
            let entry = table
                .entries
                .get(&discriminator)
                .ok_or_else(|| CodecError::unknown_serializer(discriminator.value()))?;
            (discriminator, Arc::clone(&entry.write))
        };

        buffer.write_i64(discriminator.value());
        write(ctx, buffer, value)
    }

    /// Read an in-stream discriminator and decode the value that follows
    pub fn read_polymorphic(
        &self,
        ctx: &SerializationCtx,
        buffer: &mut Buffer,
    ) -> Result<Box<dyn Any + Send>> {
        let discriminator = Discriminator(buffer.read_i64()?);
        self.read_any(ctx, buffer, discriminator)
    }

    pub fn contains(&self, discriminator: Discriminator) -> bool {
        self.table.read().entries.contains_key(&discriminator)
    }

    /// Discriminator registered for `T`, if any
    pub fn discriminator_of<T: Any>(&self) -> Option<Discriminator> {
        self.table.read().by_type.get(&TypeId::of::<T>()).copied()
    }

    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Serializers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializers")
            .field("registered", &self.len())
            .finish()
    }
}
