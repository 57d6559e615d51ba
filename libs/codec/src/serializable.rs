//! Value serialization contract
//!
//! A value owns its byte layout: [`Serializable::write`] appends it to a buffer
//! and [`Deserializable::read`] rebuilds it. The context gives nested values
//! access to the serializer registry for polymorphic fields.

use crate::buffer::Buffer;
use crate::error::Result;
use crate::identity::RdId;
use crate::serializers::Serializers;
use bytes::Bytes;
use reactive::Void;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared state available while encoding or decoding
#[derive(Clone, Debug)]
pub struct SerializationCtx {
    serializers: Arc<Serializers>,
}

impl SerializationCtx {
    pub fn new(serializers: Arc<Serializers>) -> Self {
        Self { serializers }
    }

    pub fn serializers(&self) -> &Arc<Serializers> {
        &self.serializers
    }
}

pub trait Serializable {
    fn write(&self, ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<()>;
}

pub trait Deserializable: Sized {
    fn read(ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<Self>;
}

macro_rules! primitive {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Serializable for $ty {
            fn write(&self, _ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<()> {
                buffer.$write(*self);
                Ok(())
            }
        }

        impl Deserializable for $ty {
            fn read(_ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<Self> {
                buffer.$read()
            }
        }
    };
}

primitive!(u8, write_u8, read_u8);
primitive!(bool, write_bool, read_bool);
primitive!(i32, write_i32, read_i32);
primitive!(i64, write_i64, read_i64);
primitive!(u64, write_u64, read_u64);
primitive!(f64, write_f64, read_f64);

impl Serializable for String {
    fn write(&self, _ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<()> {
        buffer.write_string(self)
    }
}

impl Deserializable for String {
    fn read(_ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<Self> {
        buffer.read_string()
    }
}

impl Serializable for Vec<u8> {
    fn write(&self, _ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<()> {
        buffer.write_bytes(self)
    }
}

impl Deserializable for Vec<u8> {
    fn read(_ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<Self> {
        Ok(buffer.read_bytes()?.to_vec())
    }
}

impl Serializable for Bytes {
    fn write(&self, _ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<()> {
        buffer.write_bytes(self)
    }
}

impl Deserializable for Bytes {
    fn read(_ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<Self> {
        buffer.read_bytes()
    }
}

// Void occupies zero bytes
impl Serializable for Void {
    fn write(&self, _ctx: &SerializationCtx, _buffer: &mut Buffer) -> Result<()> {
        Ok(())
    }
}

impl Deserializable for Void {
    fn read(_ctx: &SerializationCtx, _buffer: &mut Buffer) -> Result<Self> {
        Ok(Void)
    }
}

impl Serializable for RdId {
    fn write(&self, _ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<()> {
        buffer.write_i64(self.value());
        Ok(())
    }
}

impl Deserializable for RdId {
    fn read(_ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<Self> {
        Ok(RdId::of(buffer.read_i64()?))
    }
}

impl<T: Serializable> Serializable for Option<T> {
    fn write(&self, ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<()> {
        match self {
            Some(value) => {
                buffer.write_bool(true);
                value.write(ctx, buffer)
            }
            None => {
                buffer.write_bool(false);
                Ok(())
            }
        }
    }
}

impl<T: Deserializable> Deserializable for Option<T> {
    fn read(ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<Self> {
        if buffer.read_bool()? {
            Ok(Some(T::read(ctx, buffer)?))
        } else {
            Ok(None)
        }
    }
}

/// Value of any registered type, written with its discriminator in-stream
pub struct Polymorphic {
    value: Box<dyn Any + Send>,
}

impl Polymorphic {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            value: Box::new(value),
        }
    }

    pub(crate) fn from_boxed(value: Box<dyn Any + Send>) -> Self {
        Self { value }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    pub fn into_inner(self) -> Box<dyn Any + Send> {
        self.value
    }
}

impl fmt::Debug for Polymorphic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Polymorphic(..)")
    }
}

impl Serializable for Polymorphic {
    fn write(&self, ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<()> {
        ctx.serializers()
            .write_polymorphic(ctx, buffer, self.value.as_ref())
    }
}

impl Deserializable for Polymorphic {
    fn read(ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<Self> {
        Ok(Polymorphic::from_boxed(
            ctx.serializers().read_polymorphic(ctx, buffer)?,
        ))
    }
}
