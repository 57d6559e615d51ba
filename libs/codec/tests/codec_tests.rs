//! # Codec Integration Tests
//!
//! Exercises the public API the way the protocol layer uses it:
//! - Companion-style types registered once and shared across threads
//! - Nested polymorphic fields resolved through the context
//! - Arbitrary input never panics the decoder

use codec::{
    Buffer, CodecError, Deserializable, Discriminator, IdKind, Identities, Polymorphic, RdId,
    Result, Serializable, SerializationCtx, Serializers,
};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, PartialEq)]
struct TextChange {
    start: i32,
    old_text: String,
    new_text: String,
}

impl Serializable for TextChange {
    fn write(&self, _ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<()> {
        buffer.write_i32(self.start);
        buffer.write_string(&self.old_text)?;
        buffer.write_string(&self.new_text)?;
        Ok(())
    }
}

impl Deserializable for TextChange {
    fn read(_ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<Self> {
        Ok(TextChange {
            start: buffer.read_i32()?,
            old_text: buffer.read_string()?,
            new_text: buffer.read_string()?,
        })
    }
}

/// Envelope whose body is resolved through the registry
#[derive(Debug)]
struct Envelope {
    origin: RdId,
    body: Polymorphic,
}

impl Serializable for Envelope {
    fn write(&self, ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<()> {
        self.origin.write(ctx, buffer)?;
        self.body.write(ctx, buffer)
    }
}

impl Deserializable for Envelope {
    fn read(ctx: &SerializationCtx, buffer: &mut Buffer) -> Result<Self> {
        Ok(Envelope {
            origin: RdId::read(ctx, buffer)?,
            body: Polymorphic::read(ctx, buffer)?,
        })
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

fn context() -> SerializationCtx {
    init_tracing();
    let serializers = Arc::new(Serializers::new());
    serializers
        .register::<TextChange>(Discriminator::of("TextChange"))
        .unwrap();
    serializers
        .register::<Envelope>(Discriminator::of("Envelope"))
        .unwrap();
    SerializationCtx::new(serializers)
}

#[test]
fn test_nested_polymorphic_body() {
    let ctx = context();
    let change = TextChange {
        start: 4,
        old_text: "foo".to_string(),
        new_text: "bar".to_string(),
    };
    let envelope = Envelope {
        origin: RdId::mix("editor"),
        body: Polymorphic::new(change.clone()),
    };

    let mut buffer = Buffer::new();
    ctx.serializers()
        .write(&ctx, &mut buffer, Discriminator::of("Envelope"), &envelope)
        .unwrap();

    let decoded: Envelope = ctx
        .serializers()
        .read(&ctx, &mut buffer, Discriminator::of("Envelope"))
        .unwrap();
    assert_eq!(decoded.origin, RdId::mix("editor"));
    assert_eq!(decoded.body.downcast_ref::<TextChange>(), Some(&change));
    assert!(buffer.is_empty());
}

#[test]
fn test_peers_with_independent_registries_agree() {
    let writer = context();
    let reader = context();
    let change = TextChange {
        start: 0,
        old_text: String::new(),
        new_text: "hello".to_string(),
    };

    let mut buffer = Buffer::new();
    writer
        .serializers()
        .write_polymorphic(&writer, &mut buffer, &change)
        .unwrap();

    let bytes = buffer.freeze();
    let mut incoming = Buffer::from_bytes(bytes);
    let decoded = reader
        .serializers()
        .read_polymorphic(&reader, &mut incoming)
        .unwrap();
    assert_eq!(decoded.downcast_ref::<TextChange>(), Some(&change));
}

#[test]
fn test_missing_registration_on_reader() {
    let writer = context();
    let reader = SerializationCtx::new(Arc::new(Serializers::new()));

    let mut buffer = Buffer::new();
    Polymorphic::new(TextChange {
        start: 1,
        old_text: "a".to_string(),
        new_text: "b".to_string(),
    })
    .write(&writer, &mut buffer)
    .unwrap();

    let err = Polymorphic::read(&reader, &mut buffer).unwrap_err();
    assert_eq!(
        err,
        CodecError::unknown_serializer(Discriminator::of("TextChange").value())
    );
}

#[test]
fn test_registry_shared_across_threads() {
    let ctx = context();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let ctx = ctx.clone();
            thread::spawn(move || {
                for start in 0..250 {
                    let change = TextChange {
                        start: i * 1000 + start,
                        old_text: "x".to_string(),
                        new_text: "y".to_string(),
                    };
                    let mut buffer = Buffer::new();
                    ctx.serializers()
                        .write(&ctx, &mut buffer, Discriminator::of("TextChange"), &change)
                        .unwrap();
                    let decoded: TextChange = ctx
                        .serializers()
                        .read(&ctx, &mut buffer, Discriminator::of("TextChange"))
                        .unwrap();
                    assert_eq!(decoded, change);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_identity_allocation_for_dynamic_entities() {
    let identities = Identities::new(IdKind::Client);
    let parent = RdId::mix("root");
    let child = identities.next_after(parent);
    assert_ne!(child, parent);
    assert!(!child.is_null());
}

proptest! {
    /// Arbitrary bytes are rejected with an error, never a panic
    #[test]
    fn prop_decoding_garbage_never_panics(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let ctx = context();
        let mut buffer = Buffer::from_bytes(bytes.into());
        let _ = Polymorphic::read(&ctx, &mut buffer);

        let mut buffer = Buffer::new();
        buffer.write_raw(&[0, 0, 0, 0]);
        prop_assert!(TextChange::read(&ctx, &mut buffer).is_err());
    }
}
