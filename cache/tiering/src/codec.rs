//! Key and value codecs.
//!
//! Segments store raw bytes; a [`Codec`] converts typed keys and values to and
//! from those bytes. Codecs are resolved by type through a
//! [`SerializationProvider`] when a segment or tier is built, so a missing
//! codec surfaces as [`TierError::UnsupportedType`] before any entry is
//! written.

use crate::error::{TierError, TierResult};
use bytes::Bytes;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Converts a typed value to and from bytes.
pub trait Codec<T>: Send + Sync {
    /// Encode a value.
    fn encode(&self, value: &T) -> Vec<u8>;

    /// Decode a value previously produced by [`Codec::encode`].
    fn decode(&self, bytes: &[u8]) -> TierResult<T>;
}

/// UTF-8 strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct StringCodec;

impl Codec<String> for StringCodec {
    fn encode(&self, value: &String) -> Vec<u8> {
        value.as_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> TierResult<String> {
        String::from_utf8(bytes.to_vec()).map_err(|e| TierError::Codec(e.to_string()))
    }
}

/// Raw byte vectors, stored as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct VecCodec;

impl Codec<Vec<u8>> for VecCodec {
    fn encode(&self, value: &Vec<u8>) -> Vec<u8> {
        value.clone()
    }

    fn decode(&self, bytes: &[u8]) -> TierResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}

/// Shared byte buffers.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesCodec;

impl Codec<Bytes> for BytesCodec {
    fn encode(&self, value: &Bytes) -> Vec<u8> {
        value.to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> TierResult<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

macro_rules! int_codec {
    ($name:ident, $ty:ty) => {
        #[doc = concat!("Little-endian `", stringify!($ty), "`.")]
        #[derive(Debug, Default, Clone, Copy)]
        pub struct $name;

        impl Codec<$ty> for $name {
            fn encode(&self, value: &$ty) -> Vec<u8> {
                value.to_le_bytes().to_vec()
            }

            fn decode(&self, bytes: &[u8]) -> TierResult<$ty> {
                let raw: [u8; std::mem::size_of::<$ty>()] = bytes.try_into().map_err(|_| {
                    TierError::Codec(format!(
                        "expected {} bytes for {}, got {}",
                        std::mem::size_of::<$ty>(),
                        stringify!($ty),
                        bytes.len()
                    ))
                })?;
                Ok(<$ty>::from_le_bytes(raw))
            }
        }
    };
}

int_codec!(U32Codec, u32);
int_codec!(U64Codec, u64);
int_codec!(I64Codec, i64);

/// Type-indexed codec registry.
///
/// [`SerializationProvider::default`] knows `String`, `Vec<u8>`, `Bytes`,
/// `u32`, `u64` and `i64`. Other types must be registered before use.
pub struct SerializationProvider {
    codecs: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Default for SerializationProvider {
    fn default() -> Self {
        let mut provider = Self::empty();
        provider.register::<String>(Arc::new(StringCodec));
        provider.register::<Vec<u8>>(Arc::new(VecCodec));
        provider.register::<Bytes>(Arc::new(BytesCodec));
        provider.register::<u32>(Arc::new(U32Codec));
        provider.register::<u64>(Arc::new(U64Codec));
        provider.register::<i64>(Arc::new(I64Codec));
        provider
    }
}

impl SerializationProvider {
    /// Create a provider with no codecs registered.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register (or replace) the codec for `T`.
    pub fn register<T: 'static>(&mut self, codec: Arc<dyn Codec<T>>) {
        self.codecs.insert(TypeId::of::<T>(), Box::new(codec));
    }

    /// Look up the codec for `T`.
    pub fn codec<T: 'static>(&self) -> TierResult<Arc<dyn Codec<T>>> {
        self.codecs
            .get(&TypeId::of::<T>())
            .and_then(|codec| codec.downcast_ref::<Arc<dyn Codec<T>>>())
            .cloned()
            .ok_or(TierError::UnsupportedType(std::any::type_name::<T>()))
    }
}

impl std::fmt::Debug for SerializationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerializationProvider")
            .field("codecs", &self.codecs.len())
            .finish()
    }
}
