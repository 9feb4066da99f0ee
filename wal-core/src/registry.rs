//! The type-tag to codec mapping a [`crate::Wal`](../wal/struct.Wal.html)
//! is opened with.

use crate::entry::PayloadCodec;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Maps an 8-bit type tag to the codec that reads and decodes it.
///
/// A `Registry` is built once by the host and handed to [`crate`]'s WAL
/// coordinator at open time; it holds no per-WAL state and can be reused
/// across multiple WAL instances (e.g. in tests that open many temporary
/// logs against the same set of record types).
#[derive(Clone, Default)]
pub struct Registry {
    codecs: HashMap<u8, Arc<dyn PayloadCodec>>,
}

impl Registry {
    /// An empty registry. Reading any entry before a codec is registered
    /// for its tag fails with [`Error::UnknownType`].
    pub fn new() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Registers `codec` under its own [`PayloadCodec::type_tag`].
    ///
    /// Registering a second codec under a tag already in use replaces the
    /// first; this mirrors a plain `HashMap::insert` and is intentionally
    /// permissive, since hosts may re-register codecs while iterating in a
    /// REPL or test harness.
    pub fn register(&mut self, codec: impl PayloadCodec + 'static) {
        self.codecs.insert(codec.type_tag(), Arc::new(codec));
    }

    /// Looks up the codec for `type_tag`, failing with
    /// [`Error::UnknownType`] if none was registered.
    pub fn get(&self, type_tag: u8) -> Result<&Arc<dyn PayloadCodec>> {
        self.codecs
            .get(&type_tag)
            .ok_or(Error::UnknownType(type_tag))
    }
}
