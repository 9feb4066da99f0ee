//! Shared types for the durable write-ahead log stack.
//!
//! This crate has no filesystem code of its own; it exists so that the
//! error type, the entry/codec traits, and the registry can be depended on
//! independently of the segment and meta-index implementation in `wal`.

pub mod entry;
pub mod error;
pub mod registry;

pub use entry::{Entry, EntryPayload, PayloadCodec};
pub use error::{Error, Result};
pub use registry::Registry;
