//! Segment writer/reader, meta index manager, and the WAL coordinator that
//! ties them together into a durable, append-only log.
//!
//! Leaves-first dependency order: [`buffered_writer`] underlies
//! [`segment`], both of which the [`meta`] index manager and the
//! [`coordinator`]'s [`Wal`] build on.

pub mod buffered_writer;
pub mod coordinator;
pub mod meta;
pub mod segment;

pub use coordinator::{Wal, WalOptions};
pub use meta::MetaOptions;
