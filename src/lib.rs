//! Durable WAL — an embeddable, crash-safe write-ahead log.
//!
//! This crate is a thin umbrella over the two crates that do the actual
//! work:
//!
//! - [`wal_core`] — error types, the entry codec trait and the type-tag
//!   registry shared by the rest of the stack.
//! - [`wal`] — the segment writer/reader, the meta index manager, and the
//!   [`wal::Wal`] coordinator that ties them together.
//!
//! Most hosts only need:
//!
//! ```no_run
//! use durable_wal::{Wal, WalOptions};
//! use durable_wal::core::Registry;
//!
//! # async fn run() -> durable_wal::core::Result<()> {
//! let registry = Registry::new();
//! let wal = Wal::open("path/to/wal-dir", registry, WalOptions::default()).await?;
//! # Ok(())
//! # }
//! ```

pub use wal::{Wal, WalOptions};
pub use wal_core as core;
