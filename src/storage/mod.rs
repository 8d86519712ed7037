//! Storage Engine
//!
//! Logical databases with access metadata and expiring-key tracking.

mod db;
pub(crate) mod object;

pub use db::{AccessMode, Db, SampleSource};
pub use object::{AccessMeta, Object, ENTRY_OVERHEAD};
