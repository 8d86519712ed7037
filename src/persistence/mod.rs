//! Persistence
//!
//! Append-log staging consumed by the log writer.

mod aof;

pub use aof::{AofBuffer, AofOp};
