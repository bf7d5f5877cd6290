//! Durability Module
//!
//! Append-only command log with crash replay.

mod aof;
mod record;

pub use aof::{apply_record, replay, AofLog, ReplayStats};
pub use record::LogRecord;
pub(crate) use record::text_value;
