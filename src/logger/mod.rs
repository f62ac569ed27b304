//! Activity logging: JSONL append-only records written by a dedicated thread.

pub mod activity;
pub mod jsonl;
