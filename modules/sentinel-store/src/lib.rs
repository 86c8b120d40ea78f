//! SQLite-backed repository for SentinelPi.
//!
//! Every unit of work opens its own transaction; the per-cycle commit writes
//! the collected items, their alerts, and the source bookkeeping fields
//! (`last_check` / `last_success` / `consecutive_errors`) atomically.

mod store;

pub use store::{SourceStatusUpdate, Store};
