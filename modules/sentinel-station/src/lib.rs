//! SentinelPi station: application context, scheduler, per-source pipeline,
//! and OPML import/export. The binary in `main.rs` wires these together.

pub mod app;
pub mod opml;
pub mod pipeline;
pub mod scheduler;
