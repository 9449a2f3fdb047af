//! sortline-agent: wires vision, decision and link together
//!
//! Provides:
//! - The per-frame pipeline (decode, fuse, report, gate, emit)
//! - The inbound event router feeding it
//! - Startup configuration resolution for the `sortline` binary

pub mod error;
pub mod pipeline;
pub mod bootstrap;

pub use error::FrameError;
pub use pipeline::{VisionPipeline, EventRouter, CommandSink, FrameSummary};
pub use bootstrap::{Overrides, resolve_config};
