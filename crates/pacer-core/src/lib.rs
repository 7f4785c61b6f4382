//! Pacer Core - Adaptive audio pacing and time-stretch pipeline
//!
//! Sits between an emulation core that produces PCM in bursts and an audio
//! device that drains it at a fixed rate. The producer is held to real time
//! by [`pacing`]; a consumer thread stretches tempo so the device queue stays
//! neither empty nor overfull.

pub mod config;
pub mod consumer;
pub mod device;
pub mod error;
pub mod host;
pub mod pacing;
pub mod pipeline;
pub mod queue;
pub mod sink;
pub mod timestretch;
pub mod types;

pub use error::{AudioError, AudioResult, SinkError};
pub use pipeline::{AudioPipeline, Frequencies, PipelineBackends, PipelineState};
pub use types::*;
