// src/pipeline/mod.rs

pub mod event_bus;
pub mod frame_report;
pub mod metrics;
pub mod orchestrator;

pub use event_bus::PipelineEvent;
pub use frame_report::{LogSink, RenderSink};
pub use orchestrator::PipelineOrchestrator;
