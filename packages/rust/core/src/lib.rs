//! Content pipeline orchestration and domain logic for ContentForge.
//!
//! This crate ties together knowledge retrieval, prompt assembly, generation
//! and evaluation into the Document → Monitor → Brief → Publish → Iterate
//! stage machine ([`ContentPipeline`]).

pub mod brief;
pub mod feedback;
pub mod pipeline;
pub mod retry;
pub mod run;
pub mod runlog;

pub use feedback::{ContentEvaluator, HeuristicEvaluator, word_count};
pub use pipeline::{ContentPipeline, PipelineObserver, SilentObserver};
pub use retry::RetryPolicy;
pub use run::{
    ContentRequest, FailureKind, FailureReason, MonitorReport, PipelineRun, RunStatus, TopicSource,
};
pub use runlog::RunLog;
