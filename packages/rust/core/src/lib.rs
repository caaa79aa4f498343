//! Pipeline orchestration for khub.
//!
//! This crate ties the crawler and the staging store into the ten-step
//! knowledge pipeline:
//! - [`step`]: the fixed step sequence and run configuration
//! - [`pipeline`]: orchestrator, watchdog and run report
//! - [`steps`]: what each step does
//! - [`host`]: staging store session and optional hosting process
//! - [`export`]: namespace export to JSON files

pub mod export;
pub mod host;
pub mod pipeline;
pub mod step;
pub mod steps;

use std::time::Duration;

use khub_shared::AppConfig;

pub use pipeline::{
    Orchestrator, PipelineReport, PipelineState, StepExecutor, StepOutcome, StepRecord, Watchdog,
};
pub use step::{PipelineRunConfig, PipelineStep};
pub use steps::{KnowledgeSteps, Namespaces};

/// Run the pipeline with the production executor and watchdog.
pub async fn run_pipeline(config: AppConfig, run: &PipelineRunConfig) -> PipelineReport {
    let watchdog = Watchdog::new(Duration::from_secs(config.pipeline.watchdog_secs));
    let mut orchestrator = Orchestrator::new(KnowledgeSteps::new(config), watchdog);
    orchestrator.run(run).await
}
