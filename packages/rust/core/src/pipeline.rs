//! Step orchestration: run the pipeline from an entry step, one step at a
//! time, under a per-step wall-clock watchdog.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::step::{PipelineRunConfig, PipelineStep};

/// Runs individual steps. Implementations own whatever the steps share
/// (e.g. the staging store connection).
#[async_trait]
pub trait StepExecutor: Send {
    /// Run one step and report whether it succeeded.
    async fn execute(&mut self, step: PipelineStep) -> bool;

    /// Release shared resources at the end of a run.
    async fn release(&mut self) {}
}

/// How long a breached run may spend releasing its resources.
const RELEASE_GRACE: Duration = Duration::from_secs(10);

/// Called when a step outlives the watchdog ceiling.
pub type TerminateHook = Arc<dyn Fn(PipelineStep, Duration) + Send + Sync>;

/// Per-step wall-clock ceiling.
#[derive(Clone)]
pub struct Watchdog {
    ceiling: Duration,
    terminate: TerminateHook,
}

impl Watchdog {
    /// A watchdog that exits the process with code 1 on breach.
    ///
    /// Exiting skips destructors, so the orchestrator drops the step and
    /// releases the executor (stopping a store host it started) before the
    /// hook runs.
    pub fn new(ceiling: Duration) -> Self {
        Self::with_terminate(
            ceiling,
            Arc::new(|step, ceiling| {
                error!(
                    step = %step,
                    ceiling_secs = ceiling.as_secs(),
                    "step exceeded the watchdog ceiling, terminating"
                );
                std::process::exit(1);
            }),
        )
    }

    /// A watchdog with a custom breach action.
    pub fn with_terminate(ceiling: Duration, terminate: TerminateHook) -> Self {
        Self { ceiling, terminate }
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("ceiling", &self.ceiling)
            .finish_non_exhaustive()
    }
}

/// Where the run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Running(PipelineStep),
    Finished,
    Failed(PipelineStep),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

/// One visited step.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub step: PipelineStep,
    pub outcome: StepOutcome,
    pub duration: Duration,
}

/// What a run did.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub steps: Vec<StepRecord>,
    pub state: PipelineState,
    pub elapsed: Duration,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.state == PipelineState::Finished
    }

    /// Visited steps, in order.
    pub fn visited(&self) -> Vec<PipelineStep> {
        self.steps.iter().map(|record| record.step).collect()
    }
}

/// Drives a [`StepExecutor`] through the step sequence.
pub struct Orchestrator<E> {
    executor: E,
    watchdog: Watchdog,
}

impl<E: StepExecutor> Orchestrator<E> {
    pub fn new(executor: E, watchdog: Watchdog) -> Self {
        Self { executor, watchdog }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Run from the configured entry step until the sequence ends, a step
    /// fails, or (in run-only mode) the entry step is done.
    pub async fn run(&mut self, run_config: &PipelineRunConfig) -> PipelineReport {
        let start = Instant::now();
        let mut steps = Vec::new();
        let mut state = PipelineState::Running(run_config.entry());

        info!(
            entry = %run_config.entry(),
            run_all = run_config.run_all(),
            "pipeline started"
        );

        while let PipelineState::Running(step) = state {
            let record = self.run_step(step).await;
            state = match record.outcome {
                StepOutcome::Succeeded => match step.next() {
                    Some(next) if run_config.run_all() => PipelineState::Running(next),
                    _ => PipelineState::Finished,
                },
                StepOutcome::Failed | StepOutcome::TimedOut => PipelineState::Failed(step),
            };
            steps.push(record);
        }

        self.executor.release().await;

        PipelineReport {
            steps,
            state,
            elapsed: start.elapsed(),
        }
    }

    async fn run_step(&mut self, step: PipelineStep) -> StepRecord {
        info!(step = %step, initials = %step.initials(), "step started");
        let started = Instant::now();
        let ceiling = self.watchdog.ceiling;

        let outcome = tokio::select! {
            succeeded = self.executor.execute(step) => {
                if succeeded { StepOutcome::Succeeded } else { StepOutcome::Failed }
            }
            _ = tokio::time::sleep(ceiling) => StepOutcome::TimedOut,
        };
        let duration = started.elapsed();

        match outcome {
            StepOutcome::Succeeded => {
                info!(step = %step, duration_ms = duration.as_millis() as u64, "step finished");
            }
            StepOutcome::Failed => {
                error!(step = %step, duration_ms = duration.as_millis() as u64, "step failed");
            }
            // The step future is already dropped, killing its stage command.
            // No finish line is logged.
            StepOutcome::TimedOut => {
                if tokio::time::timeout(RELEASE_GRACE, self.executor.release())
                    .await
                    .is_err()
                {
                    warn!(step = %step, "resources not released in time");
                }
                (self.watchdog.terminate)(step, ceiling)
            }
        }

        StepRecord {
            step,
            outcome,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records every executed step; fails the steps it is told to.
    #[derive(Default)]
    struct ScriptedSteps {
        executed: Vec<PipelineStep>,
        failing: Vec<PipelineStep>,
        slow: Option<(PipelineStep, Duration)>,
        finished: Arc<Mutex<Vec<PipelineStep>>>,
        events: Arc<Mutex<Vec<&'static str>>>,
        released: bool,
    }

    #[async_trait]
    impl StepExecutor for ScriptedSteps {
        async fn execute(&mut self, step: PipelineStep) -> bool {
            self.executed.push(step);
            if let Some((slow, delay)) = self.slow {
                if slow == step {
                    tokio::time::sleep(delay).await;
                }
            }
            self.finished.lock().unwrap().push(step);
            !self.failing.contains(&step)
        }

        async fn release(&mut self) {
            self.events.lock().unwrap().push("release");
            self.released = true;
        }
    }

    fn watchdog() -> Watchdog {
        Watchdog::with_terminate(Duration::from_secs(5), Arc::new(|_, _| {}))
    }

    #[tokio::test]
    async fn run_all_visits_remaining_steps_in_order() {
        let mut orchestrator = Orchestrator::new(ScriptedSteps::default(), watchdog());
        let run = PipelineRunConfig::new(PipelineStep::OntologyImporting, true);

        let report = orchestrator.run(&run).await;

        assert!(report.succeeded());
        assert_eq!(report.visited(), PipelineStep::ALL[5..].to_vec());
        assert_eq!(orchestrator.executor().executed, PipelineStep::ALL[5..].to_vec());
        assert!(orchestrator.executor().released);
    }

    #[tokio::test]
    async fn full_run_starts_at_first_step() {
        let mut orchestrator = Orchestrator::new(ScriptedSteps::default(), watchdog());
        let report = orchestrator.run(&PipelineRunConfig::default()).await;
        assert_eq!(report.visited(), PipelineStep::ALL.to_vec());
    }

    #[tokio::test]
    async fn run_only_executes_a_single_step() {
        for step in [PipelineStep::KnowledgeCrawling, PipelineStep::ContentMapping] {
            let mut orchestrator = Orchestrator::new(ScriptedSteps::default(), watchdog());
            let report = orchestrator.run(&PipelineRunConfig::new(step, false)).await;

            assert!(report.succeeded());
            assert_eq!(orchestrator.executor().executed, vec![step]);
        }
    }

    #[tokio::test]
    async fn failure_stops_the_run() {
        let executor = ScriptedSteps {
            failing: vec![PipelineStep::KnowledgeExporting],
            ..ScriptedSteps::default()
        };
        let mut orchestrator = Orchestrator::new(executor, watchdog());

        let report = orchestrator.run(&PipelineRunConfig::default()).await;

        assert_eq!(report.state, PipelineState::Failed(PipelineStep::KnowledgeExporting));
        assert_eq!(report.visited(), PipelineStep::ALL[..3].to_vec());
        assert_eq!(report.steps[2].outcome, StepOutcome::Failed);
        assert!(orchestrator.executor().released);
    }

    #[tokio::test]
    async fn watchdog_terminates_before_finish_line() {
        let breaches = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&breaches);
        let watchdog = Watchdog::with_terminate(
            Duration::from_millis(50),
            Arc::new(move |step, _| seen.lock().unwrap().push(step)),
        );

        let executor = ScriptedSteps {
            slow: Some((PipelineStep::KnowledgeProcessing, Duration::from_secs(30))),
            ..ScriptedSteps::default()
        };
        let finished = Arc::clone(&executor.finished);
        let mut orchestrator = Orchestrator::new(executor, watchdog);

        let started = Instant::now();
        let report = orchestrator.run(&PipelineRunConfig::default()).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(*breaches.lock().unwrap(), vec![PipelineStep::KnowledgeProcessing]);
        assert_eq!(report.state, PipelineState::Failed(PipelineStep::KnowledgeProcessing));
        assert_eq!(report.steps[1].outcome, StepOutcome::TimedOut);
        // The slow step never reached its end.
        assert_eq!(*finished.lock().unwrap(), vec![PipelineStep::KnowledgeCrawling]);
    }

    #[tokio::test]
    async fn watchdog_releases_resources_before_terminating() {
        let executor = ScriptedSteps {
            slow: Some((PipelineStep::KnowledgeCrawling, Duration::from_secs(30))),
            ..ScriptedSteps::default()
        };
        let events = Arc::clone(&executor.events);
        let seen = Arc::clone(&events);
        let watchdog = Watchdog::with_terminate(
            Duration::from_millis(50),
            Arc::new(move |_, _| seen.lock().unwrap().push("terminate")),
        );
        let mut orchestrator = Orchestrator::new(executor, watchdog);

        orchestrator.run(&PipelineRunConfig::default()).await;

        assert_eq!(events.lock().unwrap()[..2], ["release", "terminate"]);
    }
}
