//! What each pipeline step does.
//!
//! Crawling and exporting run in-process against the staging store; every
//! other step is an external command configured under `[stages.<slug>]`.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tokio::process::Command;
use tracing::{error, info, instrument, warn};

use khub_crawler::crawl_sources;
use khub_shared::{AppConfig, CrawlResult, KhubError, Result};

use crate::export::export_namespace;
use crate::host::StoreSession;
use crate::pipeline::StepExecutor;
use crate::step::PipelineStep;

/// The dated staging partitions of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespaces {
    pub raw: String,
    pub processed: String,
}

impl Namespaces {
    pub fn for_date(date: NaiveDate) -> Self {
        let day = date.format("%Y-%m-%d");
        Self {
            raw: format!("{day}_raw_data"),
            processed: format!("{day}_processed"),
        }
    }
}

/// The production step executor.
pub struct KnowledgeSteps {
    config: AppConfig,
    namespaces: Namespaces,
    session: StoreSession,
}

impl KnowledgeSteps {
    /// Executor for a run dated today (local time).
    pub fn new(config: AppConfig) -> Self {
        Self::with_date(config, Local::now().date_naive())
    }

    pub fn with_date(config: AppConfig, date: NaiveDate) -> Self {
        let session = StoreSession::new(config.store.clone());
        Self {
            config,
            namespaces: Namespaces::for_date(date),
            session,
        }
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    pub fn session(&mut self) -> &mut StoreSession {
        &mut self.session
    }

    async fn try_execute(&mut self, step: PipelineStep) -> Result<bool> {
        match step {
            PipelineStep::KnowledgeCrawling => self.crawl().await,
            PipelineStep::KnowledgeProcessing => {
                self.session.acquire().await?;
                self.run_stage_command(step).await
            }
            PipelineStep::KnowledgeExporting => self.export().await,
            _ => self.run_stage_command(step).await,
        }
    }

    /// Crawl every enabled source into the raw namespace.
    async fn crawl(&mut self) -> Result<bool> {
        self.session.acquire().await?;
        let results = crawl_sources(&self.config).await?;
        let store = self.session.acquire().await?;

        let crawled: usize = results.iter().map(CrawlResult::total_records).sum();
        let mut staged = 0usize;
        for result in &results {
            for (collection, records) in &result.collections {
                staged += store
                    .replace_collection(&self.namespaces.raw, collection, records)
                    .await?;
            }
        }

        if crawled == 0 {
            error!(namespace = %self.namespaces.raw, "no records were crawled from any source");
        } else {
            info!(namespace = %self.namespaces.raw, crawled, staged, "crawled records staged");
        }
        Ok(crawled > 0)
    }

    /// Export the processed namespace to `<knowledge>/source/`.
    async fn export(&mut self) -> Result<bool> {
        let dir = self.config.paths.knowledge.join("source");
        let store = self.session.acquire().await?;
        let written = export_namespace(store, &self.namespaces.processed, &dir).await?;
        info!(files = written.len(), dir = %dir.display(), "knowledge exported");
        Ok(true)
    }

    /// Run the external command configured for `step`.
    async fn run_stage_command(&self, step: PipelineStep) -> Result<bool> {
        let slug = step.slug();
        let Some(stage) = self.config.stages.get(&slug) else {
            error!(step = %step, "no command configured under [stages.{slug}]");
            return Ok(false);
        };
        let (program, args) = stage
            .command
            .split_first()
            .ok_or_else(|| KhubError::config(format!("stages.{slug}.command must not be empty")))?;

        info!(step = %step, command = ?stage.command, "running stage command");

        let mut command = Command::new(program);
        command
            .args(args)
            .envs(self.stage_env(step))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &stage.working_dir {
            command.current_dir(dir);
        }

        let status = command
            .status()
            .await
            .map_err(|e| KhubError::Process(format!("failed to run `{program}`: {e}")))?;

        if !status.success() {
            warn!(step = %step, %status, "stage command failed");
        }
        Ok(status.success())
    }

    /// Environment handed to stage commands.
    fn stage_env(&self, step: PipelineStep) -> BTreeMap<String, String> {
        let mut env = BTreeMap::from([
            ("KHUB_STEP".to_string(), step.slug()),
            ("KHUB_RAW_NAMESPACE".to_string(), self.namespaces.raw.clone()),
            ("KHUB_PROCESSED_NAMESPACE".to_string(), self.namespaces.processed.clone()),
            ("KHUB_STORE".to_string(), self.session.location().to_string()),
        ]);
        for (name, path) in self.config.paths.entries() {
            env.insert(
                format!("KHUB_{}_PATH", name.to_uppercase()),
                path.display().to_string(),
            );
        }
        env
    }
}

#[async_trait]
impl StepExecutor for KnowledgeSteps {
    #[instrument(skip_all, fields(step = %step))]
    async fn execute(&mut self, step: PipelineStep) -> bool {
        match self.try_execute(step).await {
            Ok(succeeded) => succeeded,
            Err(e) => {
                error!(step = %step, error = %e, "step aborted");
                false
            }
        }
    }

    async fn release(&mut self) {
        self.session.release().await;
    }
}
