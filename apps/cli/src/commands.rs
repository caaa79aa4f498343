//! CLI definition, tracing setup, and the pipeline entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::{Result, WrapErr};
use khub_core::{PipelineRunConfig, PipelineStep, StepOutcome, run_pipeline};
use khub_shared::{DEFAULT_CONFIG_PATH, load_or_init_config};
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// khub: build the knowledge hub from Confluence and Teams.
#[derive(Parser, Debug)]
#[command(
    name = "khub",
    version,
    about = "Crawl collaboration platforms and run the knowledge hub pipeline.",
    after_help = steps_help(),
)]
pub(crate) struct Cli {
    /// Start at the step with these initials (e.g. KC, KE, KGE).
    #[arg(short, long, value_name = "INITIALS")]
    pub run: Option<String>,

    /// Run only the starting step.
    #[arg(long, requires = "run")]
    pub only: bool,

    /// Path to the configuration file; created with defaults when missing.
    #[arg(short, long, env = "KHUB_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

fn steps_help() -> String {
    format!("Steps:\n{}", PipelineStep::catalog())
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. `RUST_LOG` wins when set.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "warn,khub=info",
        1 => "warn,khub=debug",
        _ => "info,khub=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Run the pipeline as requested and map the outcome to an exit code.
pub(crate) async fn run(cli: Cli) -> Result<ExitCode> {
    let run_config = match PipelineRunConfig::from_initials(cli.run.as_deref(), cli.only) {
        Ok(run_config) => run_config,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    let config = load_or_init_config(&cli.config)
        .wrap_err_with(|| format!("unable to load {}", cli.config.display()))?;
    config.validate()?;
    for slug in config.unknown_stages(&PipelineStep::command_slugs()) {
        warn!(stage = slug, "no pipeline step runs [stages.{slug}], section ignored");
    }

    let report = run_pipeline(config, &run_config).await;

    let completed = report
        .steps
        .iter()
        .filter(|record| record.outcome == StepOutcome::Succeeded)
        .count();
    let elapsed_secs = report.elapsed.as_secs_f64();

    if report.succeeded() {
        info!(steps = completed, elapsed_secs, "pipeline finished");
        Ok(ExitCode::SUCCESS)
    } else {
        error!(state = ?report.state, steps = completed, elapsed_secs, "pipeline failed");
        Ok(ExitCode::FAILURE)
    }
}
