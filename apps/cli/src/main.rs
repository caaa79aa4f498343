//! khub: crawl collaboration platforms and build the knowledge hub.
//!
//! Runs the ten-step knowledge pipeline, optionally starting mid-way
//! (`--run <INITIALS>`) or running a single step (`--only`).

mod commands;

use std::process::ExitCode;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    color_eyre::install()?;

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too, on stdout.
            let code = if e.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
            let _ = e.print();
            return Ok(code);
        }
    };

    commands::init_tracing(&cli);
    commands::run(cli).await
}
