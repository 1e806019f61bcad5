///
/// This module implements the CLI interface for mdbatch: command parsing and the
/// async entrypoint shared by `main` and the integration tests.
///
/// All business logic (settings resolution, discovery, the build pipeline and the
/// default engine) lives in the [`mdbatch-core`] crate. This module only wires it
/// together and reports to the operator.
///
/// [`mdbatch-core`]: ../../mdbatch-core/
use crate::load_settings::{capture_env, load_settings, print_settings};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mdbatch_core::build::{Build, BuildError};
use mdbatch_core::render::HtmlPdfEngine;
use std::collections::HashMap;
use std::path::PathBuf;

/// CLI for mdbatch: build HTML and PDF files from a directory of Markdown.
#[derive(Parser)]
#[clap(
    name = "mdbatch",
    version,
    about = "Build HTML and PDF artifacts from a directory of Markdown files"
)]
pub struct Cli {
    /// Directory holding the bundled `styles/` and `template/` assets
    #[clap(long, env = "MDBATCH_ASSETS_DIR", global = true)]
    pub assets_dir: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert every Markdown file of the input directory
    Build,
    /// Resolve and print the settings without building anything
    Settings {
        /// Print the settings as JSON instead of a table
        #[clap(long)]
        json: bool,
    },
}

/// Async CLI entrypoint reading the process environment.
pub async fn run(cli: Cli) -> Result<()> {
    run_with_env(cli, &capture_env()).await
}

/// Async CLI entrypoint over an explicit environment, for tests and embedding.
pub async fn run_with_env(cli: Cli, env: &HashMap<String, String>) -> Result<()> {
    tracing::info!("trace_initialised");

    let settings = load_settings(env, cli.assets_dir.as_deref())?;

    match cli.command {
        Commands::Settings { json } => {
            if json {
                let out = serde_json::to_string_pretty(&settings)
                    .context("Failed to serialize settings")?;
                println!("{out}");
            } else {
                print_settings(&settings);
            }
            Ok(())
        }
        Commands::Build => {
            print_settings(&settings);
            tracing::info!(command = "build", "Starting batch build");
            let result = Build::new(&settings).run(HtmlPdfEngine::new).await;
            if let Err(BuildError::Incomplete { report }) = &result {
                for (file, reason) in &report.failures {
                    println!("Failed to build {file}: {reason}");
                }
            }
            let report = result.context("Build failed")?;
            tracing::info!(command = "build", artifacts = report.artifacts.len(), "Build complete");
            Ok(())
        }
    }
}
