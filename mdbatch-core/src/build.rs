//! Batch build pipeline: drives one rendering engine across every discovered Markdown file.
//!
//! A run moves through the states of [`BuildState`]:
//!
//! `Init` → `EngineStarted` → `Scanning` → `Converting(i)` → `Closing` → `Done`,
//! with `Error` reachable from anywhere.
//!
//! # Responsibilities
//! - Load the style and template assets and construct the engine from them
//! - Start the engine while the input directory is scanned, then make sure the
//!   output directory exists before any artifact is written
//! - Convert files strictly one after the other; the engine is not shared
//! - Close the engine exactly once on every path after a successful start
//!
//! # Error Handling
//! Asset, engine start, discovery and output directory failures abort the run.
//! A failing file aborts the batch too, unless `continue_on_error` is set, in
//! which case it is logged, recorded in the report, and the loop moves on. In
//! both cases the engine is closed before the error is returned.
//!
//! # Navigation
//! - Main entrypoint: [`Build::run`]
//! - Supporting types: [`BuildReport`], [`BuildError`], [`FileError`]

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::assets::{load_assets, AssetError};
use crate::config::Settings;
use crate::contract::{EngineError, EngineOptions, RenderEngine};
use crate::discover::{discover, DiscoveredFile, DiscoveryError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    Init,
    EngineStarted,
    Scanning,
    Converting(usize),
    Closing,
    Done,
    Error,
}

#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to read: {0}")]
    Read(#[source] std::io::Error),
    #[error("conversion failed: {0}")]
    Convert(#[source] EngineError),
    #[error("failed to write HTML: {0}")]
    WriteHtml(#[source] EngineError),
    #[error("failed to write PDF: {0}")]
    WritePdf(#[source] EngineError),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Assets(#[from] AssetError),
    #[error("rendering engine failed: {0}")]
    Engine(#[source] EngineError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("failed to create output directory {dir:?}: {source}")]
    OutputDir {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to build '{file}': {source}")]
    File {
        file: String,
        #[source]
        source: FileError,
    },
    /// Some files failed under `continue_on_error`; the report names them.
    #[error("{} file(s) failed to build", .report.failures.len())]
    Incomplete { report: BuildReport },
}

/// What a run produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildReport {
    /// Artifacts written, in order.
    pub artifacts: Vec<PathBuf>,
    /// Files skipped after a failure, with the error text.
    pub failures: Vec<(String, String)>,
}

/// One batch run over a settings snapshot.
pub struct Build<'a> {
    settings: &'a Settings,
    state: BuildState,
}

impl<'a> Build<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self {
            settings,
            state: BuildState::Init,
        }
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    fn transition(&mut self, next: BuildState) {
        debug!(from = ?self.state, to = ?next, "[BUILD] State transition");
        self.state = next;
    }

    /// Runs the batch. `make_engine` is called once with the engine options.
    pub async fn run<E, F>(&mut self, make_engine: F) -> Result<BuildReport, BuildError>
    where
        E: RenderEngine,
        F: FnOnce(EngineOptions) -> E,
    {
        let result = self.run_inner(make_engine).await;
        match &result {
            Ok(report) => {
                self.transition(BuildState::Done);
                info!(artifacts = report.artifacts.len(), "[BUILD] Batch complete");
            }
            Err(e) => {
                self.transition(BuildState::Error);
                error!(error = %e, "[BUILD][ERROR] Batch failed");
            }
        }
        result
    }

    async fn run_inner<E, F>(&mut self, make_engine: F) -> Result<BuildReport, BuildError>
    where
        E: RenderEngine,
        F: FnOnce(EngineOptions) -> E,
    {
        let settings = self.settings;
        info!("[BUILD] Starting batch build");

        let options = load_assets(settings).await?.into_engine_options(settings);
        let mut engine = make_engine(options);

        // Scanning does not depend on the engine, so it runs while the engine starts.
        let (started, discovered) = futures::join!(
            engine.start(),
            discover(&settings.input_dir, settings.keep_extension)
        );
        if let Err(e) = started {
            error!(error = ?e, "[BUILD][ERROR] Rendering engine failed to start");
            return Err(BuildError::Engine(e));
        }
        self.transition(BuildState::EngineStarted);

        let outcome = self.convert_all(&engine, discovered).await;

        self.transition(BuildState::Closing);
        let closed = engine.close().await;
        match (outcome, closed) {
            (Ok(report), Ok(())) => {
                info!("[BUILD] Rendering engine closed");
                Ok(report)
            }
            (Ok(_), Err(e)) => {
                error!(error = ?e, "[BUILD][ERROR] Rendering engine failed to close");
                Err(BuildError::Engine(e))
            }
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(close_err)) => {
                warn!(error = ?close_err, "[BUILD] Rendering engine also failed to close");
                Err(err)
            }
        }
    }

    /// Everything that happens while the engine is started. Never closes it.
    async fn convert_all<E: RenderEngine>(
        &mut self,
        engine: &E,
        discovered: Result<Vec<DiscoveredFile>, DiscoveryError>,
    ) -> Result<BuildReport, BuildError> {
        let settings = self.settings;

        self.transition(BuildState::Scanning);
        let files = discovered?;
        let names: Vec<&str> = files.iter().map(|f| f.file_name.as_str()).collect();
        println!("Markdown files found: {}", names.join(", "));
        println!();

        ensure_output_dir(&settings.output_dir).await?;

        let mut report = BuildReport::default();
        for (i, file) in files.iter().enumerate() {
            self.transition(BuildState::Converting(i));
            info!(file = %file.file_name, index = i, "[BUILD] Converting file");

            match convert_file(engine, settings, file).await {
                Ok(artifacts) => report.artifacts.extend(artifacts),
                Err(source) if settings.continue_on_error => {
                    error!(file = %file.file_name, error = %source, "[BUILD][ERROR] File failed, continuing");
                    report.failures.push((file.file_name.clone(), source.to_string()));
                }
                Err(source) => {
                    error!(file = %file.file_name, error = %source, "[BUILD][ERROR] File failed, aborting batch");
                    return Err(BuildError::File {
                        file: file.file_name.clone(),
                        source,
                    });
                }
            }
        }

        if !report.failures.is_empty() {
            return Err(BuildError::Incomplete { report });
        }
        Ok(report)
    }
}

/// Creates `dir` when missing. An existing non-directory at that path is an error.
async fn ensure_output_dir(dir: &Path) -> Result<(), BuildError> {
    match tokio::fs::create_dir_all(dir).await {
        Ok(()) => {
            debug!(path = %dir.display(), "Created output directory");
            Ok(())
        }
        Err(source) => {
            error!(error = ?source, path = %dir.display(), "Failed to create output directory");
            Err(BuildError::OutputDir {
                dir: dir.to_path_buf(),
                source,
            })
        }
    }
}

/// Read, convert and emit one file. Returns the artifacts written.
async fn convert_file<E: RenderEngine>(
    engine: &E,
    settings: &Settings,
    file: &DiscoveredFile,
) -> Result<Vec<PathBuf>, FileError> {
    let source = settings.input_dir.join(&file.file_name);
    let markdown = tokio::fs::read_to_string(&source)
        .await
        .map_err(FileError::Read)?;

    let result = engine
        .convert(&markdown, &file.stem)
        .await
        .map_err(FileError::Convert)?;

    let mut artifacts = Vec::with_capacity(2);

    if settings.build_html {
        let html = settings.output_dir.join(file.html_name());
        result.write_html(&html).await.map_err(FileError::WriteHtml)?;
        println!("Built HTML file: {}", file.html_name());
        artifacts.push(html);
    }

    let pdf = settings.output_dir.join(file.pdf_name());
    result.write_pdf(&pdf).await.map_err(FileError::WritePdf)?;
    println!("Built PDF file: {}", file.pdf_name());
    println!();
    artifacts.push(pdf);

    Ok(artifacts)
}
