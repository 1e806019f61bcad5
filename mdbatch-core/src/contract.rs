//! # contract: interface to the rendering engine
//!
//! The build pipeline never renders anything itself. It drives a
//! [`RenderEngine`] through a fixed lifecycle:
//!
//! 1. construct it from [`EngineOptions`],
//! 2. [`RenderEngine::start`] once,
//! 3. [`RenderEngine::convert`] each document, one at a time,
//! 4. [`RenderEngine::close`] once.
//!
//! Each conversion yields a [`ConversionResult`] that writes the HTML and PDF
//! artifacts. Engines hold shared state (the image index of the default
//! engine, an image server for others) and are not required to support
//! concurrent conversions.
//!
//! ## Mocking & Testing
//! - Both traits are annotated for `mockall`, behind the `test-export-mocks`
//!   feature, so downstream crates can script engines in their tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use mockall::automock;
use thiserror::Error;

/// Everything an engine needs to be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Concatenated stylesheet injected into every document.
    pub style: String,
    /// HTML template with `{{title}}`, `{{style}}` and `{{content}}` placeholders.
    pub template: String,
    pub table_of_contents: bool,
    /// Prefix of image references that should be served from `image_dir`.
    pub image_import: Option<String>,
    pub image_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine has not been started")]
    NotStarted,
    #[error("engine is already started")]
    AlreadyStarted,
    #[error("engine has been closed")]
    Closed,
    #[error("rendering failed: {0}")]
    Render(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// A converted document, able to write its artifacts.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ConversionResult: Send + Sync {
    async fn write_html(&self, path: &Path) -> Result<(), EngineError>;

    async fn write_pdf(&self, path: &Path) -> Result<(), EngineError>;
}

/// A stateful rendering engine used for a whole batch.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Acquire the engine's resources. Called once, before any conversion.
    async fn start(&mut self) -> Result<(), EngineError>;

    /// Convert one Markdown document. `name` is the document's output stem.
    async fn convert(
        &self,
        markdown: &str,
        name: &str,
    ) -> Result<Box<dyn ConversionResult>, EngineError>;

    /// Release the engine's resources. Called once, after the last conversion.
    async fn close(&mut self) -> Result<(), EngineError>;
}
