//! Loads the stylesheet and template an engine is constructed with.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::Settings;
use crate::contract::EngineOptions;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to read asset {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Style and template text, ready to hand to an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderAssets {
    pub style: String,
    pub template: String,
}

impl RenderAssets {
    pub fn into_engine_options(self, settings: &Settings) -> EngineOptions {
        EngineOptions {
            style: self.style,
            template: self.template,
            table_of_contents: settings.table_of_contents,
            image_import: settings.image_import.clone(),
            image_dir: settings.images_dir.clone(),
        }
    }
}

async fn read_asset(path: &Path) -> Result<String, AssetError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => {
            debug!(path = %path.display(), bytes = content.len(), "Read asset");
            Ok(content)
        }
        Err(source) => {
            error!(path = %path.display(), error = ?source, "Failed to read asset");
            Err(AssetError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    }
}

/// Builds the stylesheet and reads the template.
///
/// The stylesheet is, in order: the bundled default theme (when extending it),
/// the theme, the bundled default highlight theme (when extending it), and the
/// highlight theme.
pub async fn load_assets(settings: &Settings) -> Result<RenderAssets, AssetError> {
    let mut sources: Vec<&Path> = Vec::with_capacity(4);
    if settings.extend_default_theme {
        sources.push(&settings.assets.theme);
    }
    sources.push(&settings.theme);
    if settings.extend_highlight_theme {
        sources.push(&settings.assets.highlight_theme);
    }
    sources.push(&settings.highlight_theme);

    let mut style = String::new();
    for path in sources {
        style.push_str(&read_asset(path).await?);
    }
    let template = read_asset(&settings.template).await?;

    info!(
        style_bytes = style.len(),
        template_bytes = template.len(),
        "Loaded render assets"
    );
    Ok(RenderAssets { style, template })
}
