//! Settings resolution: turns an environment mapping into an immutable [`Settings`] snapshot.
//!
//! Every setting is looked up as `prefix + NAME` (upper case). An absent or
//! empty value means "not provided" and the setting's default applies;
//! anything else runs through the setting's transformer. Path-valued settings
//! supplied by the operator are resolved through the [`Sandbox`].
//!
//! The resolver never reads the process environment itself. Callers capture
//! the environment once (see the `mdbatch` binary) and pass it in.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::sandbox::{Sandbox, SandboxError};

pub const DEFAULT_ASSETS_DIR: &str = "/markdown-to-pdf/";
pub const DEFAULT_INPUT_DIR: &str = "./";
pub const DEFAULT_OUTPUT_DIR: &str = "built/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable $CI is set, but runner could not be identified")]
    UnidentifiedRunner,
    #[error("setting '{setting}' is invalid: {source}")]
    Sandbox {
        setting: &'static str,
        #[source]
        source: SandboxError,
    },
}

/// Locations of the bundled style and template files used when the operator does not supply their own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDefaults {
    pub theme: PathBuf,
    pub highlight_theme: PathBuf,
    pub template: PathBuf,
}

impl AssetDefaults {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            theme: dir.join("styles").join("markdown.css"),
            highlight_theme: dir.join("styles").join("highlight.css"),
            template: dir.join("template").join("template.html"),
        }
    }
}

impl Default for AssetDefaults {
    fn default() -> Self {
        Self::in_dir(DEFAULT_ASSETS_DIR)
    }
}

/// Resolved settings for one run. Built once, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub input_dir: PathBuf,
    pub image_import: Option<String>,
    pub images_dir: PathBuf,
    pub output_dir: PathBuf,
    pub build_html: bool,
    pub theme: PathBuf,
    pub highlight_theme: PathBuf,
    pub template: PathBuf,
    pub extend_default_theme: bool,
    pub extend_highlight_theme: bool,
    pub table_of_contents: bool,
    /// Name artifacts after the full input file name (`notes.md.pdf`) instead of its stem.
    pub keep_extension: bool,
    /// Keep converting the remaining files after a per-file failure.
    pub continue_on_error: bool,
    /// Bundled assets, needed when a theme is extended with the default one.
    pub assets: AssetDefaults,
}

impl Settings {
    pub fn trace_loaded(&self) {
        info!(
            input_dir = %self.input_dir.display(),
            images_dir = %self.images_dir.display(),
            output_dir = %self.output_dir.display(),
            build_html = self.build_html,
            table_of_contents = self.table_of_contents,
            "Loaded Settings"
        );
        match serde_json::to_string(self) {
            Ok(json) => debug!(json = %json, "Settings loaded (full debug)"),
            Err(e) => error!(error = ?e, "Failed to serialize Settings as JSON"),
        }
    }

    /// Rows of the operator-facing settings table, in display order.
    pub fn rows(&self) -> Vec<(&'static str, String)> {
        fn path(p: &Path) -> String {
            p.display().to_string()
        }
        vec![
            ("input_dir", path(&self.input_dir)),
            (
                "image_import",
                self.image_import.clone().unwrap_or_else(|| "null".to_string()),
            ),
            ("image_dir", path(&self.images_dir)),
            ("output_dir", path(&self.output_dir)),
            ("build_html", self.build_html.to_string()),
            ("theme", path(&self.theme)),
            ("highlight_theme", path(&self.highlight_theme)),
            ("template", path(&self.template)),
            ("extend_default_theme", self.extend_default_theme.to_string()),
            ("extend_highlight_theme", self.extend_highlight_theme.to_string()),
            ("table_of_contents", self.table_of_contents.to_string()),
            ("keep_extension", self.keep_extension.to_string()),
            ("continue_on_error", self.continue_on_error.to_string()),
        ]
    }

    /// Human-readable table of the snapshot.
    pub fn table(&self) -> String {
        let rows = self.rows();
        let key_width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        let value_width = rows.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        let rule = format!("+-{}-+-{}-+", "-".repeat(key_width), "-".repeat(value_width));

        let mut out = String::new();
        let _ = writeln!(out, "{rule}");
        let _ = writeln!(out, "| {:key_width$} | {:value_width$} |", "setting", "value");
        let _ = writeln!(out, "{rule}");
        for (key, value) in &rows {
            let _ = writeln!(out, "| {key:key_width$} | {value:value_width$} |");
        }
        let _ = write!(out, "{rule}");
        out
    }
}

/// Looks up settings under one prefix in a captured environment.
struct EnvLookup<'a> {
    env: &'a HashMap<String, String>,
    prefix: &'a str,
}

impl EnvLookup<'_> {
    /// The provided value, or `None` when absent or empty.
    fn get(&self, name: &str) -> Option<&str> {
        let key = format!("{}{}", self.prefix, name.to_uppercase());
        match self.env.get(&key).map(String::as_str) {
            Some("") | None => None,
            Some(value) => {
                debug!(key = %key, "Setting provided by environment");
                Some(value)
            }
        }
    }

    fn boolean(&self, name: &str, default: bool) -> bool {
        self.get(name).map_or(default, |v| v == "true")
    }

    fn dir(
        &self,
        sandbox: &Sandbox,
        name: &'static str,
        default: impl FnOnce() -> Result<PathBuf, SandboxError>,
    ) -> Result<PathBuf, ConfigError> {
        let resolved = match self.get(name) {
            Some(raw) => sandbox.resolve_dir(raw),
            None => default(),
        };
        resolved.map_err(|source| ConfigError::Sandbox { setting: name, source })
    }

    fn file(&self, sandbox: &Sandbox, name: &'static str, default: &Path) -> Result<PathBuf, ConfigError> {
        match self.get(name) {
            Some(raw) => sandbox
                .resolve_file(raw)
                .map_err(|source| ConfigError::Sandbox { setting: name, source }),
            None => Ok(default.to_path_buf()),
        }
    }
}

/// Resolves the settings snapshot from `env` under `prefix`.
///
/// `input_dir` and `image_import` are resolved first because the default of
/// `images_dir` is built from them.
pub fn resolve_settings(
    env: &HashMap<String, String>,
    prefix: &str,
    sandbox: &Sandbox,
    assets: &AssetDefaults,
) -> Result<Settings, ConfigError> {
    info!(prefix, root = sandbox.root(), "Resolving settings from environment");
    let lookup = EnvLookup { env, prefix };

    let input_dir = lookup.dir(sandbox, "input_dir", || Ok(PathBuf::from(DEFAULT_INPUT_DIR)))?;
    let image_import = lookup.get("image_import").map(str::to_owned);
    let images_dir = lookup.dir(sandbox, "images_dir", || {
        let base = input_dir.to_string_lossy();
        let candidate = format!("{}{}/", base, image_import.as_deref().unwrap_or(""));
        sandbox.contain(&candidate)
    })?;
    let output_dir = lookup.dir(sandbox, "output_dir", || Ok(PathBuf::from(DEFAULT_OUTPUT_DIR)))?;

    let settings = Settings {
        build_html: lookup.boolean("build_html", true),
        theme: lookup.file(sandbox, "theme", &assets.theme)?,
        highlight_theme: lookup.file(sandbox, "highlight_theme", &assets.highlight_theme)?,
        template: lookup.file(sandbox, "template", &assets.template)?,
        extend_default_theme: lookup.boolean("extend_default_theme", false),
        extend_highlight_theme: lookup.boolean("extend_highlight_theme", false),
        table_of_contents: lookup.boolean("table_of_contents", false),
        keep_extension: lookup.boolean("keep_extension", false),
        continue_on_error: lookup.boolean("continue_on_error", false),
        assets: assets.clone(),
        input_dir,
        image_import,
        images_dir,
        output_dir,
    };

    settings.trace_loaded();
    Ok(settings)
}
