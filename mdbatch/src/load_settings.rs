/// `load_settings` module: captures the process environment and adapts it into the core `Settings` snapshot.
///
/// This module is the only place in the workspace that reads `std::env`.
///
/// # Responsibilities
/// - Detect which runner the process is running under (plain shell or GitHub Actions)
///   and pick the matching variable prefix and sandbox root
/// - Hand the captured environment to `mdbatch_core::config::resolve_settings`
/// - Print the resolved settings table once for the operator
///
/// # Errors
/// Failures are surfaced as `anyhow::Error` at the CLI boundary.
use anyhow::{Context, Result};
use mdbatch_core::config::{resolve_settings, AssetDefaults, ConfigError, Settings};
use mdbatch_core::sandbox::Sandbox;
use std::collections::HashMap;
use std::path::Path;
use tracing::{error, info, warn};

/// Variable prefix and sandbox root for the runner the process was started by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Runner {
    pub name: &'static str,
    pub prefix: &'static str,
    pub root: &'static str,
}

pub const LOCAL_RUNNER: Runner = Runner {
    name: "local",
    prefix: "",
    root: "/",
};

pub const GITHUB_ACTIONS_RUNNER: Runner = Runner {
    name: "github-actions",
    prefix: "INPUT_",
    root: "/github/workspace/",
};

fn is_set(env: &HashMap<String, String>, key: &str) -> bool {
    env.get(key).is_some_and(|v| !v.is_empty())
}

/// Picks the runner from `CI` and `GITHUB_ACTIONS`.
pub fn detect_runner(env: &HashMap<String, String>) -> Result<Runner, ConfigError> {
    if !is_set(env, "CI") {
        return Ok(LOCAL_RUNNER);
    }
    if is_set(env, "GITHUB_ACTIONS") {
        Ok(GITHUB_ACTIONS_RUNNER)
    } else {
        error!("$CI is set but no known runner variable was found");
        Err(ConfigError::UnidentifiedRunner)
    }
}

/// Snapshot of the process environment. Variables that are not valid UTF-8 are skipped.
pub fn capture_env() -> HashMap<String, String> {
    std::env::vars_os()
        .filter_map(|(key, value)| match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                let name = key.unwrap_or_else(|k| k.to_string_lossy().into_owned());
                warn!(variable = %name, "Skipping environment variable that is not valid UTF-8");
                None
            }
        })
        .collect()
}

/// Resolves the settings snapshot for this run from a captured environment.
pub fn load_settings(env: &HashMap<String, String>, assets_dir: Option<&Path>) -> Result<Settings> {
    let runner = detect_runner(env)?;
    info!(runner = runner.name, prefix = runner.prefix, root = runner.root, "Detected runner");

    let assets = match assets_dir {
        Some(dir) => AssetDefaults::in_dir(dir),
        None => AssetDefaults::default(),
    };
    let sandbox = Sandbox::new(runner.root);

    let settings = resolve_settings(env, runner.prefix, &sandbox, &assets)
        .context("Failed to resolve settings from environment")?;
    Ok(settings)
}

/// Prints the settings table shown at startup.
pub fn print_settings(settings: &Settings) {
    println!("Detected settings:");
    println!("{}", settings.table());
    println!();
    println!();
}
