pub mod cli;
pub mod load_settings;

pub use cli::{run, run_with_env, Cli, Commands};
