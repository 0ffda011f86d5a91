//! CLI surface (spec §2): `serve` (default), `config validate`, `version`.
//! Dashboard/login/doctor subcommands are dropped — this binary is a worker
//! process, not an operator console.

use clap::{Parser, Subcommand};
use voicecore_domain::config::{ConfigSeverity, WorkerOptions};

/// voicecore — real-time voice agent execution runtime.
#[derive(Debug, Parser)]
#[command(name = "voicecore", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect to the registry and accept jobs (default when no subcommand is given).
    Serve,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
}

/// Load [`WorkerOptions`] from the path named by `VOICECORE_CONFIG` (default
/// `config.toml`). Shared by `serve` and `config validate` so both read the
/// same file the same way.
pub fn load_config() -> anyhow::Result<(WorkerOptions, String)> {
    let config_path = std::env::var("VOICECORE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let raw = std::fs::read_to_string(&config_path)
        .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
    let options: WorkerOptions =
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?;

    Ok((options, config_path))
}

/// Validate the config, printing every issue. Returns `true` iff there were
/// no [`ConfigSeverity::Error`](voicecore_domain::config::ConfigSeverity::Error)-level issues.
pub fn validate_config(options: &WorkerOptions, config_path: &str) -> bool {
    let issues = options.validate();

    if issues.is_empty() {
        println!("Config OK ({config_path})");
        return true;
    }

    let error_count = issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }
    println!("\n{error_count} error(s), {warning_count} warning(s) in {config_path}");

    error_count == 0
}
