//! CLI command definitions and dispatch.

pub mod capacity;
pub mod run;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use hostbox_common::config::HostboxConfig;

/// hostbox: run commands in host directory containers.
#[derive(Parser, Debug)]
#[command(name = "hostbox", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// JSON configuration file.
    #[arg(long, global = true, env = "HOSTBOX_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding container directories; overrides the config file.
    #[arg(long, global = true, env = "HOSTBOX_CONTAINERS_DIR")]
    pub containers_dir: Option<PathBuf>,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command in a fresh container and destroy it afterwards.
    Run(run::RunArgs),
    /// Show how many containers may be active at once.
    Capacity(capacity::CapacityArgs),
}

impl Cli {
    /// Builds the effective configuration: file (if any), then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be loaded.
    pub fn load_config(&self) -> anyhow::Result<HostboxConfig> {
        let mut config = match &self.config {
            Some(path) => HostboxConfig::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => HostboxConfig::default(),
        };
        if let Some(dir) = &self.containers_dir {
            config.containers_dir.clone_from(dir);
        }
        Ok(config)
    }
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = cli.load_config()?;
    match cli.command {
        Command::Run(args) => run::execute(args, config),
        Command::Capacity(args) => capacity::execute(&args, &config).map(|()| ExitCode::SUCCESS),
    }
}
