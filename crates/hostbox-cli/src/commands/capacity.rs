//! `hostbox capacity` — Report the admission ceiling.

use clap::Args;
use hostbox_common::config::HostboxConfig;
use hostbox_runtime::backend::{ContainerBackend, HostBackend};

/// Arguments for the `capacity` command.
#[derive(Args, Debug)]
pub struct CapacityArgs {
    /// Print as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `capacity` command.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn execute(args: &CapacityArgs, config: &HostboxConfig) -> anyhow::Result<()> {
    let backend = HostBackend::new(config.clone());
    let capacity = backend.capacity();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&capacity)?);
    } else {
        println!("max active containers: {}", capacity.max_active);
        println!("containers dir:        {}", backend.containers_dir().display());
    }
    Ok(())
}
