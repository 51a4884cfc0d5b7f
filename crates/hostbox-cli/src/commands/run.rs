//! `hostbox run` — Run one command in a throwaway container.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use hostbox_common::config::HostboxConfig;
use hostbox_common::constants::APP_NAME;
use hostbox_runtime::backend::{ContainerBackend, HostBackend};
use hostbox_runtime::container::{Container, ContainerSpec};
use hostbox_runtime::process::{ProcessIo, ProcessSpec};

use crate::output::{exit_status, format_bytes};

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// User to run the command as.
    #[arg(short, long)]
    pub user: Option<String>,

    /// Extra environment variable, as KEY=VALUE. Repeatable.
    #[arg(short, long = "env", value_parser = parse_env_pair)]
    pub env: Vec<(String, String)>,

    /// Working directory, relative to the container directory.
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Tar archive extracted into the container before running.
    #[arg(long)]
    pub stream_in: Option<PathBuf>,

    /// Container path archived after the command exits.
    #[arg(long, requires = "output")]
    pub stream_out: Option<String>,

    /// File receiving the `--stream-out` archive.
    #[arg(short, long, requires = "stream_out")]
    pub output: Option<PathBuf>,

    /// Forward this terminal's stdin to the command.
    #[arg(short, long)]
    pub interactive: bool,

    /// Command and arguments.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

/// Executes the `run` command and returns the command's exit status.
///
/// # Errors
///
/// Returns an error if the container cannot be created, seeded, run, or
/// archived. The container is destroyed in every case.
pub fn execute(args: RunArgs, config: HostboxConfig) -> anyhow::Result<ExitCode> {
    let backend = Arc::new(HostBackend::new(config));
    backend.start().context("starting backend")?;

    let handler_backend = Arc::clone(&backend);
    ctrlc::set_handler(move || {
        tracing::info!("interrupted, tearing down containers");
        if let Err(e) = handler_backend.stop() {
            eprintln!("{APP_NAME}: {e}");
        }
    })
    .context("failed to set Ctrl+C handler")?;

    let container = backend
        .create(ContainerSpec::default())
        .context("creating container")?;
    let outcome = run_in(&container, args);

    let teardown = backend.destroy(container.handle().as_str());
    let code = outcome?;
    teardown.context("destroying container")?;
    Ok(ExitCode::from(exit_status(code)))
}

fn run_in(container: &Container, args: RunArgs) -> anyhow::Result<i32> {
    if let Some(archive) = &args.stream_in {
        let file = File::open(archive)
            .with_context(|| format!("opening {}", archive.display()))?;
        container
            .stream_in(".", BufReader::new(file))
            .context("seeding container")?;
    }

    let Some((path, rest)) = args.command.split_first() else {
        anyhow::bail!("no command given");
    };
    let mut spec = ProcessSpec::new(path.clone())
        .args(rest.iter().cloned())
        .record_exit_status();
    spec.env = args.env;
    spec.dir = args.dir;
    spec.user = args.user;

    let io = ProcessIo {
        stdin: args
            .interactive
            .then(|| Box::new(io::stdin()) as Box<dyn io::Read + Send>),
        stdout: Some(Box::new(io::stdout())),
        stderr: Some(Box::new(io::stderr())),
    };
    let process = container.run(spec, io).context("starting command")?;
    let code = process.wait();
    tracing::debug!(handle = %container.handle(), code, "command finished");

    if let (Some(source), Some(output)) = (&args.stream_out, &args.output) {
        let bytes = archive_to(container, source, output)?;
        eprintln!("{APP_NAME}: wrote {} to {}", format_bytes(bytes), output.display());
    }
    Ok(code)
}

fn archive_to(container: &Container, source: &str, output: &Path) -> anyhow::Result<u64> {
    let mut archive = container
        .stream_out(source)
        .with_context(|| format!("archiving {source}"))?;
    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    let bytes = io::copy(&mut archive, &mut writer)?;
    writer.flush()?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_pairs_split_on_first_equals() {
        assert_eq!(
            parse_env_pair("PATH=/bin:/usr/bin"),
            Ok(("PATH".to_string(), "/bin:/usr/bin".to_string()))
        );
        assert_eq!(
            parse_env_pair("OPTS=a=b"),
            Ok(("OPTS".to_string(), "a=b".to_string()))
        );
        assert_eq!(parse_env_pair("EMPTY="), Ok(("EMPTY".to_string(), String::new())));
        assert!(parse_env_pair("=value").is_err());
        assert!(parse_env_pair("novalue").is_err());
    }
}
