//! Binary entry point for the skiff CLI.

use std::env;
use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use skiff::config::{ConfigError, SkiffConfig};
use skiff::{
    Ansible, DeployOutcome, DeployRequest, DigitalOceanCatalogue, FixedDelay, LifecycleError,
    LifecycleOrchestrator, LockdownStatus, ProcessCommandRunner, Snapshot, Terraform,
    ValidationError, Workspace, parse_snapshot,
};

mod cli;

use cli::{Cli, DeployCommand, DestroyCommand};

/// Serves `list` from a state document on disk instead of running Terraform.
const FAKE_STATE_ENV: &str = "SKIFF_FAKE_STATE_FILE";

/// Environment variable holding the log filter.
const LOG_ENV: &str = "SKIFF_LOG";

type Orchestrator = LifecycleOrchestrator<ProcessCommandRunner, DigitalOceanCatalogue, FixedDelay>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Request(#[from] ValidationError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error("failed to read fake state from {path}: {message}")]
    FakeState { path: String, message: String },
    #[error("failed to write output: {0}")]
    Output(String),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    match cli {
        Cli::Deploy(command) => run_deploy(&command).await,
        Cli::Destroy(command) => run_destroy(&command),
        Cli::List => run_list(),
    }
}

fn load_config() -> Result<SkiffConfig, CliError> {
    let config = SkiffConfig::load_without_cli_args()?;
    config.validate()?;
    Ok(config)
}

fn orchestrator(config: &SkiffConfig) -> Orchestrator {
    let workspace = Workspace::new(config.working_dir_path());
    LifecycleOrchestrator::new(
        Terraform::new(
            config.terraform_bin.clone(),
            workspace.clone(),
            ProcessCommandRunner,
        ),
        Ansible::new(
            config.ansible_playbook_bin.clone(),
            workspace,
            config.ssh_settings(),
            ProcessCommandRunner,
        ),
        DigitalOceanCatalogue::new(config.digitalocean_token.clone()),
        FixedDelay::new(config.init_wait()),
        config.deploy_settings(),
    )
}

fn build_request(
    command: &DeployCommand,
    default_prefix: &str,
) -> Result<DeployRequest, ValidationError> {
    let mut builder = DeployRequest::builder()
        .providers(command.providers.iter().map(String::as_str))
        .count(command.count)
        .name_prefix(command.prefix.as_deref().unwrap_or(default_prefix));
    for (provider, regions) in command.region_overrides() {
        if !regions.is_empty() {
            builder = builder.regions(provider, regions.iter().map(String::as_str));
        }
    }
    builder.build()
}

async fn run_deploy(command: &DeployCommand) -> Result<(), CliError> {
    let config = load_config()?;
    let request = build_request(command, &config.name_prefix)?;
    let outcome = orchestrator(&config).deploy(&request).await?;
    report_outcome(io::stderr(), &outcome)
}

fn report_outcome(mut target: impl Write, outcome: &DeployOutcome) -> Result<(), CliError> {
    tracing::info!(
        batch = %outcome.batch,
        created = outcome.new_instances.len(),
        "deploy complete"
    );
    if let LockdownStatus::Failed(message) = &outcome.lockdown {
        writeln!(
            target,
            "warning: lock-down failed; new instances may accept unrestricted traffic: {message}"
        )
        .map_err(|err| CliError::Output(err.to_string()))?;
    }
    Ok(())
}

fn run_destroy(command: &DestroyCommand) -> Result<(), CliError> {
    let config = load_config()?;
    orchestrator(&config).destroy(&command.input)?;
    Ok(())
}

fn run_list() -> Result<(), CliError> {
    let snapshot = match fake_state_from_env() {
        Some(result) => result?,
        None => orchestrator(&load_config()?).list()?,
    };
    write_listing(io::stdout(), &snapshot)
}

fn fake_state_from_env() -> Option<Result<Snapshot, CliError>> {
    let path = env::var(FAKE_STATE_ENV).ok()?;
    let result = read_fake_state(Utf8Path::new(&path))
        .and_then(|json| parse_snapshot(&json).map_err(|err| err.to_string()))
        .map_err(|message| CliError::FakeState { path, message });
    Some(result)
}

fn read_fake_state(path: &Utf8Path) -> Result<String, String> {
    let file_name = path
        .file_name()
        .ok_or_else(|| String::from("path does not name a file"))?;
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(|err| err.to_string())?;
    dir.read_to_string(file_name).map_err(|err| err.to_string())
}

fn write_listing(mut target: impl Write, snapshot: &Snapshot) -> Result<(), CliError> {
    for line in snapshot.listing() {
        writeln!(target, "{line}").map_err(|err| CliError::Output(err.to_string()))?;
    }
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
