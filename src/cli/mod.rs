//! Command-line interface definitions for the `skiff` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `skiff` binary.
#[derive(Debug, Parser)]
#[command(
    name = "skiff",
    about = "Provision, list, and tear down disposable cloud hosts",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Create instances and lock the new ones down.
    #[command(name = "deploy", about = "Create instances and lock the new ones down")]
    Deploy(DeployCommand),
    /// Destroy instances by their `list` index.
    #[command(name = "destroy", about = "Destroy instances by their list index")]
    Destroy(DestroyCommand),
    /// Show every managed instance with its index.
    #[command(name = "list", about = "Show every managed instance with its index")]
    List,
}

/// Arguments for the `skiff deploy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DeployCommand {
    /// Providers to deploy to: any of AWS, DO, AZURE, GOOGLE.
    #[arg(long, value_name = "LIST", value_delimiter = ',', required = true)]
    pub(crate) providers: Vec<String>,
    /// Number of instances to create, spread across the selected regions.
    #[arg(long, value_name = "N")]
    pub(crate) count: usize,
    /// AWS regions; defaults to the provider's standard list.
    #[arg(long = "region-aws", value_name = "LIST", value_delimiter = ',')]
    pub(crate) region_aws: Vec<String>,
    /// DigitalOcean regions; defaults to the provider's standard list.
    #[arg(long = "region-do", value_name = "LIST", value_delimiter = ',')]
    pub(crate) region_do: Vec<String>,
    /// Azure locations; defaults to the provider's standard list.
    #[arg(long = "region-azure", value_name = "LIST", value_delimiter = ',')]
    pub(crate) region_azure: Vec<String>,
    /// Google Cloud regions; defaults to the provider's standard list.
    #[arg(long = "region-google", value_name = "LIST", value_delimiter = ',')]
    pub(crate) region_google: Vec<String>,
    /// Instance name prefix; overrides `name_prefix` from configuration.
    #[arg(long, value_name = "PREFIX")]
    pub(crate) prefix: Option<String>,
}

impl DeployCommand {
    /// Region lists the operator supplied, keyed by provider code.
    pub(crate) fn region_overrides(&self) -> [(&'static str, &[String]); 4] {
        [
            ("AWS", &self.region_aws),
            ("DO", &self.region_do),
            ("AZURE", &self.region_azure),
            ("GOOGLE", &self.region_google),
        ]
    }
}

/// Arguments for the `skiff destroy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DestroyCommand {
    /// Index expression such as `1,3,5-7`, using indices printed by `list`.
    #[arg(long, value_name = "INDICES")]
    pub(crate) input: String,
}
