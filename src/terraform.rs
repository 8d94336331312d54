//! Terraform driver: desired-state files, apply, destroy and state reads.

use std::ffi::OsString;

use serde_json::json;
use thiserror::Error;

use crate::instance::Snapshot;
use crate::plan::{DeploymentPlan, RenderSettings};
use crate::runner::{CommandOutput, CommandRunner, RunnerError};
use crate::state::{StateParseError, parse_snapshot};
use crate::workspace::{Workspace, WorkspaceError};

/// File holding the rendered desired state.
pub const MAIN_FILE_NAME: &str = "main.tf.json";

/// File holding variable values Terraform loads automatically.
pub const VARIABLES_FILE_NAME: &str = "skiff.auto.tfvars.json";

/// Errors raised while driving Terraform.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TerraformError {
    /// Raised when `terraform init` fails.
    #[error("terraform init failed with status {status_text}: {stderr}")]
    Init {
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from Terraform.
        stderr: String,
    },
    /// Raised when `terraform apply` fails; some resources may exist.
    #[error("terraform apply failed with status {status_text}: {stderr}")]
    Apply {
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from Terraform.
        stderr: String,
    },
    /// Raised when `terraform destroy` fails; some targets may remain.
    #[error("terraform destroy of {joined} failed with status {status_text}: {stderr}", joined = .targets.join(", "))]
    Destroy {
        /// Addresses that were targeted.
        targets: Vec<String>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from Terraform.
        stderr: String,
    },
    /// Raised when `terraform show -json` fails.
    #[error("terraform show failed with status {status_text}: {stderr}")]
    Show {
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from Terraform.
        stderr: String,
    },
    /// Raised when the state cannot be interpreted.
    #[error(transparent)]
    StateParse(#[from] StateParseError),
    /// Raised when generated files cannot be written.
    #[error(transparent)]
    Write(#[from] WorkspaceError),
    /// Raised when Terraform cannot be started.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Drives the `terraform` binary inside a [`Workspace`].
#[derive(Clone, Debug)]
pub struct Terraform<R: CommandRunner> {
    binary: String,
    workspace: Workspace,
    runner: R,
}

impl<R: CommandRunner> Terraform<R> {
    /// Creates a driver running `binary` in `workspace` through `runner`.
    #[must_use]
    pub fn new(binary: impl Into<String>, workspace: Workspace, runner: R) -> Self {
        Self {
            binary: binary.into(),
            workspace,
            runner,
        }
    }

    /// Working directory the driver operates in.
    #[must_use]
    pub const fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    fn run(&self, subcommand: &str, extra: &[String]) -> Result<CommandOutput, RunnerError> {
        let mut args = vec![
            OsString::from(format!("-chdir={}", self.workspace.root())),
            OsString::from(subcommand),
        ];
        args.extend(extra.iter().map(OsString::from));
        tracing::info!(subcommand, "running terraform");
        self.runner.run(&self.binary, &args)
    }

    /// Captures the current inventory from `terraform show -json`.
    ///
    /// # Errors
    ///
    /// Returns [`TerraformError::Show`] when Terraform fails or
    /// [`TerraformError::StateParse`] when its output cannot be interpreted.
    pub fn snapshot(&self) -> Result<Snapshot, TerraformError> {
        let output = self.run("show", &[String::from("-json")])?;
        if !output.is_success() {
            return Err(TerraformError::Show {
                status_text: output.status_text(),
                stderr: output.stderr,
            });
        }
        Ok(parse_snapshot(&output.stdout)?)
    }

    /// Writes the rendered plan and the variables it references.
    ///
    /// # Errors
    ///
    /// Returns [`TerraformError::Write`] when a file cannot be written.
    pub fn write_plan(
        &self,
        plan: &DeploymentPlan,
        settings: &RenderSettings<'_>,
        digitalocean_token: Option<&str>,
    ) -> Result<(), TerraformError> {
        let main = render_pretty(&plan.render(settings));
        self.workspace.write(MAIN_FILE_NAME, &main)?;
        let variables = digitalocean_token.map_or_else(
            || json!({}),
            |token| json!({ "do_token": token }),
        );
        self.workspace
            .write(VARIABLES_FILE_NAME, &render_pretty(&variables))?;
        Ok(())
    }

    /// Runs `terraform init` followed by `terraform apply`.
    ///
    /// # Errors
    ///
    /// Returns [`TerraformError::Init`] or [`TerraformError::Apply`] carrying
    /// Terraform's stderr. Partial creation is not rolled back.
    pub fn apply(&self) -> Result<(), TerraformError> {
        let init = self.run("init", &[String::from("-input=false")])?;
        if !init.is_success() {
            return Err(TerraformError::Init {
                status_text: init.status_text(),
                stderr: init.stderr,
            });
        }
        let apply = self.run(
            "apply",
            &[String::from("-input=false"), String::from("-auto-approve")],
        )?;
        if !apply.is_success() {
            return Err(TerraformError::Apply {
                status_text: apply.status_text(),
                stderr: apply.stderr,
            });
        }
        Ok(())
    }

    /// Destroys exactly the given resource and module addresses.
    ///
    /// # Errors
    ///
    /// Returns [`TerraformError::Destroy`] carrying Terraform's stderr.
    pub fn destroy(&self, targets: &[String]) -> Result<(), TerraformError> {
        let mut args = vec![String::from("-input=false"), String::from("-auto-approve")];
        args.extend(targets.iter().map(|target| format!("-target={target}")));
        let output = self.run("destroy", &args)?;
        if !output.is_success() {
            return Err(TerraformError::Destroy {
                targets: targets.to_vec(),
                status_text: output.status_text(),
                stderr: output.stderr,
            });
        }
        Ok(())
    }
}

fn render_pretty(value: &serde_json::Value) -> String {
    let mut text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    text.push('\n');
    text
}
