//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `skiff.toml` (or `.skiff.toml`, or the file named
//! by `SKIFF_CONFIG_PATH`) and `SKIFF_*` environment variables.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::lifecycle::DeploySettings;
use crate::lockdown::SshSettings;

/// Operator settings for the lifecycle tools.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SKIFF",
    discovery(
        app_name = "skiff",
        env_var = "SKIFF_CONFIG_PATH",
        config_file_name = "skiff.toml",
        dotfile_name = ".skiff.toml",
        project_file_name = "skiff.toml"
    )
)]
pub struct SkiffConfig {
    /// Path to the `terraform` executable.
    #[ortho_config(default = "terraform".to_owned())]
    pub terraform_bin: String,
    /// Path to the `ansible-playbook` executable.
    #[ortho_config(default = "ansible-playbook".to_owned())]
    pub ansible_playbook_bin: String,
    /// Directory holding Terraform state and generated files.
    #[ortho_config(default = ".".to_owned())]
    pub working_dir: String,
    /// Directory holding one Terraform module per provider, relative to the
    /// working directory unless absolute.
    #[ortho_config(default = "modules".to_owned())]
    pub module_dir: String,
    /// Prefix given to every instance name.
    #[ortho_config(default = "skiff".to_owned())]
    pub name_prefix: String,
    /// DigitalOcean API token. Needed only when deploying to DigitalOcean.
    pub digitalocean_token: Option<String>,
    /// Remote user Ansible connects as.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
    /// Private key Ansible authenticates with. Supports `~/`.
    #[ortho_config(default = "~/.ssh/id_rsa".to_owned())]
    pub ssh_private_key_file: String,
    /// Public key installed on new instances. Supports `~/`.
    #[ortho_config(default = "~/.ssh/id_rsa.pub".to_owned())]
    pub ssh_public_key_file: String,
    /// Seconds to wait between apply and lock-down.
    #[ortho_config(default = 120)]
    pub init_wait_secs: u64,
    /// TCP port left open by lock-down.
    #[ortho_config(default = 22)]
    pub admin_port: u16,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

impl SkiffConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}: set {} or add {} to skiff.toml",
                metadata.description, metadata.env_var, metadata.toml_key
            )));
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("skiff")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the missing value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] for the first empty field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (
                &self.terraform_bin,
                FieldMetadata::new("Terraform executable", "SKIFF_TERRAFORM_BIN", "terraform_bin"),
            ),
            (
                &self.ansible_playbook_bin,
                FieldMetadata::new(
                    "ansible-playbook executable",
                    "SKIFF_ANSIBLE_PLAYBOOK_BIN",
                    "ansible_playbook_bin",
                ),
            ),
            (
                &self.working_dir,
                FieldMetadata::new("working directory", "SKIFF_WORKING_DIR", "working_dir"),
            ),
            (
                &self.module_dir,
                FieldMetadata::new("Terraform module directory", "SKIFF_MODULE_DIR", "module_dir"),
            ),
            (
                &self.name_prefix,
                FieldMetadata::new("instance name prefix", "SKIFF_NAME_PREFIX", "name_prefix"),
            ),
            (
                &self.ssh_user,
                FieldMetadata::new("SSH user", "SKIFF_SSH_USER", "ssh_user"),
            ),
            (
                &self.ssh_private_key_file,
                FieldMetadata::new(
                    "SSH private key file",
                    "SKIFF_SSH_PRIVATE_KEY_FILE",
                    "ssh_private_key_file",
                ),
            ),
            (
                &self.ssh_public_key_file,
                FieldMetadata::new(
                    "SSH public key file",
                    "SKIFF_SSH_PUBLIC_KEY_FILE",
                    "ssh_public_key_file",
                ),
            ),
        ];
        for (value, metadata) in &required {
            Self::require_field(value, metadata)?;
        }
        if self.admin_port == 0 {
            return Err(ConfigError::MissingField(String::from(
                "missing administrative port: set SKIFF_ADMIN_PORT or add admin_port to skiff.toml",
            )));
        }
        Ok(())
    }

    /// Working directory as a UTF-8 path.
    #[must_use]
    pub fn working_dir_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from(expand_tilde(&self.working_dir))
    }

    /// Delay between apply and lock-down.
    #[must_use]
    pub const fn init_wait(&self) -> Duration {
        Duration::from_secs(self.init_wait_secs)
    }

    /// Connection settings for the lock-down inventory.
    #[must_use]
    pub fn ssh_settings(&self) -> SshSettings {
        SshSettings {
            user: self.ssh_user.clone(),
            private_key_file: expand_tilde(&self.ssh_private_key_file),
        }
    }

    /// Settings the orchestrator renders desired state and lock-down with.
    #[must_use]
    pub fn deploy_settings(&self) -> DeploySettings {
        DeploySettings {
            module_dir: Utf8PathBuf::from(expand_tilde(&self.module_dir)),
            ssh_public_key_file: expand_tilde(&self.ssh_public_key_file),
            digitalocean_token: self
                .digitalocean_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            admin_ports: vec![self.admin_port],
        }
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// If `HOME` is not set the input is returned unchanged.
///
/// # Examples
///
/// ```
/// # use skiff::config::expand_tilde;
/// assert_eq!(expand_tilde("/absolute/path"), "/absolute/path");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
