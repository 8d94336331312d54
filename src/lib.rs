//! Core library for the skiff instance lifecycle tool.
//!
//! The crate provisions disposable hosts across AWS, DigitalOcean, Azure and
//! Google Cloud by driving Terraform, lists them from Terraform state, locks
//! newly created hosts down with Ansible, and destroys them by index.

pub mod config;
pub mod diff;
pub mod digitalocean;
pub mod instance;
pub mod lifecycle;
pub mod lockdown;
pub mod plan;
pub mod request;
pub mod runner;
pub mod selection;
pub mod state;
pub mod terraform;
pub mod test_support;
pub mod validate;
pub mod workspace;

pub use config::{ConfigError, SkiffConfig};
pub use diff::diff;
pub use digitalocean::DigitalOceanCatalogue;
pub use instance::{Instance, Provider, Snapshot, UnknownProvider};
pub use lifecycle::{
    DeployOutcome, DeployPhase, DeploySettings, FixedDelay, InitializationWait, LifecycleError,
    LifecycleOrchestrator, LockdownStatus,
};
pub use lockdown::{Ansible, LockdownError, LockdownJob, SshSettings};
pub use plan::{DeploymentPlan, ModulePlan};
pub use request::{Allocation, DeployRequest, DeployRequestBuilder};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};
pub use selection::{DestroySet, IndexExpression, SelectionError};
pub use state::{StateParseError, parse_snapshot};
pub use terraform::{Terraform, TerraformError};
pub use validate::{RegionCatalogue, ValidationError, validate_deploy_request};
pub use workspace::{OperationLock, Workspace, WorkspaceError};
