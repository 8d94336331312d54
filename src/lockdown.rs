//! Firewall lock-down of freshly created instances through Ansible.
//!
//! The job targets only the instances a deploy created. Its playbook allows
//! the administrative TCP ports, denies all other inbound traffic and
//! enables `ufw`.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::net::IpAddr;

use serde::Serialize;
use thiserror::Error;

use crate::instance::Instance;
use crate::runner::{CommandRunner, RunnerError};
use crate::workspace::{Workspace, WorkspaceError};

/// Inventory file written for `ansible-playbook`.
pub const INVENTORY_FILE_NAME: &str = "hosts.yml";

/// Playbook file written for `ansible-playbook`.
pub const PLAYBOOK_FILE_NAME: &str = "main.yml";

/// Errors raised while generating or executing the lock-down job.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LockdownError {
    /// Raised when `ansible-playbook` exits unsuccessfully.
    #[error("{program} exited with status {status_text} while locking down {hosts}: {stderr}")]
    Execution {
        /// Program that failed.
        program: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Comma separated host addresses the job targeted.
        hosts: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when the inventory or playbook cannot be rendered.
    #[error("failed to render {file}: {message}")]
    Render {
        /// File being rendered.
        file: String,
        /// Serializer error message.
        message: String,
    },
    /// Raised when the job files cannot be written.
    #[error(transparent)]
    Write(#[from] WorkspaceError),
    /// Raised when `ansible-playbook` cannot be started.
    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// One host the lock-down job applies to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockdownHost {
    /// Instance name.
    pub name: String,
    /// Public address Ansible connects to.
    pub address: IpAddr,
}

/// Restrictive-firewall job scoped to newly created instances.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LockdownJob {
    /// Hosts to lock down.
    pub hosts: Vec<LockdownHost>,
    /// Names of new instances skipped because they have no public address.
    pub skipped: Vec<String>,
    /// TCP ports left open; everything else inbound is denied.
    pub tcp_ports: Vec<u16>,
}

impl LockdownJob {
    /// Builds a job for `instances`, allowing only `tcp_ports`.
    #[must_use]
    pub fn for_instances(instances: &[Instance], tcp_ports: &[u16]) -> Self {
        let mut hosts = Vec::new();
        let mut skipped = Vec::new();
        for instance in instances {
            match instance.public_address {
                Some(address) => hosts.push(LockdownHost {
                    name: instance.name.clone(),
                    address,
                }),
                None => skipped.push(instance.name.clone()),
            }
        }
        Self {
            hosts,
            skipped,
            tcp_ports: tcp_ports.to_vec(),
        }
    }

    /// Whether the job has any host to act on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    fn host_list(&self) -> String {
        self.hosts
            .iter()
            .map(|host| host.address.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Connection settings shared by every host in the inventory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Remote user Ansible logs in as.
    pub user: String,
    /// Private key Ansible authenticates with.
    pub private_key_file: String,
}

#[derive(Serialize)]
struct Inventory<'a> {
    all: InventoryGroup<'a>,
}

#[derive(Serialize)]
struct InventoryGroup<'a> {
    hosts: BTreeMap<String, HostVars<'a>>,
    vars: GroupVars,
}

#[derive(Serialize)]
struct HostVars<'a> {
    skiff_instance_name: &'a str,
}

#[derive(Serialize)]
struct GroupVars {
    ansible_user: String,
    ansible_ssh_private_key_file: String,
    ansible_ssh_common_args: &'static str,
}

#[derive(Serialize)]
struct Play {
    name: &'static str,
    hosts: &'static str,
    #[serde(rename = "become")]
    escalate: bool,
    gather_facts: bool,
    tasks: Vec<Task>,
}

#[derive(Serialize)]
struct Task {
    name: String,
    #[serde(rename = "community.general.ufw")]
    ufw: UfwArgs,
}

#[derive(Serialize)]
#[serde(untagged)]
enum UfwArgs {
    Rule {
        rule: &'static str,
        port: String,
        proto: &'static str,
    },
    Policy {
        state: &'static str,
        policy: &'static str,
        direction: &'static str,
    },
}

/// Renders the inventory YAML for `job`.
///
/// # Errors
///
/// Returns [`LockdownError::Render`] when serialisation fails.
pub fn render_inventory(job: &LockdownJob, ssh: &SshSettings) -> Result<String, LockdownError> {
    let inventory = Inventory {
        all: InventoryGroup {
            hosts: job
                .hosts
                .iter()
                .map(|host| {
                    (
                        host.address.to_string(),
                        HostVars {
                            skiff_instance_name: &host.name,
                        },
                    )
                })
                .collect(),
            vars: GroupVars {
                ansible_user: ssh.user.clone(),
                ansible_ssh_private_key_file: ssh.private_key_file.clone(),
                ansible_ssh_common_args: "-o StrictHostKeyChecking=no -o UserKnownHostsFile=/dev/null",
            },
        },
    };
    serde_yaml::to_string(&inventory).map_err(|err| LockdownError::Render {
        file: INVENTORY_FILE_NAME.to_owned(),
        message: err.to_string(),
    })
}

/// Renders the playbook YAML for `job`.
///
/// # Errors
///
/// Returns [`LockdownError::Render`] when serialisation fails.
pub fn render_playbook(job: &LockdownJob) -> Result<String, LockdownError> {
    let mut tasks: Vec<Task> = job
        .tcp_ports
        .iter()
        .map(|port| Task {
            name: format!("Allow inbound tcp/{port}"),
            ufw: UfwArgs::Rule {
                rule: "allow",
                port: port.to_string(),
                proto: "tcp",
            },
        })
        .collect();
    tasks.push(Task {
        name: String::from("Deny all other inbound traffic"),
        ufw: UfwArgs::Policy {
            state: "enabled",
            policy: "deny",
            direction: "incoming",
        },
    });
    let plays = vec![Play {
        name: "Restrict inbound traffic to administrative ports",
        hosts: "all",
        escalate: true,
        gather_facts: false,
        tasks,
    }];
    serde_yaml::to_string(&plays).map_err(|err| LockdownError::Render {
        file: PLAYBOOK_FILE_NAME.to_owned(),
        message: err.to_string(),
    })
}

/// Executes lock-down jobs with `ansible-playbook`.
#[derive(Clone, Debug)]
pub struct Ansible<R: CommandRunner> {
    binary: String,
    workspace: Workspace,
    ssh: SshSettings,
    runner: R,
}

impl<R: CommandRunner> Ansible<R> {
    /// Creates an executor running `binary` against files in `workspace`.
    #[must_use]
    pub fn new(
        binary: impl Into<String>,
        workspace: Workspace,
        ssh: SshSettings,
        runner: R,
    ) -> Self {
        Self {
            binary: binary.into(),
            workspace,
            ssh,
            runner,
        }
    }

    /// Writes the inventory and playbook for `job` and runs them.
    ///
    /// # Errors
    ///
    /// Returns [`LockdownError::Execution`] when the playbook fails, or a
    /// render/write/spawn error when it cannot be started.
    pub fn execute(&self, job: &LockdownJob) -> Result<(), LockdownError> {
        let inventory = self
            .workspace
            .write(INVENTORY_FILE_NAME, &render_inventory(job, &self.ssh)?)?;
        let playbook = self
            .workspace
            .write(PLAYBOOK_FILE_NAME, &render_playbook(job)?)?;

        let args = vec![
            OsString::from("-i"),
            OsString::from(inventory.as_str()),
            OsString::from(playbook.as_str()),
        ];
        tracing::info!(hosts = %job.host_list(), "running lock-down playbook");
        let output = self.runner.run(&self.binary, &args)?;
        if output.is_success() {
            return Ok(());
        }
        Err(LockdownError::Execution {
            program: self.binary.clone(),
            status_text: output.status_text(),
            hosts: job.host_list(),
            stderr: output.stderr,
        })
    }
}
