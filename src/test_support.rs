//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use tokio::sync::{Mutex, MutexGuard};

use crate::instance::{Instance, Provider};
use crate::runner::{CommandOutput, CommandRunner, RunnerError};
use crate::validate::{CatalogueFuture, RegionCatalogue, ValidationError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, RunnerError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Builds an instance grouped in a per-provider-region module.
///
/// # Panics
///
/// Panics when `address` is not a valid IP address.
#[must_use]
pub fn instance(name: &str, provider: Provider, region: &str, address: Option<&str>) -> Instance {
    let group = format!("module.{}_{}", provider.slug(), region.replace('-', "_"));
    let mut built = grouped_instance(name, provider, region, &group);
    built.public_address = address.map(|raw| {
        raw.parse::<IpAddr>()
            .unwrap_or_else(|err| panic!("test address {raw} should parse: {err}"))
    });
    built
}

/// Builds an address-less instance belonging to `group`.
#[must_use]
pub fn grouped_instance(name: &str, provider: Provider, region: &str, group: &str) -> Instance {
    Instance {
        name: name.to_owned(),
        provider,
        region: region.to_owned(),
        public_address: None,
        address: format!(
            "{group}.{}.this[\"{name}\"]",
            provider.instance_resource_type()
        ),
        group: group.to_owned(),
    }
}

/// Region catalogue returning a fixed list, or a fixed failure.
#[derive(Debug)]
pub struct StaticCatalogue {
    regions: Result<Vec<String>, String>,
    lookups: AtomicUsize,
}

impl StaticCatalogue {
    /// Catalogue reporting `regions` as available for every provider.
    #[must_use]
    pub fn new(regions: &[&str]) -> Self {
        Self {
            regions: Ok(regions.iter().map(|region| (*region).to_owned()).collect()),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Catalogue whose every lookup fails with `message`.
    #[must_use]
    pub fn failing(message: &str) -> Self {
        Self {
            regions: Err(message.to_owned()),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of lookups served so far.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl RegionCatalogue for StaticCatalogue {
    fn available_regions(&self, provider: Provider) -> CatalogueFuture<'_> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        let result = self
            .regions
            .clone()
            .map_err(|message| ValidationError::RegionCatalogue { provider, message });
        Box::pin(async move { result })
    }
}

/// Builder for `terraform show -json` documents.
#[derive(Clone, Debug, Default)]
pub struct StateFixture {
    modules: Vec<(String, Vec<StateResource>)>,
}

impl StateFixture {
    /// Starts an empty state document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a root child module at `address` holding `resources`.
    #[must_use]
    pub fn module(mut self, address: &str, resources: Vec<StateResource>) -> Self {
        self.modules.push((address.to_owned(), resources));
        self
    }

    /// Renders the document as JSON text.
    #[must_use]
    pub fn render(&self) -> String {
        let child_modules: Vec<Value> = self
            .modules
            .iter()
            .map(|(address, resources)| {
                json!({
                    "address": address,
                    "resources": resources
                        .iter()
                        .map(|resource| resource.render(address))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        json!({
            "format_version": "1.0",
            "terraform_version": "1.9.0",
            "values": { "root_module": { "child_modules": child_modules } },
        })
        .to_string()
    }
}

/// One managed resource inside a [`StateFixture`] module.
#[derive(Clone, Debug)]
pub struct StateResource {
    resource_type: String,
    name: String,
    values: Value,
}

fn ip_value(address: Option<&str>) -> Value {
    address.map_or(Value::Null, |ip| Value::String(ip.to_owned()))
}

impl StateResource {
    /// DigitalOcean droplet.
    #[must_use]
    pub fn droplet(name: &str, region: &str, address: Option<&str>) -> Self {
        Self {
            resource_type: Provider::DigitalOcean.instance_resource_type().to_owned(),
            name: name.to_owned(),
            values: json!({
                "name": name,
                "region": region,
                "ipv4_address": ip_value(address),
            }),
        }
    }

    /// AWS EC2 instance placed in `availability_zone`.
    #[must_use]
    pub fn ec2(name: &str, availability_zone: &str, address: Option<&str>) -> Self {
        Self {
            resource_type: Provider::Aws.instance_resource_type().to_owned(),
            name: name.to_owned(),
            values: json!({
                "tags": { "Name": name },
                "availability_zone": availability_zone,
                "public_ip": ip_value(address),
            }),
        }
    }

    /// Google Compute Engine instance placed in `zone`.
    #[must_use]
    pub fn gce(name: &str, zone: &str, address: Option<&str>) -> Self {
        let access_config: Vec<Value> = address
            .map(|ip| json!({ "nat_ip": ip }))
            .into_iter()
            .collect();
        Self {
            resource_type: Provider::Google.instance_resource_type().to_owned(),
            name: name.to_owned(),
            values: json!({
                "name": name,
                "zone": zone,
                "network_interface": [ { "access_config": access_config } ],
            }),
        }
    }

    /// Azure Linux virtual machine.
    #[must_use]
    pub fn azure(name: &str, location: &str, address: Option<&str>) -> Self {
        Self {
            resource_type: Provider::Azure.instance_resource_type().to_owned(),
            name: name.to_owned(),
            values: json!({
                "name": name,
                "location": location,
                "public_ip_address": ip_value(address),
            }),
        }
    }

    /// Resource of a type that is not an instance.
    #[must_use]
    pub fn other(resource_type: &str, name: &str) -> Self {
        Self {
            resource_type: resource_type.to_owned(),
            name: name.to_owned(),
            values: json!({ "name": name }),
        }
    }

    fn render(&self, module: &str) -> Value {
        json!({
            "address": format!("{module}.{}.this[\"{}\"]", self.resource_type, self.name),
            "mode": "managed",
            "type": self.resource_type,
            "name": "this",
            "index": self.name,
            "provider_name": "registry.terraform.io/hashicorp/test",
            "values": self.values,
        })
    }
}

/// Temporary directory wrapped as a [`crate::workspace::Workspace`].
#[cfg(test)]
pub struct TempWorkspace {
    dir: tempfile::TempDir,
    root: camino::Utf8PathBuf,
}

#[cfg(test)]
impl TempWorkspace {
    /// Creates a fresh temporary workspace.
    ///
    /// # Panics
    ///
    /// Panics when the directory cannot be created or is not UTF-8.
    #[must_use]
    pub fn new() -> Self {
        let dir = tempfile::tempdir()
            .unwrap_or_else(|err| panic!("temporary directory should be created: {err}"));
        let root = camino::Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temporary path should be UTF-8: {}", path.display()));
        Self { dir, root }
    }

    /// Workspace handle rooted at the temporary directory.
    #[must_use]
    pub fn workspace(&self) -> crate::workspace::Workspace {
        crate::workspace::Workspace::new(self.root.clone())
    }

    /// Root of the temporary directory.
    #[must_use]
    pub fn root(&self) -> &camino::Utf8Path {
        debug_assert!(self.dir.path().exists(), "temporary directory removed early");
        &self.root
    }
}
