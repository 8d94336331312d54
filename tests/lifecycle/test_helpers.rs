//! Shared fixtures and helpers for lifecycle BDD scenarios.

use std::rc::Rc;
use std::time::Duration;

use camino::Utf8PathBuf;
use rstest::fixture;
use skiff::test_support::{ScriptedRunner, StateFixture, StateResource, StaticCatalogue};
use skiff::{
    Ansible, DeployOutcome, DeploySettings, DestroySet, FixedDelay, LifecycleError,
    LifecycleOrchestrator, SshSettings, Terraform, Workspace,
};
use tempfile::TempDir;

pub type Orchestrator = LifecycleOrchestrator<ScriptedRunner, StaticCatalogue, FixedDelay>;

#[derive(Clone, Debug)]
pub enum Outcome {
    Deployed(DeployOutcome),
    Destroyed(DestroySet),
    Failed(LifecycleError),
}

#[derive(Clone, Debug)]
pub struct LifecycleContext {
    dir: Rc<TempDir>,
    pub runner: ScriptedRunner,
    pub existing: StateFixture,
    pub catalogue_regions: Vec<String>,
    pub outcome: Option<Outcome>,
}

impl LifecycleContext {
    pub fn workspace(&self) -> Workspace {
        let root = Utf8PathBuf::from_path_buf(self.dir.path().to_path_buf())
            .unwrap_or_else(|path| panic!("temporary path should be UTF-8: {}", path.display()));
        Workspace::new(root)
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let regions: Vec<&str> = self.catalogue_regions.iter().map(String::as_str).collect();
        let workspace = self.workspace();
        LifecycleOrchestrator::new(
            Terraform::new("terraform", workspace.clone(), self.runner.clone()),
            Ansible::new(
                "ansible-playbook",
                workspace,
                SshSettings {
                    user: String::from("root"),
                    private_key_file: String::from("/home/op/.ssh/id_rsa"),
                },
                self.runner.clone(),
            ),
            StaticCatalogue::new(&regions),
            FixedDelay::new(Duration::ZERO),
            DeploySettings {
                module_dir: Utf8PathBuf::from("modules"),
                ssh_public_key_file: String::from("/home/op/.ssh/id_rsa.pub"),
                digitalocean_token: Some(String::from("token")),
                admin_ports: vec![22],
            },
        )
    }

    pub fn push_state(&self, fixture: &StateFixture) {
        self.runner.push_output(Some(0), fixture.render(), "");
    }
}

#[fixture]
pub fn lifecycle_context() -> LifecycleContext {
    let dir = tempfile::tempdir()
        .unwrap_or_else(|err| panic!("temporary directory should be created: {err}"));
    LifecycleContext {
        dir: Rc::new(dir),
        runner: ScriptedRunner::new(),
        existing: StateFixture::new(),
        catalogue_regions: Vec::new(),
        outcome: None,
    }
}

pub fn three_droplets(region: &str) -> StateFixture {
    StateFixture::new().module(
        "module.skiff_do_existing",
        vec![
            StateResource::droplet("a", region, Some("203.0.113.1")),
            StateResource::droplet("b", region, Some("203.0.113.2")),
            StateResource::droplet("c", region, Some("203.0.113.3")),
        ],
    )
}

pub fn four_droplets() -> StateFixture {
    StateFixture::new()
        .module(
            "module.shared",
            vec![
                StateResource::droplet("a", "nyc1", None),
                StateResource::droplet("b", "nyc1", None),
            ],
        )
        .module("module.solo_c", vec![StateResource::droplet("c", "nyc1", None)])
        .module("module.solo_d", vec![StateResource::droplet("d", "nyc1", None)])
}

/// Address assigned to the `n`th droplet a scenario creates.
pub fn new_droplet_address(position: usize) -> String {
    format!("198.51.100.{}", position + 10)
}
