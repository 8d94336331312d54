//! Deploy, destroy and list workflows.
//!
//! A deploy walks `Idle → Validated → Provisioning → AwaitingInitialization →
//! LockingDown → Done`, dropping to `Failed` from any phase. Nothing is
//! rolled back: an apply that fails part way leaves whatever Terraform
//! managed to create, and the next `list` shows it.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio::time::sleep;

use crate::diff::diff;
use crate::instance::{Instance, Snapshot};
use crate::lockdown::{Ansible, LockdownJob};
use crate::plan::{DeploymentPlan, RenderSettings, new_batch_id};
use crate::request::DeployRequest;
use crate::runner::CommandRunner;
use crate::selection::{DestroySet, SelectionError};
use crate::terraform::{Terraform, TerraformError};
use crate::validate::{RegionCatalogue, ValidationError, validate_deploy_request};
use crate::workspace::WorkspaceError;

/// Errors surfaced by lifecycle operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum LifecycleError {
    /// Raised when the deploy request is rejected before any side effect.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Raised when a destroy index expression cannot be resolved.
    #[error(transparent)]
    Selection(#[from] SelectionError),
    /// Raised when Terraform fails; resources may be partially changed.
    #[error(transparent)]
    Terraform(#[from] TerraformError),
    /// Raised when the operation lock cannot be taken.
    #[error(transparent)]
    Lock(#[from] WorkspaceError),
    /// Raised when the initialisation wait is interrupted.
    #[error("waiting for instances to initialise failed: {0}")]
    Wait(String),
}

/// Phases of a deploy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeployPhase {
    /// Nothing has happened yet.
    Idle,
    /// The request passed validation.
    Validated,
    /// Terraform is creating resources.
    Provisioning,
    /// Waiting for new instances to finish booting.
    AwaitingInitialization,
    /// Applying the restrictive firewall to new instances.
    LockingDown,
    /// The deploy finished.
    Done,
    /// The deploy stopped with an error.
    Failed,
}

impl fmt::Display for DeployPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validated => "validated",
            Self::Provisioning => "provisioning",
            Self::AwaitingInitialization => "awaiting-initialization",
            Self::LockingDown => "locking-down",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of the lock-down step of a deploy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum LockdownStatus {
    /// The playbook ran successfully on every reachable new instance.
    Applied,
    /// The playbook failed; the instances exist but may be unrestricted.
    Failed(String),
    /// No new instance had a public address to lock down.
    Skipped,
}

/// Summary of a completed deploy.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployOutcome {
    /// Identifier shared by the names of this deploy's instances.
    pub batch: String,
    /// Instances present after the apply that were absent before it.
    pub new_instances: Vec<Instance>,
    /// New instances left out of lock-down because they had no address.
    pub skipped_hosts: Vec<String>,
    /// What happened during lock-down.
    pub lockdown: LockdownStatus,
}

/// Future returned by [`InitializationWait::wait`].
pub type WaitFuture<'a> = Pin<Box<dyn Future<Output = Result<(), LifecycleError>> + Send + 'a>>;

/// Bounded pause between provisioning and lock-down.
pub trait InitializationWait {
    /// Waits until freshly provisioned instances are expected to accept
    /// connections.
    fn wait(&self) -> WaitFuture<'_>;
}

/// Sleeps for a fixed duration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    /// Creates a wait of `delay`.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl InitializationWait for FixedDelay {
    fn wait(&self) -> WaitFuture<'_> {
        let delay = self.delay;
        Box::pin(async move {
            tracing::info!(seconds = delay.as_secs(), "waiting for instances to initialise");
            sleep(delay).await;
            Ok(())
        })
    }
}

/// Inputs to rendering desired state and locking hosts down.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploySettings {
    /// Directory holding one Terraform module per provider.
    pub module_dir: Utf8PathBuf,
    /// Public key installed on new instances.
    pub ssh_public_key_file: String,
    /// DigitalOcean API token written as a Terraform variable.
    pub digitalocean_token: Option<String>,
    /// TCP ports left open by lock-down.
    pub admin_ports: Vec<u16>,
}

/// Drives the deploy, destroy and list workflows.
#[derive(Debug)]
pub struct LifecycleOrchestrator<R: CommandRunner, C, W> {
    terraform: Terraform<R>,
    ansible: Ansible<R>,
    catalogue: C,
    initialization: W,
    settings: DeploySettings,
}

impl<R, C, W> LifecycleOrchestrator<R, C, W>
where
    R: CommandRunner,
    C: RegionCatalogue,
    W: InitializationWait,
{
    /// Creates an orchestrator.
    #[must_use]
    pub const fn new(
        terraform: Terraform<R>,
        ansible: Ansible<R>,
        catalogue: C,
        initialization: W,
        settings: DeploySettings,
    ) -> Self {
        Self {
            terraform,
            ansible,
            catalogue,
            initialization,
            settings,
        }
    }

    /// Captures the current inventory.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Terraform`] when the state cannot be read.
    pub fn list(&self) -> Result<Snapshot, LifecycleError> {
        Ok(self.terraform.snapshot()?)
    }

    /// Destroys the instances at the positions named by `expression`, plus
    /// any module the removal would leave empty.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Lock`] when another operation is running,
    /// [`LifecycleError::Selection`] before any side effect when the
    /// expression is invalid, or [`LifecycleError::Terraform`] when state
    /// cannot be read or the destroy fails.
    pub fn destroy(&self, expression: &str) -> Result<DestroySet, LifecycleError> {
        let _lock = self.terraform.workspace().lock()?;
        let snapshot = self.terraform.snapshot()?;
        let set = DestroySet::from_expression(expression, &snapshot)?;
        tracing::info!(
            instances = %set.instances.join(","),
            orphaned_groups = %set.orphaned_groups.join(","),
            "indices validated"
        );
        self.terraform.destroy(&set.targets)?;
        tracing::info!(count = set.instances.len(), "destroy complete");
        Ok(set)
    }

    /// Validates `request`, provisions it, waits, and locks down exactly
    /// the instances the deploy created.
    ///
    /// A lock-down failure does not fail the deploy; it is reported through
    /// [`DeployOutcome::lockdown`].
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::Validation`] without side effects when the
    /// request is rejected, [`LifecycleError::Lock`] when another operation
    /// is running, or [`LifecycleError::Terraform`] when provisioning fails.
    pub async fn deploy(&self, request: &DeployRequest) -> Result<DeployOutcome, LifecycleError> {
        let mut phase = DeployPhase::Idle;
        let result = self.run_deploy(request, &mut phase).await;
        if let Err(err) = &result {
            tracing::error!(failed_in = %phase, error = %err, "deploy failed");
            transition(&mut phase, DeployPhase::Failed);
        }
        result
    }

    async fn run_deploy(
        &self,
        request: &DeployRequest,
        phase: &mut DeployPhase,
    ) -> Result<DeployOutcome, LifecycleError> {
        validate_deploy_request(request, &self.catalogue).await?;
        transition(phase, DeployPhase::Validated);

        let _lock = self.terraform.workspace().lock()?;
        let before = self.terraform.snapshot()?;

        transition(phase, DeployPhase::Provisioning);
        let batch = new_batch_id();
        let mut plan = DeploymentPlan::from_snapshot(&before);
        let planned = plan.add_batch(request, &batch);
        tracing::info!(%batch, instances = planned.len(), "planned new instances");
        let render = RenderSettings {
            module_dir: &self.settings.module_dir,
            ssh_public_key_file: &self.settings.ssh_public_key_file,
        };
        self.terraform
            .write_plan(&plan, &render, self.settings.digitalocean_token.as_deref())?;
        self.terraform.apply()?;

        transition(phase, DeployPhase::AwaitingInitialization);
        self.initialization.wait().await?;

        let after = self.terraform.snapshot()?;
        let new_instances = diff(&before, &after);
        tracing::info!(count = new_instances.len(), "detected new instances");

        transition(phase, DeployPhase::LockingDown);
        let job = LockdownJob::for_instances(&new_instances, &self.settings.admin_ports);
        for name in &job.skipped {
            tracing::warn!(instance = %name, "no public address yet; skipping lock-down");
        }
        let lockdown = self.lock_down(&job);

        transition(phase, DeployPhase::Done);
        Ok(DeployOutcome {
            batch,
            skipped_hosts: job.skipped,
            new_instances,
            lockdown,
        })
    }

    fn lock_down(&self, job: &LockdownJob) -> LockdownStatus {
        if job.is_empty() {
            return LockdownStatus::Skipped;
        }
        match self.ansible.execute(job) {
            Ok(()) => LockdownStatus::Applied,
            Err(err) => {
                tracing::warn!(error = %err, "lock-down failed; new instances may be unrestricted");
                LockdownStatus::Failed(err.to_string())
            }
        }
    }
}

fn transition(phase: &mut DeployPhase, next: DeployPhase) {
    tracing::info!(from = %phase, to = %next, "deploy phase");
    *phase = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockdown::{INVENTORY_FILE_NAME, SshSettings};
    use crate::terraform::MAIN_FILE_NAME;
    use crate::test_support::{
        ScriptedRunner, StateFixture, StateResource, StaticCatalogue, TempWorkspace,
    };
    use crate::workspace::LOCK_FILE_NAME;
    use rstest::{fixture, rstest};

    struct Harness {
        temp: TempWorkspace,
        runner: ScriptedRunner,
    }

    impl Harness {
        fn orchestrator(
            &self,
            catalogue: StaticCatalogue,
        ) -> LifecycleOrchestrator<ScriptedRunner, StaticCatalogue, FixedDelay> {
            let workspace = self.temp.workspace();
            let ssh = SshSettings {
                user: String::from("root"),
                private_key_file: String::from("/home/op/.ssh/id_rsa"),
            };
            LifecycleOrchestrator::new(
                Terraform::new("terraform", workspace.clone(), self.runner.clone()),
                Ansible::new("ansible-playbook", workspace, ssh, self.runner.clone()),
                catalogue,
                FixedDelay::new(Duration::ZERO),
                DeploySettings {
                    module_dir: Utf8PathBuf::from("modules"),
                    ssh_public_key_file: String::from("/home/op/.ssh/id_rsa.pub"),
                    digitalocean_token: Some(String::from("token")),
                    admin_ports: vec![22],
                },
            )
        }

        fn push_state(&self, fixture: &StateFixture) {
            self.runner.push_output(Some(0), fixture.render(), "");
        }

        fn programs(&self) -> Vec<String> {
            self.runner
                .invocations()
                .into_iter()
                .map(|invocation| invocation.program)
                .collect()
        }
    }

    #[fixture]
    fn harness() -> Harness {
        Harness {
            temp: TempWorkspace::new(),
            runner: ScriptedRunner::new(),
        }
    }

    fn do_request(region: &str, count: usize) -> DeployRequest {
        DeployRequest::builder()
            .providers(["DO"])
            .regions("DO", [region])
            .count(count)
            .name_prefix("skiff")
            .build()
            .expect("request builds")
    }

    fn existing() -> StateFixture {
        StateFixture::new().module(
            "module.skiff_do_nyc1_old",
            vec![
                StateResource::droplet("a", "nyc1", Some("203.0.113.1")),
                StateResource::droplet("b", "nyc1", Some("203.0.113.2")),
                StateResource::droplet("c", "nyc1", Some("203.0.113.3")),
            ],
        )
    }

    fn with_new(fresh: Vec<StateResource>) -> StateFixture {
        existing().module("module.skiff_do_nyc1_new", fresh)
    }

    #[rstest]
    #[tokio::test]
    async fn unavailable_region_fails_before_side_effects(harness: Harness) {
        let orchestrator = harness.orchestrator(StaticCatalogue::new(&["nyc1"]));
        let err = orchestrator
            .deploy(&do_request("mars1", 1))
            .await
            .expect_err("mars1 is unavailable");
        assert!(err.to_string().contains("mars1"), "{err}");
        assert!(harness.runner.invocations().is_empty());
        assert!(harness.temp.workspace().read(MAIN_FILE_NAME).is_err());
    }

    #[rstest]
    #[tokio::test]
    async fn deploy_locks_down_only_new_instances(harness: Harness) {
        harness.push_state(&existing());
        harness.runner.push_success();
        harness.runner.push_success();
        harness.push_state(&with_new(vec![
            StateResource::droplet("d", "nyc1", Some("203.0.113.4")),
            StateResource::droplet("e", "nyc1", Some("203.0.113.5")),
        ]));
        harness.runner.push_success();

        let orchestrator = harness.orchestrator(StaticCatalogue::new(&["nyc1"]));
        let outcome = orchestrator
            .deploy(&do_request("nyc1", 2))
            .await
            .expect("deploy succeeds");

        let names: Vec<_> = outcome
            .new_instances
            .iter()
            .map(|instance| instance.name.as_str())
            .collect();
        assert_eq!(names, ["d", "e"]);
        assert_eq!(outcome.lockdown, LockdownStatus::Applied);
        assert_eq!(
            harness.programs(),
            ["terraform", "terraform", "terraform", "terraform", "ansible-playbook"]
        );

        let inventory = harness
            .temp
            .workspace()
            .read(INVENTORY_FILE_NAME)
            .expect("inventory written");
        assert!(inventory.contains("203.0.113.4"), "{inventory}");
        assert!(inventory.contains("203.0.113.5"), "{inventory}");
        assert!(!inventory.contains("203.0.113.1"), "{inventory}");

        let main = harness
            .temp
            .workspace()
            .read(MAIN_FILE_NAME)
            .expect("desired state written");
        assert!(main.contains("skiff_do_nyc1_old"), "{main}");
        assert!(
            main.contains(&format!("skiff-do-nyc1-{}-1", outcome.batch)),
            "{main}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn lockdown_failure_is_reported_not_raised(harness: Harness) {
        harness.push_state(&existing());
        harness.runner.push_success();
        harness.runner.push_success();
        harness.push_state(&with_new(vec![StateResource::droplet(
            "d",
            "nyc1",
            Some("203.0.113.4"),
        )]));
        harness.runner.push_output(Some(2), "", "host unreachable");

        let orchestrator = harness.orchestrator(StaticCatalogue::new(&["nyc1"]));
        let outcome = orchestrator
            .deploy(&do_request("nyc1", 1))
            .await
            .expect("deploy still succeeds");
        assert!(
            matches!(outcome.lockdown, LockdownStatus::Failed(ref message) if message.contains("host unreachable")),
            "{:?}",
            outcome.lockdown
        );
    }

    #[rstest]
    #[tokio::test]
    async fn addressless_instances_are_skipped(harness: Harness) {
        harness.push_state(&existing());
        harness.runner.push_success();
        harness.runner.push_success();
        harness.push_state(&with_new(vec![StateResource::droplet("d", "nyc1", None)]));

        let orchestrator = harness.orchestrator(StaticCatalogue::new(&["nyc1"]));
        let outcome = orchestrator
            .deploy(&do_request("nyc1", 1))
            .await
            .expect("deploy succeeds");
        assert_eq!(outcome.lockdown, LockdownStatus::Skipped);
        assert_eq!(outcome.skipped_hosts, ["d"]);
        assert!(!harness.programs().contains(&String::from("ansible-playbook")));
    }

    #[rstest]
    #[tokio::test]
    async fn apply_failure_stops_and_releases_lock(harness: Harness) {
        harness.push_state(&existing());
        harness.runner.push_success();
        harness.runner.push_output(Some(1), "", "quota exceeded");

        let orchestrator = harness.orchestrator(StaticCatalogue::new(&["nyc1"]));
        let err = orchestrator
            .deploy(&do_request("nyc1", 1))
            .await
            .expect_err("apply fails");
        assert!(
            matches!(err, LifecycleError::Terraform(TerraformError::Apply { .. })),
            "{err}"
        );
        assert_eq!(harness.runner.invocations().len(), 3);
        assert!(!harness.temp.root().join(LOCK_FILE_NAME).exists());
    }

    fn four_instances() -> StateFixture {
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

    #[rstest]
    fn destroy_targets_selection_and_orphaned_modules(harness: Harness) {
        harness.push_state(&four_instances());
        harness.runner.push_success();

        let orchestrator = harness.orchestrator(StaticCatalogue::new(&[]));
        let set = orchestrator.destroy("1,3").expect("destroy succeeds");
        assert_eq!(set.instances, ["b", "d"]);
        assert_eq!(
            set.targets,
            [
                "module.solo_d",
                "module.shared.digitalocean_droplet.this[\"b\"]"
            ]
        );

        let invocation = harness.runner.invocations().pop().expect("destroy invoked");
        let command = invocation.command_string();
        assert!(command.contains("-target=module.solo_d"), "{command}");
        assert!(!command.contains("solo_c"), "{command}");
        assert!(!command.contains("this[\"a\"]"), "{command}");
    }

    #[rstest]
    fn destroy_out_of_range_issues_no_destroy(harness: Harness) {
        harness.push_state(&four_instances());
        let orchestrator = harness.orchestrator(StaticCatalogue::new(&[]));
        let err = orchestrator.destroy("7").expect_err("index 7 is out of range");
        assert!(matches!(
            err,
            LifecycleError::Selection(SelectionError::OutOfRange { index: 7, len: 4 })
        ));
        assert_eq!(harness.runner.invocations().len(), 1);
    }

    #[rstest]
    fn destroy_is_refused_while_locked(harness: Harness) {
        let _held = harness.temp.workspace().lock().expect("lock taken");
        let orchestrator = harness.orchestrator(StaticCatalogue::new(&[]));
        let err = orchestrator.destroy("0").expect_err("lock is held");
        assert!(matches!(err, LifecycleError::Lock(WorkspaceError::Locked { .. })));
        assert!(harness.runner.invocations().is_empty());
    }

    #[rstest]
    fn list_is_stable_without_mutation(harness: Harness) {
        harness.push_state(&four_instances());
        harness.push_state(&four_instances());
        let orchestrator = harness.orchestrator(StaticCatalogue::new(&[]));
        let first = orchestrator.list().expect("first list").listing();
        let second = orchestrator.list().expect("second list").listing();
        assert_eq!(first, second);
        assert_eq!(first.first().map(String::as_str), Some("0 : a, pending, DO, nyc1"));
    }

    #[test]
    fn phases_render_kebab_case() {
        assert_eq!(
            DeployPhase::AwaitingInitialization.to_string(),
            "awaiting-initialization"
        );
    }
}
