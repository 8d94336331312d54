//! BDD step definitions for lifecycle behaviour.

use rstest_bdd_macros::{given, then, when};
use skiff::lockdown::INVENTORY_FILE_NAME;
use skiff::test_support::StateResource;
use skiff::{DeployRequest, LifecycleError, LockdownStatus, SelectionError};
use tokio::runtime::Runtime;

use super::test_helpers::{
    LifecycleContext, Outcome, four_droplets, new_droplet_address, three_droplets,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn split_names(names: &str) -> Vec<String> {
    names
        .split(',')
        .map(|name| name.trim().to_owned())
        .filter(|name| !name.is_empty())
        .collect()
}

#[given("a workspace managing three droplets in \"{region}\"")]
fn three_droplet_workspace(mut lifecycle_context: LifecycleContext, region: String) -> LifecycleContext {
    lifecycle_context.existing = three_droplets(region.trim());
    lifecycle_context
}

#[given("a workspace managing four droplets across three modules")]
fn four_droplet_workspace(mut lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context.existing = four_droplets();
    lifecycle_context
}

#[given("the DigitalOcean catalogue offers \"{regions}\"")]
fn catalogue_offers(mut lifecycle_context: LifecycleContext, regions: String) -> LifecycleContext {
    lifecycle_context.catalogue_regions = split_names(&regions);
    lifecycle_context
}

#[given("terraform creates droplets \"{names}\"")]
fn terraform_creates(lifecycle_context: LifecycleContext, names: String) -> LifecycleContext {
    let created: Vec<StateResource> = split_names(&names)
        .iter()
        .enumerate()
        .map(|(position, name)| {
            StateResource::droplet(name, "nyc1", Some(&new_droplet_address(position)))
        })
        .collect();
    let after = lifecycle_context
        .existing
        .clone()
        .module("module.skiff_do_new", created);

    lifecycle_context.push_state(&lifecycle_context.existing);
    lifecycle_context.runner.push_success(); // init
    lifecycle_context.runner.push_success(); // apply
    lifecycle_context.push_state(&after);
    lifecycle_context
}

#[given("the lock-down playbook succeeds")]
fn playbook_succeeds(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context.runner.push_success();
    lifecycle_context
}

#[given("the lock-down playbook fails")]
fn playbook_fails(lifecycle_context: LifecycleContext) -> LifecycleContext {
    lifecycle_context
        .runner
        .push_output(Some(2), "", "host unreachable");
    lifecycle_context
}

#[when("I deploy \"{count}\" instance to DigitalOcean region \"{region}\"")]
fn deploy(
    mut lifecycle_context: LifecycleContext,
    count: usize,
    region: String,
) -> Result<LifecycleContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let request = DeployRequest::builder()
        .providers(["DO"])
        .regions("DO", [region.trim()])
        .count(count)
        .name_prefix("skiff")
        .build()
        .map_err(|err| StepError::Assertion(format!("request should build: {err}")))?;

    let orchestrator = lifecycle_context.orchestrator();
    let result = runtime.block_on(async { orchestrator.deploy(&request).await });
    lifecycle_context.outcome = Some(match result {
        Ok(outcome) => Outcome::Deployed(outcome),
        Err(err) => Outcome::Failed(err),
    });
    Ok(lifecycle_context)
}

#[when("I destroy indices \"{expression}\"")]
fn destroy(mut lifecycle_context: LifecycleContext, expression: String) -> LifecycleContext {
    lifecycle_context.push_state(&lifecycle_context.existing);
    lifecycle_context.runner.push_success();
    let result = lifecycle_context.orchestrator().destroy(&expression);
    lifecycle_context.outcome = Some(match result {
        Ok(set) => Outcome::Destroyed(set),
        Err(err) => Outcome::Failed(err),
    });
    lifecycle_context
}

fn failure(lifecycle_context: &LifecycleContext) -> Result<&LifecycleError, StepError> {
    match &lifecycle_context.outcome {
        Some(Outcome::Failed(err)) => Ok(err),
        other => Err(StepError::Assertion(format!(
            "expected failure, got {other:?}"
        ))),
    }
}

fn deployed(lifecycle_context: &LifecycleContext) -> Result<&skiff::DeployOutcome, StepError> {
    match &lifecycle_context.outcome {
        Some(Outcome::Deployed(outcome)) => Ok(outcome),
        other => Err(StepError::Assertion(format!(
            "expected deploy outcome, got {other:?}"
        ))),
    }
}

fn destroyed(lifecycle_context: &LifecycleContext) -> Result<&skiff::DestroySet, StepError> {
    match &lifecycle_context.outcome {
        Some(Outcome::Destroyed(set)) => Ok(set),
        other => Err(StepError::Assertion(format!(
            "expected destroy set, got {other:?}"
        ))),
    }
}

#[then("the deploy fails naming \"{region}\"")]
fn deploy_fails_naming(lifecycle_context: &LifecycleContext, region: String) -> Result<(), StepError> {
    let err = failure(lifecycle_context)?;
    if matches!(err, LifecycleError::Validation(_)) && err.to_string().contains(region.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected validation error naming {region}, got: {err}"
        )))
    }
}

#[then("no external command was run")]
fn no_external_command(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let invocations = lifecycle_context.runner.invocations();
    if invocations.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no commands, got {invocations:?}"
        )))
    }
}

#[then("the new instances are \"{names}\"")]
fn new_instances_are(lifecycle_context: &LifecycleContext, names: String) -> Result<(), StepError> {
    let outcome = deployed(lifecycle_context)?;
    let actual: Vec<String> = outcome
        .new_instances
        .iter()
        .map(|instance| instance.name.clone())
        .collect();
    let expected = split_names(&names);
    if actual == expected {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected new instances {expected:?}, got {actual:?}"
        )))
    }
}

#[then("the lock-down inventory lists only the new instances")]
fn inventory_lists_new_instances(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let outcome = deployed(lifecycle_context)?;
    let inventory = lifecycle_context
        .workspace()
        .read(INVENTORY_FILE_NAME)
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    for position in 0..outcome.new_instances.len() {
        let address = new_droplet_address(position);
        if !inventory.contains(&address) {
            return Err(StepError::Assertion(format!(
                "inventory should contain {address}: {inventory}"
            )));
        }
    }
    if inventory.contains("203.0.113.") {
        return Err(StepError::Assertion(format!(
            "inventory should not contain pre-existing hosts: {inventory}"
        )));
    }
    Ok(())
}

#[then("lock-down was applied")]
fn lockdown_applied(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let outcome = deployed(lifecycle_context)?;
    if outcome.lockdown == LockdownStatus::Applied {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected applied lock-down, got {:?}",
            outcome.lockdown
        )))
    }
}

#[then("lock-down reports a failure")]
fn lockdown_failed(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let outcome = deployed(lifecycle_context)?;
    match &outcome.lockdown {
        LockdownStatus::Failed(message) if message.contains("host unreachable") => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected lock-down failure, got {other:?}"
        ))),
    }
}

#[then("terraform destroys \"{count}\" targets")]
fn destroys_count(lifecycle_context: &LifecycleContext, count: usize) -> Result<(), StepError> {
    let set = destroyed(lifecycle_context)?;
    if set.targets.len() == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} targets, got {:?}",
            set.targets
        )))
    }
}

fn assert_target(lifecycle_context: &LifecycleContext, target: &str) -> Result<(), StepError> {
    let set = destroyed(lifecycle_context)?;
    if set.targets.iter().any(|candidate| candidate == target) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {target} among {:?}",
            set.targets
        )))
    }
}

#[then("the destroy targets \"{target}\"")]
fn destroy_targets(lifecycle_context: &LifecycleContext, target: String) -> Result<(), StepError> {
    assert_target(lifecycle_context, target.trim())
}

#[then("the destroy targets instance \"{name}\" of module \"{module}\"")]
fn destroy_targets_instance(
    lifecycle_context: &LifecycleContext,
    name: String,
    module: String,
) -> Result<(), StepError> {
    let expected = format!("{}.digitalocean_droplet.this[\"{}\"]", module.trim(), name.trim());
    assert_target(lifecycle_context, &expected)
}

#[then("the destroy fails with invalid token \"{token}\"")]
fn destroy_fails_on_token(lifecycle_context: &LifecycleContext, token: String) -> Result<(), StepError> {
    match failure(lifecycle_context)? {
        LifecycleError::Selection(SelectionError::InvalidSyntax { token: actual })
            if actual == token.trim() =>
        {
            Ok(())
        }
        other => Err(StepError::Assertion(format!(
            "expected invalid token {token}, got: {other}"
        ))),
    }
}

#[then("terraform destroy was not run")]
fn destroy_not_run(lifecycle_context: &LifecycleContext) -> Result<(), StepError> {
    let ran_destroy = lifecycle_context
        .runner
        .invocations()
        .iter()
        .any(|invocation| invocation.args.iter().any(|arg| arg == "destroy"));
    if ran_destroy {
        Err(StepError::Assertion(String::from(
            "terraform destroy should not run",
        )))
    } else {
        Ok(())
    }
}
