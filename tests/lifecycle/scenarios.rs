//! BDD scenarios for the lifecycle workflows.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LifecycleContext, lifecycle_context};

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Reject an unavailable region before provisioning"
)]
fn scenario_reject_unavailable_region(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Lock down only the instances a deploy created"
)]
fn scenario_lock_down_new_instances(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Report lock-down failures without failing the deploy"
)]
fn scenario_lockdown_failure_warns(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Destroy selected instances and orphaned modules"
)]
fn scenario_destroy_with_orphans(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}

#[scenario(
    path = "tests/features/lifecycle.feature",
    name = "Reject malformed index expressions"
)]
fn scenario_reject_malformed_indices(lifecycle_context: LifecycleContext) {
    let _ = lifecycle_context;
}
