//! Detects instances created between two snapshots.

use std::collections::HashSet;

use crate::instance::{Instance, Snapshot};

/// Returns the instances present in `after` but not in `before`.
///
/// Identity is the instance name. The result keeps the order of `after`. A
/// name present in both snapshots is never reported, even when the
/// underlying resource was replaced.
#[must_use]
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<Instance> {
    let known: HashSet<&str> = before
        .into_iter()
        .map(|instance| instance.name.as_str())
        .collect();
    after
        .into_iter()
        .filter(|instance| !known.contains(instance.name.as_str()))
        .cloned()
        .collect()
}
