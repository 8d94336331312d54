//! Desired infrastructure state handed to Terraform.
//!
//! Terraform is declarative, so every apply must describe all instances that
//! should exist: the modules already present in state are reconstructed from
//! the current snapshot and the new request is appended as fresh modules.
//! Each module lists its instance names explicitly so that destroying one
//! member never renumbers the others.

use camino::Utf8Path;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::instance::{Provider, Snapshot};
use crate::request::DeployRequest;

const BATCH_ID_LEN: usize = 8;

/// One Terraform module: a set of instances in one provider region.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModulePlan {
    /// Module name, without the `module.` address prefix.
    pub key: String,
    /// Provider the module provisions on.
    pub provider: Provider,
    /// Region the module provisions in.
    pub region: String,
    /// Names of the instances the module owns.
    pub names: Vec<String>,
}

impl ModulePlan {
    /// Terraform address of the module.
    #[must_use]
    pub fn address(&self) -> String {
        format!("module.{}", self.key)
    }
}

/// Settings that shape the rendered configuration but not its contents.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RenderSettings<'a> {
    /// Directory containing one Terraform module per provider slug.
    pub module_dir: &'a Utf8Path,
    /// Public key installed on new instances.
    pub ssh_public_key_file: &'a str,
}

/// Complete desired state for one apply.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeploymentPlan {
    modules: Vec<ModulePlan>,
}

impl DeploymentPlan {
    /// Reconstructs the modules that currently exist in `snapshot`.
    #[must_use]
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let modules = snapshot
            .groups()
            .into_iter()
            .filter_map(|(group, members)| {
                let first = members.first().and_then(|name| snapshot.find(name))?;
                Some(ModulePlan {
                    key: group.strip_prefix("module.").unwrap_or(group).to_owned(),
                    provider: first.provider,
                    region: first.region.clone(),
                    names: members.into_iter().map(str::to_owned).collect(),
                })
            })
            .collect();
        Self { modules }
    }

    /// Modules in the plan, existing ones first.
    #[must_use]
    pub fn modules(&self) -> &[ModulePlan] {
        &self.modules
    }

    /// Appends one module per allocation of `request`, naming instances
    /// with `batch`. Returns the names of the instances added.
    pub fn add_batch(&mut self, request: &DeployRequest, batch: &str) -> Vec<String> {
        let mut added = Vec::new();
        for allocation in request.allocations() {
            let region_slug = allocation.region.replace('_', "-");
            let names: Vec<String> = (0..allocation.count)
                .map(|ordinal| {
                    format!(
                        "{}-{}-{region_slug}-{batch}-{ordinal}",
                        request.name_prefix,
                        allocation.provider.slug()
                    )
                })
                .collect();
            let key = format!(
                "{}_{}_{}_{batch}",
                request.name_prefix,
                allocation.provider.slug(),
                allocation.region
            )
            .replace('-', "_");
            added.extend(names.iter().cloned());
            self.modules.push(ModulePlan {
                key,
                provider: allocation.provider,
                region: allocation.region,
                names,
            });
        }
        added
    }

    /// Renders the plan in Terraform's JSON configuration syntax.
    #[must_use]
    pub fn render(&self, settings: &RenderSettings<'_>) -> Value {
        let mut modules = Map::new();
        for module in &self.modules {
            let mut block = Map::new();
            block.insert(
                String::from("source"),
                Value::String(module_source(settings.module_dir, module.provider)),
            );
            block.insert(String::from("region"), Value::String(module.region.clone()));
            block.insert(String::from("names"), json!(module.names));
            block.insert(
                String::from("ssh_public_key_file"),
                Value::String(settings.ssh_public_key_file.to_owned()),
            );
            if module.provider == Provider::DigitalOcean {
                block.insert(
                    String::from("do_token"),
                    Value::String(String::from("${var.do_token}")),
                );
            }
            modules.insert(module.key.clone(), Value::Object(block));
        }

        let mut document = Map::new();
        if self
            .modules
            .iter()
            .any(|module| module.provider == Provider::DigitalOcean)
        {
            document.insert(
                String::from("variable"),
                json!({ "do_token": { "type": "string", "sensitive": true } }),
            );
        }
        if !modules.is_empty() {
            document.insert(String::from("module"), Value::Object(modules));
        }
        Value::Object(document)
    }
}

/// Generates a short random identifier shared by one deploy's instances.
#[must_use]
pub fn new_batch_id() -> String {
    Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(BATCH_ID_LEN)
        .collect()
}

fn module_source(module_dir: &Utf8Path, provider: Provider) -> String {
    let path = module_dir.join(provider.slug());
    if path.is_absolute() || path.as_str().starts_with("./") || path.as_str().starts_with("../")
    {
        path.into_string()
    } else {
        format!("./{path}")
    }
}
