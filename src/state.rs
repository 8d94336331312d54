//! Adapter from Terraform's JSON state to [`Snapshot`]s.
//!
//! The input is the document printed by `terraform show -json`. Every
//! top-level child module of the root module is a grouping construct; the
//! instance resources found inside it (at any depth) become its members.

use std::net::IpAddr;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::instance::{Instance, Provider, Snapshot};

/// Raised when the state document cannot be interpreted.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StateParseError {
    /// The document is not valid JSON or does not match the expected shape.
    #[error("failed to parse terraform state: {0}")]
    Malformed(String),
    /// An instance resource lacks an attribute the snapshot needs.
    #[error("resource {address} is missing attribute '{attribute}'")]
    MissingAttribute {
        /// Terraform address of the resource.
        address: String,
        /// Attribute that was expected.
        attribute: String,
    },
}

#[derive(Debug, Deserialize)]
struct StateDocument {
    #[serde(default)]
    values: Option<StateValues>,
}

#[derive(Debug, Deserialize)]
struct StateValues {
    #[serde(default)]
    root_module: Option<ModuleState>,
}

#[derive(Debug, Default, Deserialize)]
struct ModuleState {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    resources: Vec<ResourceState>,
    #[serde(default)]
    child_modules: Vec<ModuleState>,
}

#[derive(Debug, Deserialize)]
struct ResourceState {
    address: String,
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    index: Option<Value>,
    #[serde(default)]
    values: Value,
}

/// Parses `terraform show -json` output into a snapshot.
///
/// Empty output and documents without `values` describe an empty state.
///
/// # Errors
///
/// Returns [`StateParseError`] when the document is malformed or an instance
/// resource lacks its name or region.
pub fn parse_snapshot(json: &str) -> Result<Snapshot, StateParseError> {
    if json.trim().is_empty() {
        return Ok(Snapshot::default());
    }
    let document: StateDocument =
        serde_json::from_str(json).map_err(|err| StateParseError::Malformed(err.to_string()))?;
    let Some(root) = document.values.and_then(|values| values.root_module) else {
        return Ok(Snapshot::default());
    };

    let mut instances = Vec::new();
    for module in &root.child_modules {
        let Some(group) = module.address.as_deref() else {
            continue;
        };
        collect_instances(module, group, &mut instances)?;
    }
    Ok(Snapshot::new(instances))
}

fn collect_instances(
    module: &ModuleState,
    group: &str,
    out: &mut Vec<Instance>,
) -> Result<(), StateParseError> {
    for resource in &module.resources {
        if resource.mode.as_deref().is_some_and(|mode| mode != "managed") {
            continue;
        }
        let Some(provider) = Provider::from_resource_type(&resource.resource_type) else {
            continue;
        };
        out.push(instance_from_resource(provider, resource, group)?);
    }
    for child in &module.child_modules {
        collect_instances(child, group, out)?;
    }
    Ok(())
}

fn instance_from_resource(
    provider: Provider,
    resource: &ResourceState,
    group: &str,
) -> Result<Instance, StateParseError> {
    let values = &resource.values;
    let name = match provider {
        Provider::Aws => string_at(values, &["tags", "Name"]),
        Provider::DigitalOcean | Provider::Azure | Provider::Google => string_at(values, &["name"]),
    }
    .or_else(|| resource.index.as_ref().and_then(Value::as_str).map(str::to_owned))
    .ok_or_else(|| missing(resource, "name"))?;

    let region = match provider {
        Provider::Aws => {
            string_at(values, &["availability_zone"]).map(|zone| strip_zone_letter(&zone))
        }
        Provider::DigitalOcean => string_at(values, &["region"]),
        Provider::Azure => string_at(values, &["location"]),
        Provider::Google => string_at(values, &["zone"]).map(|zone| strip_zone_suffix(&zone)),
    }
    .ok_or_else(|| missing(resource, "region"))?;

    let public_address = match provider {
        Provider::Aws => string_at(values, &["public_ip"]),
        Provider::DigitalOcean => string_at(values, &["ipv4_address"]),
        Provider::Azure => string_at(values, &["public_ip_address"]),
        Provider::Google => google_nat_ip(values),
    }
    .and_then(|raw| raw.parse::<IpAddr>().ok());

    Ok(Instance {
        name,
        provider,
        region,
        public_address,
        address: resource.address.clone(),
        group: group.to_owned(),
    })
}

fn missing(resource: &ResourceState, attribute: &str) -> StateParseError {
    StateParseError::MissingAttribute {
        address: resource.address.clone(),
        attribute: attribute.to_owned(),
    }
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let found = path
        .iter()
        .try_fold(value, |current, key| current.get(*key))?;
    found
        .as_str()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

fn google_nat_ip(values: &Value) -> Option<String> {
    values
        .get("network_interface")?
        .as_array()?
        .iter()
        .filter_map(|interface| interface.get("access_config")?.as_array())
        .flatten()
        .find_map(|config| string_at(config, &["nat_ip"]))
}

/// `us-east-1a` → `us-east-1`.
fn strip_zone_letter(zone: &str) -> String {
    zone.trim_end_matches(|ch: char| ch.is_ascii_alphabetic())
        .to_owned()
}

/// `us-west1-b` → `us-west1`.
fn strip_zone_suffix(zone: &str) -> String {
    zone.rsplit_once('-')
        .map_or_else(|| zone.to_owned(), |(region, _)| region.to_owned())
}
