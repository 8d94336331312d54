//! Instance records and point-in-time snapshots of live infrastructure.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

/// Cloud providers supported by the lifecycle.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Provider {
    /// Amazon Web Services EC2.
    Aws,
    /// DigitalOcean droplets.
    DigitalOcean,
    /// Microsoft Azure virtual machines.
    Azure,
    /// Google Compute Engine.
    Google,
}

/// Raised when operator input names a provider outside the supported set.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("unsupported provider '{0}' (expected one of AWS, DO, AZURE, GOOGLE)")]
pub struct UnknownProvider(pub String);

impl Provider {
    /// Every supported provider, in display order.
    pub const ALL: [Self; 4] = [Self::Aws, Self::DigitalOcean, Self::Azure, Self::Google];

    /// Short upper-case code used on the command line and in listings.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Aws => "AWS",
            Self::DigitalOcean => "DO",
            Self::Azure => "AZURE",
            Self::Google => "GOOGLE",
        }
    }

    /// Lower-case slug used in module directories and generated names.
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::DigitalOcean => "do",
            Self::Azure => "azure",
            Self::Google => "google",
        }
    }

    /// Terraform resource type the provider module uses for instances.
    #[must_use]
    pub const fn instance_resource_type(self) -> &'static str {
        match self {
            Self::Aws => "aws_instance",
            Self::DigitalOcean => "digitalocean_droplet",
            Self::Azure => "azurerm_linux_virtual_machine",
            Self::Google => "google_compute_instance",
        }
    }

    /// Resolves a provider from a Terraform instance resource type.
    #[must_use]
    pub fn from_resource_type(resource_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|provider| provider.instance_resource_type() == resource_type)
    }

    /// Regions used when the operator does not name any.
    #[must_use]
    pub const fn default_regions(self) -> &'static [&'static str] {
        match self {
            Self::Aws => &[
                "us-east-1",
                "us-east-2",
                "us-west-1",
                "us-west-2",
                "ca-central-1",
                "eu-central-1",
                "eu-west-1",
                "eu-west-2",
                "eu-west-3",
                "ap-northeast-1",
                "ap-northeast-2",
                "ap-southeast-1",
                "ap-southeast-2",
                "ap-south-1",
                "sa-east-1",
            ],
            Self::DigitalOcean => &[
                "nyc1", "sgp1", "lon1", "nyc3", "ams3", "fra1", "tor1", "sfo2", "blr1",
            ],
            Self::Azure => &["westus", "centralus"],
            Self::Google => &["us-west1", "us-east1"],
        }
    }

    /// Whether the region catalogue must be fetched from the provider before
    /// deploying.
    #[must_use]
    pub const fn has_dynamic_regions(self) -> bool {
        matches!(self, Self::DigitalOcean)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AWS" => Ok(Self::Aws),
            "DO" | "DIGITALOCEAN" => Ok(Self::DigitalOcean),
            "AZURE" => Ok(Self::Azure),
            "GOOGLE" | "GCP" => Ok(Self::Google),
            _ => Err(UnknownProvider(value.trim().to_owned())),
        }
    }
}

/// One provisioned compute resource.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Unique name assigned at creation; stable across snapshots.
    pub name: String,
    /// Provider hosting the instance.
    pub provider: Provider,
    /// Provider-scoped region.
    pub region: String,
    /// Public address, absent until the provider assigns one.
    pub public_address: Option<IpAddr>,
    /// Terraform resource address used to target the instance.
    pub address: String,
    /// Address of the Terraform module that owns the instance.
    pub group: String,
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let address = self
            .public_address
            .map_or_else(|| String::from("pending"), |ip| ip.to_string());
        write!(
            f,
            "{}, {}, {}, {}",
            self.name, address, self.provider, self.region
        )
    }
}

/// Ordered, immutable inventory of instances captured at one instant.
///
/// Instances are ordered by provider, region and name so that the same
/// underlying state always yields the same positions.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Snapshot {
    instances: Vec<Instance>,
}

impl Snapshot {
    /// Builds a snapshot, imposing the canonical ordering.
    #[must_use]
    pub fn new(mut instances: Vec<Instance>) -> Self {
        instances.sort_by(|lhs, rhs| {
            (lhs.provider, &lhs.region, &lhs.name).cmp(&(rhs.provider, &rhs.region, &rhs.name))
        });
        Self { instances }
    }

    /// Instances in index order.
    #[must_use]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    /// Number of instances in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether the snapshot holds no instances.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Looks up an instance by position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Instance> {
        self.instances.get(index)
    }

    /// Looks up an instance by name.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&Instance> {
        self.instances.iter().find(|instance| instance.name == name)
    }

    /// Module membership: module address mapped to its instance names.
    #[must_use]
    pub fn groups(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for instance in &self.instances {
            groups
                .entry(instance.group.as_str())
                .or_default()
                .push(instance.name.as_str());
        }
        groups
    }

    /// Renders the operator-facing listing, one `<index> : <instance>` line
    /// per instance.
    #[must_use]
    pub fn listing(&self) -> Vec<String> {
        self.instances
            .iter()
            .enumerate()
            .map(|(index, instance)| format!("{index} : {instance}"))
            .collect()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Instance;
    type IntoIter = std::slice::Iter<'a, Instance>;

    fn into_iter(self) -> Self::IntoIter {
        self.instances.iter()
    }
}
