//! Deploy requests built once per invocation.

use std::collections::BTreeMap;

use crate::instance::Provider;
use crate::validate::ValidationError;

/// Everything a single deploy needs to know about the operator's intent.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployRequest {
    /// Providers in the order the operator listed them.
    pub providers: Vec<Provider>,
    /// Regions requested for each provider.
    pub regions: BTreeMap<Provider, Vec<String>>,
    /// Total number of instances to create.
    pub count: usize,
    /// Prefix applied to every generated instance name.
    pub name_prefix: String,
}

/// One provider/region slot and the number of instances placed in it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Allocation {
    /// Provider hosting the slot.
    pub provider: Provider,
    /// Region within the provider.
    pub region: String,
    /// Instances assigned to the slot.
    pub count: usize,
}

impl DeployRequest {
    /// Starts a builder for a [`DeployRequest`].
    #[must_use]
    pub fn builder() -> DeployRequestBuilder {
        DeployRequestBuilder::default()
    }

    /// Regions requested for `provider`.
    #[must_use]
    pub fn regions_for(&self, provider: Provider) -> &[String] {
        self.regions
            .get(&provider)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Spreads `count` instances round-robin over every provider/region slot,
    /// in the order the providers and regions were requested. Slots that
    /// receive nothing are omitted.
    #[must_use]
    pub fn allocations(&self) -> Vec<Allocation> {
        let mut slots: Vec<Allocation> = self
            .providers
            .iter()
            .flat_map(|provider| {
                self.regions_for(*provider)
                    .iter()
                    .map(move |region| Allocation {
                        provider: *provider,
                        region: region.clone(),
                        count: 0,
                    })
            })
            .collect();
        if slots.is_empty() {
            return slots;
        }
        let mut position = 0;
        for _ in 0..self.count {
            if let Some(slot) = slots.get_mut(position) {
                slot.count += 1;
            }
            position += 1;
            if position == slots.len() {
                position = 0;
            }
        }
        slots.retain(|slot| slot.count > 0);
        slots
    }
}

/// Builder for [`DeployRequest`] that trims input and applies default
/// regions on build.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeployRequestBuilder {
    providers: Vec<String>,
    regions: BTreeMap<String, Vec<String>>,
    count: usize,
    name_prefix: String,
}

impl DeployRequestBuilder {
    /// Sets the provider names as typed by the operator.
    #[must_use]
    pub fn providers<I, S>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.providers = providers.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the regions for one provider, keyed by the provider name.
    #[must_use]
    pub fn regions<I, S>(mut self, provider: impl Into<String>, regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions.insert(
            provider.into(),
            regions.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Sets the number of instances to create.
    #[must_use]
    pub const fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    /// Sets the instance name prefix.
    #[must_use]
    pub fn name_prefix(mut self, value: impl Into<String>) -> Self {
        self.name_prefix = value.into();
        self
    }

    /// Builds the request.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidProvider`] listing every unknown
    /// provider name, or [`ValidationError::InvalidRequest`] when the count,
    /// provider list, region lists, or prefix are unusable.
    pub fn build(self) -> Result<DeployRequest, ValidationError> {
        let mut providers = Vec::new();
        let mut unknown = Vec::new();
        for raw in &self.providers {
            match raw.parse::<Provider>() {
                Ok(provider) if !providers.contains(&provider) => providers.push(provider),
                Ok(_) => {}
                Err(err) => unknown.push(err.0),
            }
        }
        if !unknown.is_empty() {
            return Err(ValidationError::InvalidProvider { providers: unknown });
        }
        if providers.is_empty() {
            return Err(ValidationError::InvalidRequest(String::from(
                "at least one provider is required",
            )));
        }

        let mut regions = BTreeMap::new();
        for (raw, listed) in self.regions {
            let provider = raw
                .parse::<Provider>()
                .map_err(|err| ValidationError::InvalidProvider {
                    providers: vec![err.0],
                })?;
            regions.insert(provider, normalise_regions(listed));
        }
        for provider in &providers {
            let entry = regions.entry(*provider).or_insert_with(|| {
                provider
                    .default_regions()
                    .iter()
                    .map(|region| (*region).to_owned())
                    .collect()
            });
            if entry.is_empty() {
                return Err(ValidationError::InvalidRequest(format!(
                    "no regions requested for provider {provider}"
                )));
            }
        }
        regions.retain(|provider, _| providers.contains(provider));

        if self.count == 0 {
            return Err(ValidationError::InvalidRequest(String::from(
                "instance count must be greater than zero",
            )));
        }

        let name_prefix = self.name_prefix.trim().to_owned();
        let starts_with_letter = name_prefix
            .chars()
            .next()
            .is_some_and(|ch| ch.is_ascii_lowercase());
        if !starts_with_letter
            || !name_prefix
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-')
        {
            return Err(ValidationError::InvalidRequest(format!(
                "name prefix '{name_prefix}' must start with a lowercase letter and use only lowercase letters, digits and hyphens"
            )));
        }

        Ok(DeployRequest {
            providers,
            regions,
            count: self.count,
            name_prefix,
        })
    }
}

fn normalise_regions(listed: Vec<String>) -> Vec<String> {
    let mut regions: Vec<String> = Vec::with_capacity(listed.len());
    for region in listed {
        let trimmed = region.trim().to_ascii_lowercase();
        if !trimmed.is_empty() && !regions.contains(&trimmed) {
            regions.push(trimmed);
        }
    }
    regions
}
