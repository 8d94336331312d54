//! Live DigitalOcean region catalogue.

use std::sync::LazyLock;
use std::time::Duration;

use serde::Deserialize;

use crate::instance::Provider;
use crate::validate::{CatalogueFuture, RegionCatalogue, ValidationError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const DIGITALOCEAN_API_BASE: &str = "https://api.digitalocean.com/v2";
const REGIONS_PER_PAGE: u32 = 200;

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Debug, Deserialize)]
struct RegionsResponse {
    regions: Vec<Region>,
}

#[derive(Debug, Deserialize)]
struct Region {
    slug: String,
    #[serde(default)]
    available: bool,
}

/// Queries `GET /v2/regions` for regions accepting new droplets.
#[derive(Clone, Debug)]
pub struct DigitalOceanCatalogue {
    token: Option<String>,
    base_url: String,
}

impl DigitalOceanCatalogue {
    /// Creates a catalogue authenticated with `token`.
    ///
    /// A missing token is reported when the catalogue is first consulted,
    /// so deploys that do not involve DigitalOcean never need one.
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|value| !value.trim().is_empty()),
            base_url: DIGITALOCEAN_API_BASE.to_owned(),
        }
    }

    /// Points the catalogue at another API root.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn fetch(&self) -> Result<Vec<String>, ValidationError> {
        let failure = |message: String| ValidationError::RegionCatalogue {
            provider: Provider::DigitalOcean,
            message,
        };
        let token = self.token.as_deref().ok_or_else(|| {
            failure(String::from(
                "no API token configured: set SKIFF_DIGITALOCEAN_TOKEN or add digitalocean_token to skiff.toml",
            ))
        })?;

        let response = HTTP_CLIENT
            .get(format!(
                "{}/regions?per_page={REGIONS_PER_PAGE}",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|err| failure(err.to_string()))?
            .error_for_status()
            .map_err(|err| failure(err.to_string()))?;
        let body: RegionsResponse = response
            .json()
            .await
            .map_err(|err| failure(err.to_string()))?;

        Ok(available_slugs(body))
    }
}

fn available_slugs(body: RegionsResponse) -> Vec<String> {
    body.regions
        .into_iter()
        .filter(|region| region.available)
        .map(|region| region.slug)
        .collect()
}

impl RegionCatalogue for DigitalOceanCatalogue {
    fn available_regions(&self, provider: Provider) -> CatalogueFuture<'_> {
        Box::pin(async move {
            if provider != Provider::DigitalOcean {
                return Err(ValidationError::RegionCatalogue {
                    provider,
                    message: String::from("no live catalogue for this provider"),
                });
            }
            let regions = self.fetch().await?;
            tracing::debug!(count = regions.len(), "fetched DigitalOcean regions");
            Ok(regions)
        })
    }
}
