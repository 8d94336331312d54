//! Pre-flight validation of deploy requests.
//!
//! Validation is the only gate before resources are created. It is
//! read-only: the only external call is a query of the provider's region
//! catalogue.

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::instance::Provider;
use crate::request::DeployRequest;

/// Errors raised before any side effect takes place.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ValidationError {
    /// Raised when one or more provider names are not supported.
    #[error("invalid providers specified: {}", .providers.join(","))]
    InvalidProvider {
        /// Provider names as typed by the operator.
        providers: Vec<String>,
    },
    /// Raised when requested regions are missing from the live catalogue.
    #[error("{provider} region(s) not available: {}", .regions.join(","))]
    RegionUnavailable {
        /// Provider whose catalogue was consulted.
        provider: Provider,
        /// Every requested region that is not available.
        regions: Vec<String>,
    },
    /// Raised when the region catalogue cannot be fetched.
    #[error("failed to fetch {provider} region catalogue: {message}")]
    RegionCatalogue {
        /// Provider whose catalogue was requested.
        provider: Provider,
        /// Description of the failure.
        message: String,
    },
    /// Raised when the request itself is unusable.
    #[error("invalid deploy request: {0}")]
    InvalidRequest(String),
}

/// Future returned by region catalogue lookups.
pub type CatalogueFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Vec<String>, ValidationError>> + Send + 'a>>;

/// Source of the regions a provider currently accepts new instances in.
pub trait RegionCatalogue {
    /// Lists available region slugs for `provider`.
    fn available_regions(&self, provider: Provider) -> CatalogueFuture<'_>;
}

/// Checks `request` against the live catalogue of every provider whose
/// regions change over time.
///
/// All unavailable regions of a provider are reported together. Providers
/// with a static catalogue are accepted as requested.
///
/// # Errors
///
/// Returns [`ValidationError::RegionUnavailable`] listing the missing regions,
/// or [`ValidationError::RegionCatalogue`] when the lookup fails.
pub async fn validate_deploy_request<C>(
    request: &DeployRequest,
    catalogue: &C,
) -> Result<(), ValidationError>
where
    C: RegionCatalogue + ?Sized,
{
    for provider in request
        .providers
        .iter()
        .copied()
        .filter(|provider| provider.has_dynamic_regions())
    {
        let available: Vec<String> = catalogue
            .available_regions(provider)
            .await?
            .into_iter()
            .map(|region| region.to_ascii_lowercase())
            .collect();
        let unavailable: Vec<String> = request
            .regions_for(provider)
            .iter()
            .filter(|region| !available.contains(&region.to_ascii_lowercase()))
            .cloned()
            .collect();
        if !unavailable.is_empty() {
            return Err(ValidationError::RegionUnavailable {
                provider,
                regions: unavailable,
            });
        }
        tracing::debug!(%provider, "requested regions are available");
    }
    Ok(())
}
