//! Geolocation: client IP → country code, for picking a default region.
//!
//! A lookup failure of any kind yields `None`, which composes the fallback
//! region.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::composer::{RegionComposer, ResolvedRegion};
use super::errors::RegionError;
use crate::cache::{KeyClass, ResultCache};

const DEFAULT_BASE_URL: &str = "http://ip-api.com";

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Resolves an IP address to an ISO country code.
#[async_trait]
pub trait RegionLocator: Send + Sync {
    async fn locate(&self, ip: &str) -> Option<String>;
}

// ─── ip-api.com ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default, rename = "countryCode")]
    country_code: Option<String>,
}

/// Locator backed by the ip-api.com JSON endpoint.
pub struct IpApiLocator {
    http: reqwest::Client,
    base_url: String,
}

impl IpApiLocator {
    pub fn new() -> Result<Self, RegionError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, RegionError> {
        let http = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|e| RegionError::HttpClient {
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl RegionLocator for IpApiLocator {
    async fn locate(&self, ip: &str) -> Option<String> {
        let addr: IpAddr = ip.trim().parse().ok()?;
        if !is_routable(&addr) {
            tracing::debug!(%addr, "non-routable address, skipping geolocation");
            return None;
        }

        let url = format!("{}/json/{addr}?fields=status,countryCode", self.base_url);
        let response = match self.http.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::warn!(status = resp.status().as_u16(), "geolocation lookup rejected");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "geolocation lookup failed");
                return None;
            }
        };

        let body: IpApiResponse = response.json().await.ok()?;
        if body.status != "success" {
            return None;
        }
        body.country_code.filter(|c| !c.is_empty())
    }
}

/// Whether an address could have a public geolocation.
fn is_routable(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation())
        }
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
    }
}

// ─── Caching ─────────────────────────────────────────────────────────────────

/// Wraps a locator with the result cache under the `geolocation` class.
pub struct CachedLocator<L> {
    inner: L,
    cache: Arc<ResultCache>,
}

impl<L: RegionLocator> CachedLocator<L> {
    pub fn new(inner: L, cache: Arc<ResultCache>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<L: RegionLocator> RegionLocator for CachedLocator<L> {
    async fn locate(&self, ip: &str) -> Option<String> {
        let cache = Arc::clone(&self.cache);
        let key = ip.to_string();
        let hit = tokio::task::spawn_blocking(move || cache.get(KeyClass::Geolocation, &key))
            .await
            .ok()
            .flatten();
        if let Some(serde_json::Value::String(code)) = hit {
            return Some(code);
        }

        let code = self.inner.locate(ip).await?;
        let cache = Arc::clone(&self.cache);
        let key = ip.to_string();
        let payload = serde_json::Value::String(code.clone());
        let write =
            tokio::task::spawn_blocking(move || cache.set(KeyClass::Geolocation, &key, &payload, None));
        if let Err(e) = write.await {
            tracing::debug!(error = %e, "geolocation cache write task failed");
        }
        Some(code)
    }
}

/// Compose the region for a client IP, falling back when it can't be located.
pub async fn resolve_by_ip(
    composer: &RegionComposer,
    locator: &dyn RegionLocator,
    ip: &str,
) -> ResolvedRegion {
    let code = locator.locate(ip).await.unwrap_or_default();
    composer.compose(&code)
}
