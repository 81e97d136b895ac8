//! Discovery of the regional API endpoint serving an Autotask account.
use std::sync::Arc;

use reqwest::{header, Method};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::{
    auth::Credentials,
    error::{Error, HttpError, Result},
};

/// The global zone discovery endpoint.
pub const DEFAULT_ZONE_INFO_URL: &str =
    "https://webservices.autotask.net/atservicesrest/v1.0/ZoneInformation";

/// The REST API version appended to the zone URL.
pub const API_VERSION: &str = "v1.0";

/// The zone an Autotask account lives in.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoneInfo {
    /// A human readable zone name, e.g. `America East`.
    pub zone_name: String,
    /// The zone's web services URL, e.g. `https://webservices2.autotask.net/ATServicesRest/`.
    pub url: String,
    /// The zone's web UI URL.
    pub web_url: String,
    /// The zone's CI number.
    pub ci: i64,
}

impl ZoneInfo {
    /// The versioned REST base URL for this zone, always ending in `/`.
    pub fn api_base_url(&self) -> Result<Url> {
        let mut base = self.url.replacen("ATServicesRest", "atservicesrest", 1);
        if !base.ends_with('/') {
            base.push('/');
        }
        base.push_str(API_VERSION);
        base.push('/');
        Ok(Url::parse(&base)?)
    }
}

/// A zone together with its parsed API base URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Zone {
    /// The discovered zone.
    pub info: ZoneInfo,
    /// The versioned REST base URL.
    pub base_url: Url,
}

/// Looks up the account's zone once and caches it.
#[derive(Debug)]
pub struct ZoneResolver {
    http: reqwest::Client,
    discovery_url: Url,
    credentials: Credentials,
    cache: RwLock<Option<Arc<Zone>>>,
}

impl ZoneResolver {
    /// Create a resolver querying `discovery_url`.
    pub fn new(http: reqwest::Client, discovery_url: Url, credentials: Credentials) -> Self {
        Self {
            http,
            discovery_url,
            credentials,
            cache: RwLock::new(None),
        }
    }

    /// Return the cached zone, discovering it first if necessary.
    ///
    /// Concurrent first callers wait on the same discovery request.
    pub async fn resolve(&self) -> Result<Arc<Zone>> {
        if let Some(zone) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(zone));
        }
        let mut cache = self.cache.write().await;
        if let Some(zone) = cache.as_ref() {
            return Ok(Arc::clone(zone));
        }
        let zone = Arc::new(self.discover().await?);
        info!(zone = %zone.info.zone_name, base_url = %zone.base_url, "Resolved Autotask zone");
        *cache = Some(Arc::clone(&zone));
        Ok(zone)
    }

    /// The cached zone, if discovery has already happened.
    pub async fn cached(&self) -> Option<Arc<Zone>> {
        self.cache.read().await.clone()
    }

    /// Forget the cached zone so the next call rediscovers it.
    pub async fn invalidate(&self) {
        debug!("Invalidating cached Autotask zone");
        *self.cache.write().await = None;
    }

    #[tracing::instrument(skip(self), fields(url = %self.discovery_url), level = "debug")]
    async fn discover(&self) -> Result<Zone> {
        let request = self
            .credentials
            .apply(self.http.get(self.discovery_url.clone()))
            .query(&[("user", self.credentials.username())])
            .header(header::ACCEPT, "application/json")
            .build()
            .map_err(Error::Request)?;
        let url = request.url().to_string();
        let response = self.http.execute(request).await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(%status, bytes = body.len(), "Received zone information");
        if !status.is_success() {
            return Err(HttpError::from_response(Method::GET, url, status, &body).into());
        }
        let info: ZoneInfo = serde_json::from_slice(&body).map_err(Error::Decode)?;
        let base_url = info.api_base_url()?;
        Ok(Zone { info, base_url })
    }
}
