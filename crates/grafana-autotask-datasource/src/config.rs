//! Datasource configuration as stored by Grafana.
use std::{fmt, time::Duration};

use autotask_client::{ClientConfig, ConfigError, Credentials, RateLimitConfig, RetryConfig};
use serde::Deserialize;

/// The Autotask web services host used for zone discovery when no URL is configured.
pub const DEFAULT_API_URL: &str = "https://webservices.autotask.net";

/// Optional rate limit overrides.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitSettings {
    /// Burst capacity.
    pub max_tokens: u32,
    /// Tokens added per refill period.
    pub refill_rate: u32,
    /// Refill period in milliseconds.
    pub refill_period_ms: u64,
}

/// The datasource's non-secret settings (`jsonData`).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutotaskJsonData {
    /// The API user's username.
    pub username: String,
    /// The Autotask web services host used for zone discovery.
    pub url: String,
    /// Override the number of retries for transient failures.
    pub max_retries: Option<u32>,
    /// Override the outbound rate limit.
    pub rate_limit: Option<RateLimitSettings>,
    /// Override the `User-Agent` header.
    pub user_agent: Option<String>,
}

/// The datasource's secret settings (`secureJsonData`).
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutotaskSecureJsonData {
    /// The API user's secret.
    pub secret: String,
    /// The API tracking identifier issued for the integration.
    pub integration_code: String,
}

impl fmt::Debug for AutotaskSecureJsonData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutotaskSecureJsonData")
            .field("secret", &"<redacted>")
            .field("integration_code", &"<redacted>")
            .finish()
    }
}

/// Validated settings for one datasource instance.
#[derive(Clone, Debug)]
pub struct DatasourceSettings {
    credentials: Credentials,
    url: String,
    max_retries: Option<u32>,
    rate_limit: Option<RateLimitSettings>,
    user_agent: Option<String>,
}

impl DatasourceSettings {
    /// Validate the stored settings.
    ///
    /// `instance_url` is the datasource's top-level URL, used when `jsonData.url`
    /// is blank.
    pub fn load(
        json_data: &AutotaskJsonData,
        secure: &AutotaskSecureJsonData,
        instance_url: &str,
    ) -> Result<Self, ConfigError> {
        let credentials = Credentials::new(
            json_data.username.trim(),
            secure.secret.as_str(),
            secure.integration_code.trim(),
        );
        credentials.validate()?;
        let url = [json_data.url.trim(), instance_url.trim()]
            .into_iter()
            .find(|u| !u.is_empty())
            .unwrap_or(DEFAULT_API_URL)
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            credentials,
            url,
            max_retries: json_data.max_retries,
            rate_limit: json_data.rate_limit.clone(),
            user_agent: json_data.user_agent.clone().filter(|ua| !ua.trim().is_empty()),
        })
    }

    /// The zone discovery endpoint under the configured host.
    pub fn zone_info_url(&self) -> String {
        format!("{}/atservicesrest/v1.0/ZoneInformation", self.url)
    }

    /// The client configuration these settings describe.
    pub fn client_config(&self) -> ClientConfig {
        let mut config =
            ClientConfig::new(self.credentials.clone()).with_zone_info_url(self.zone_info_url());
        if let Some(max_retries) = self.max_retries {
            config = config.with_retry(RetryConfig::default().with_max_retries(max_retries));
        }
        if let Some(rate_limit) = &self.rate_limit {
            config = config.with_rate_limit(RateLimitConfig {
                max_tokens: rate_limit.max_tokens,
                refill_rate: rate_limit.refill_rate,
                refill_period: Duration::from_millis(rate_limit.refill_period_ms),
            });
        }
        if let Some(user_agent) = &self.user_agent {
            config = config.with_user_agent(user_agent);
        }
        config
    }
}
