//! API user credentials and the headers derived from them.
use std::fmt;

use reqwest::RequestBuilder;

use crate::error::ConfigError;

/// The credentials of an Autotask API user.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret: String,
    integration_code: String,
}

impl Credentials {
    /// Create a set of credentials.
    pub fn new(
        username: impl Into<String>,
        secret: impl Into<String>,
        integration_code: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
            integration_code: integration_code.into(),
        }
    }

    /// The API username, which is also used for zone discovery.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Check that every credential is present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.username.trim().is_empty() {
            return Err(ConfigError::MissingUsername);
        }
        if self.secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.integration_code.trim().is_empty() {
            return Err(ConfigError::MissingIntegrationCode);
        }
        Ok(())
    }

    /// Attach Basic auth and the Autotask credential headers.
    pub(crate) fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .basic_auth(&self.username, Some(&self.secret))
            .header("UserName", &self.username)
            .header("Secret", &self.secret)
            .header("ApiIntegrationCode", &self.integration_code)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .field("integration_code", &"<redacted>")
            .finish()
    }
}
