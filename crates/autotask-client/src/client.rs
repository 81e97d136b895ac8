//! The Autotask API client.
use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use reqwest::{header, Method, Request};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::{
    auth::Credentials,
    entity::{Company, Contact, Entity, Resource, Ticket, Webhook},
    error::{Error, HttpError, Result},
    rate_limit::{RateLimitConfig, RateLimiter},
    retry::{with_retry, with_retry_if, RetryConfig},
    service::EntityService,
    zone::{Zone, ZoneInfo, ZoneResolver, DEFAULT_ZONE_INFO_URL},
};

/// The `User-Agent` sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = concat!("autotask-client-rs/", env!("CARGO_PKG_VERSION"));

/// The request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings used to construct a [`Client`].
#[derive(Clone, Debug)]
pub struct ClientConfig {
    credentials: Credentials,
    zone_info_url: String,
    user_agent: String,
    timeout: Duration,
    rate_limit: RateLimitConfig,
    retry: RetryConfig,
}

impl ClientConfig {
    /// Create a configuration with default endpoints, limits and retries.
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            zone_info_url: DEFAULT_ZONE_INFO_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: DEFAULT_TIMEOUT,
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Use a different zone discovery endpoint.
    pub fn with_zone_info_url(mut self, url: impl Into<String>) -> Self {
        self.zone_info_url = url.into();
        self
    }

    /// Set the `User-Agent` header.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the rate limiter settings.
    pub fn with_rate_limit(mut self, rate_limit: RateLimitConfig) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The credentials this configuration authenticates with.
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// The zone discovery endpoint.
    pub fn zone_info_url(&self) -> &str {
        &self.zone_info_url
    }

    /// The retry policy.
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    credentials: Credentials,
    zone: ZoneResolver,
    limiter: RateLimiter,
    retry: RetryConfig,
    cancel: CancellationToken,
}

/// A client for the Autotask REST API.
///
/// Cloning is cheap; clones share the zone cache, rate limiter and
/// cancellation token.
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<Inner>,
}

impl Client {
    /// Create a client, validating the configured credentials.
    ///
    /// No requests are made until the first API call, which discovers the zone.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.credentials.validate()?;
        let discovery_url = Url::parse(&config.zone_info_url)?;
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()
            .map_err(Error::Request)?;
        let zone = ZoneResolver::new(http.clone(), discovery_url, config.credentials.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                credentials: config.credentials,
                zone,
                limiter: RateLimiter::new(config.rate_limit),
                retry: config.retry,
                cancel: CancellationToken::new(),
            }),
        })
    }

    /// The ticket collection.
    pub fn tickets(&self) -> EntityService<'_, Ticket> {
        self.entities()
    }

    /// The company collection.
    pub fn companies(&self) -> EntityService<'_, Company> {
        self.entities()
    }

    /// The contact collection.
    pub fn contacts(&self) -> EntityService<'_, Contact> {
        self.entities()
    }

    /// The resource collection.
    pub fn resources(&self) -> EntityService<'_, Resource> {
        self.entities()
    }

    /// The webhook collection.
    pub fn webhooks(&self) -> EntityService<'_, Webhook> {
        self.entities()
    }

    /// The collection holding entities of type `T`.
    pub fn entities<T: Entity>(&self) -> EntityService<'_, T> {
        EntityService::new(self)
    }

    /// The account's zone, discovering it on first use.
    pub async fn zone_info(&self) -> Result<ZoneInfo> {
        Ok(self.zone().await?.info.clone())
    }

    /// Forget the cached zone; the next request rediscovers it.
    pub async fn invalidate_zone(&self) {
        self.inner.zone.invalidate().await;
    }

    async fn zone(&self) -> Result<Arc<Zone>> {
        let cancel = &self.inner.cancel;
        with_retry(cancel, &self.inner.retry, || async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                zone = self.inner.zone.resolve() => zone,
            }
        })
        .await
    }

    /// Cancel all in-flight and future requests made through this client.
    pub fn shutdown(&self) {
        debug!("Shutting down Autotask client");
        self.inner.cancel.cancel();
    }

    /// Whether [`Client::shutdown`] has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Build an authenticated request.
    ///
    /// `url` is joined against the zone's API base URL, so it may be relative
    /// (e.g. `Tickets/query`) or absolute (e.g. a page URL).
    pub async fn new_request<B>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Request>
    where
        B: Serialize + ?Sized,
    {
        let zone = self.zone().await?;
        let url = zone.base_url.join(url)?;
        let mut builder = self
            .inner
            .credentials
            .apply(self.inner.http.request(method, url))
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            builder = builder.body(serde_json::to_vec(body).map_err(Error::Encode)?);
        }
        builder.build().map_err(Error::Request)
    }

    /// Send a request, returning the raw response body.
    ///
    /// Fails with [`Error::RateLimited`] if the rate limiter has no tokens left,
    /// and with [`Error::Http`] for non-success statuses.
    #[tracing::instrument(
        skip(self, request),
        fields(method = %request.method(), url = %request.url()),
        level = "debug"
    )]
    pub async fn execute(&self, request: Request) -> Result<Bytes> {
        if !self.inner.limiter.acquire() {
            warn!("Autotask rate limit reached");
            return Err(Error::RateLimited);
        }
        let method = request.method().clone();
        let url = request.url().to_string();
        debug!("Sending Autotask request");
        let cancel = &self.inner.cancel;
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = self.inner.http.execute(request) => response?,
        };
        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            body = response.bytes() => body?,
        };
        debug!(%status, bytes = body.len(), "Received Autotask response");
        if !status.is_success() {
            return Err(HttpError::from_response(method, url, status, &body).into());
        }
        Ok(body)
    }

    /// Send a request and decode the JSON response body.
    pub async fn execute_json<T: DeserializeOwned>(&self, request: Request) -> Result<T> {
        let body = self.execute(request).await?;
        serde_json::from_slice(&body).map_err(Error::Decode)
    }

    /// Build and send a request, retrying transient failures.
    ///
    /// `POST` creates records, so it is only retried when Autotask refused the
    /// request before processing it.
    pub(crate) async fn send<B>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<Bytes>
    where
        B: Serialize + ?Sized,
    {
        let should_retry: fn(&Error) -> bool = if method == Method::POST {
            Error::is_retryable_unprocessed
        } else {
            Error::is_retryable
        };
        with_retry_if(&self.inner.cancel, &self.inner.retry, should_retry, || async {
            let request = self.new_request(method.clone(), url, body).await?;
            self.execute(request).await
        })
        .await
    }

    /// Like [`Client::send`], decoding the JSON response body.
    pub(crate) async fn send_json<B, T>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let body = self.send(method, url, body).await?;
        serde_json::from_slice(&body).map_err(Error::Decode)
    }
}

/// Placeholder body type for requests without a body.
pub(crate) const NO_BODY: Option<&()> = None;

#[cfg(test)]
pub(crate) mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    /// Start a mock server answering zone discovery with itself.
    pub(crate) async fn mock_autotask() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/atservicesrest/v1.0/ZoneInformation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "zoneName": "Test Zone",
                "url": format!("{}/ATServicesRest/", server.uri()),
                "webUrl": server.uri(),
                "ci": 1
            })))
            .mount(&server)
            .await;
        server
    }

    pub(crate) fn test_config(server: &MockServer) -> ClientConfig {
        ClientConfig::new(Credentials::new("api@example.com", "secret", "CODE"))
            .with_zone_info_url(format!("{}/atservicesrest/v1.0/ZoneInformation", server.uri()))
            .with_retry(RetryConfig {
                initial_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(5),
                ..RetryConfig::default()
            })
    }

    pub(crate) fn test_client(server: &MockServer) -> Client {
        Client::new(test_config(server)).unwrap()
    }

    #[test]
    fn rejects_missing_credentials() {
        let config = ClientConfig::new(Credentials::new("user", "", "code"));
        assert!(matches!(
            Client::new(config),
            Err(Error::Config(crate::ConfigError::MissingSecret))
        ));
    }

    #[tokio::test]
    async fn builds_authenticated_requests() {
        let server = mock_autotask().await;
        let client = test_client(&server);
        let request = client
            .new_request(Method::POST, "Tickets", Some(&json!({"title": "x"})))
            .await
            .unwrap();
        assert_eq!(
            request.url().as_str(),
            format!("{}/atservicesrest/v1.0/Tickets", server.uri())
        );
        let headers = request.headers();
        assert_eq!(headers["Content-Type"], "application/json");
        assert_eq!(headers["Accept"], "application/json");
        assert_eq!(headers["UserName"], "api@example.com");
        assert_eq!(headers["Secret"], "secret");
        assert_eq!(headers["ApiIntegrationCode"], "CODE");
        assert!(headers["Authorization"].to_str().unwrap().starts_with("Basic "));
        assert_eq!(
            request.body().and_then(|b| b.as_bytes()),
            Some(br#"{"title":"x"}"#.as_slice())
        );

        // Absolute URLs, such as page links, are used as-is.
        let next = "https://webservices1.autotask.net/atservicesrest/v1.0/Tickets/query/next?paging=abc";
        let request = client.new_request(Method::GET, next, NO_BODY).await.unwrap();
        assert_eq!(request.url().as_str(), next);
    }

    #[tokio::test]
    async fn sends_user_agent_and_body() {
        let server = mock_autotask().await;
        Mock::given(method("POST"))
            .and(path("/atservicesrest/v1.0/Companies"))
            .and(header("User-Agent", "test-agent/1.0"))
            .and(body_json(json!({"companyName": "Acme"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"itemId": 9})))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new(test_config(&server).with_user_agent("test-agent/1.0")).unwrap();
        let value: serde_json::Value = client
            .send_json(Method::POST, "Companies", Some(&json!({"companyName": "Acme"})))
            .await
            .unwrap();
        assert_eq!(value, json!({"itemId": 9}));
    }

    #[tokio::test]
    async fn refused_token_is_rate_limited() {
        let server = mock_autotask().await;
        Mock::given(method("GET"))
            .and(path("/atservicesrest/v1.0/Tickets/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"item": null})))
            .expect(1)
            .mount(&server)
            .await;

        let client = Client::new(test_config(&server).with_rate_limit(RateLimitConfig {
            max_tokens: 1,
            refill_rate: 1,
            refill_period: Duration::from_secs(3600),
        }))
        .unwrap();
        let request = client.new_request(Method::GET, "Tickets/1", NO_BODY).await.unwrap();
        client.execute(request).await.unwrap();
        let request = client.new_request(Method::GET, "Tickets/1", NO_BODY).await.unwrap();
        assert!(matches!(client.execute(request).await, Err(Error::RateLimited)));

        // With retries the refusal eventually surfaces as exhaustion.
        match client.send(Method::GET, "Tickets/1", NO_BODY).await {
            Err(Error::RetryExhausted { attempts, source }) => {
                assert_eq!(attempts, 4);
                assert!(matches!(*source, Error::RateLimited));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn backoff_longer_than_refill_recovers_from_empty_bucket() {
        let server = mock_autotask().await;
        Mock::given(method("GET"))
            .and(path("/atservicesrest/v1.0/Tickets/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"item": null})))
            .expect(2)
            .mount(&server)
            .await;

        let client = Client::new(
            test_config(&server)
                .with_rate_limit(RateLimitConfig {
                    max_tokens: 1,
                    refill_rate: 1,
                    refill_period: Duration::from_millis(50),
                })
                .with_retry(RetryConfig {
                    max_retries: 1,
                    initial_interval: Duration::from_millis(60),
                    max_interval: Duration::from_millis(60),
                    multiplier: 1.0,
                    jitter: 0.0,
                }),
        )
        .unwrap();
        client.send(Method::GET, "Tickets/1", NO_BODY).await.unwrap();
        client.send(Method::GET, "Tickets/1", NO_BODY).await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_cancels_requests() {
        let server = mock_autotask().await;
        Mock::given(method("GET"))
            .and(path("/atservicesrest/v1.0/Tickets/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"item": {"id": 1}}))
                    .set_delay(Duration::from_secs(30)),
            )
            .mount(&server)
            .await;

        let client = test_client(&server);
        client.zone_info().await.unwrap();
        let request = client.new_request(Method::GET, "Tickets/1", NO_BODY).await.unwrap();
        let shutdown = client.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.shutdown();
        });
        assert!(matches!(client.execute(request).await, Err(Error::Cancelled)));
        assert!(client.is_shut_down());
        assert!(matches!(client.zone_info().await, Err(Error::Cancelled)));
    }
}
