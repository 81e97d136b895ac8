/*! An async client for the Autotask PSA REST API.

The [`Client`] discovers the regional endpoint serving the configured API
user on first use, then exposes typed access to Autotask collections through
[`EntityService`]s:

```no_run
# async fn run() -> autotask_client::Result<()> {
use autotask_client::{Client, ClientConfig, Credentials};

let client = Client::new(ClientConfig::new(Credentials::new(
    "api-user@example.com",
    "secret",
    "INTEGRATION-CODE",
)))?;
let open_tickets = client.tickets().query("").await?;
let acme = client.companies().query("companyName=Acme").await?;
# Ok(())
# }
```

Outbound requests pass through a token-bucket [`RateLimiter`]; transient
failures (HTTP 429/5xx, connection errors and local rate limiting) are retried
with exponential backoff according to the client's [`RetryConfig`].
*/
#![deny(missing_docs)]

mod auth;
mod client;
mod entity;
mod error;
mod query;
mod rate_limit;
mod retry;
mod service;
mod zone;

pub use auth::Credentials;
pub use client::{Client, ClientConfig, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
pub use entity::{
    Company, Contact, CountResponse, Entity, ItemResponse, ListResponse, PageDetails, Resource,
    Ticket, Webhook, TICKET_STATUS_COMPLETE,
};
pub use error::{ConfigError, Error, HttpError, Result};
pub use query::{EntityQueryParams, Filter, GroupOperator, QueryFilter, QueryOperator};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use retry::{with_retry, with_retry_if, RetryConfig};
pub use service::{EntityService, MAX_PAGE_SIZE};
pub use zone::{Zone, ZoneInfo, ZoneResolver, API_VERSION, DEFAULT_ZONE_INFO_URL};

/// Re-export of the HTTP types used in this crate's API.
pub use reqwest::{Method, StatusCode};
