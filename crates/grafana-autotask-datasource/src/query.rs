//! Panel queries and their translation into Autotask searches.
use std::{fmt, str::FromStr};

use autotask_client::{
    Client, Company, Contact, Entity, EntityQueryParams, Filter, QueryFilter, QueryOperator,
    Resource, Ticket, MAX_PAGE_SIZE,
};
use chrono::{DateTime, SecondsFormat, Utc};
use grafana_plugin_sdk::{backend, data};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::frames;

/// The query JSON sent by the query editor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueryModel {
    /// The entity kind, e.g. `tickets`.
    pub query_type: String,
    /// A `field=value` expression or an Autotask filter tree.
    pub filter: String,
    /// When set, restrict results to the dashboard time range on this field.
    pub time_field: String,
    /// The maximum number of records to return.
    pub max_records: Option<usize>,
}

/// The number of records returned when a query doesn't say.
pub const DEFAULT_MAX_RECORDS: usize = MAX_PAGE_SIZE as usize;

impl QueryModel {
    /// Fill in the query type from the request envelope if the JSON omitted it.
    pub fn with_fallback_query_type(mut self, query_type: &str) -> Self {
        if self.query_type.trim().is_empty() {
            self.query_type = query_type.to_string();
        }
        self
    }

    fn limit(&self) -> usize {
        self.max_records
            .filter(|&n| n > 0)
            .unwrap_or(DEFAULT_MAX_RECORDS)
    }
}

/// The entity kinds that can be queried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntityKind {
    /// Service tickets.
    Tickets,
    /// Staff members.
    Resources,
    /// Companies.
    Companies,
    /// Company contacts.
    Contacts,
}

impl FromStr for EntityKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "tickets" => Ok(Self::Tickets),
            "resources" => Ok(Self::Resources),
            "companies" => Ok(Self::Companies),
            "contacts" => Ok(Self::Contacts),
            other => Err(Error::UnknownQueryType(other.to_string())),
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tickets => "tickets",
            Self::Resources => "resources",
            Self::Companies => "companies",
            Self::Contacts => "contacts",
        })
    }
}

/// A time range to restrict results to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    /// Inclusive start.
    pub from: DateTime<Utc>,
    /// Inclusive end.
    pub to: DateTime<Utc>,
}

impl From<&backend::TimeRange> for TimeWindow {
    fn from(range: &backend::TimeRange) -> Self {
        Self {
            from: range.from,
            to: range.to,
        }
    }
}

/// Errors running a query.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The query type isn't one of the supported entity kinds.
    #[error("unknown query type: {0}")]
    UnknownQueryType(String),
    /// The Autotask request failed.
    #[error("{0}")]
    Autotask(#[from] autotask_client::Error),
    /// The results couldn't be turned into a valid frame.
    #[error("could not build frame: {0}")]
    Frame(#[from] data::Error),
}

/// Combine the user's filter with the time window on `model.time_field`.
///
/// Returns `None` when there is neither a filter nor a time restriction.
pub fn build_filter(
    model: &QueryModel,
    window: Option<&TimeWindow>,
) -> autotask_client::Result<Option<Filter>> {
    let user = Filter::parse(&model.filter)?;
    let time_field = model.time_field.trim();
    let time = match window {
        Some(window) if !time_field.is_empty() => Some(Filter::and([
            QueryFilter::new(time_field, QueryOperator::Gte, timestamp(window.from)).into(),
            QueryFilter::new(time_field, QueryOperator::Lte, timestamp(window.to)).into(),
        ])),
        _ => None,
    };
    Ok(match (user, time) {
        (Some(user), Some(time)) => Some(Filter::and([user, time])),
        (user, time) => user.or(time),
    })
}

fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Run a query against Autotask and shape the results into a frame.
pub async fn run(
    client: &Client,
    model: &QueryModel,
    window: Option<&TimeWindow>,
) -> Result<data::Frame, Error> {
    let kind: EntityKind = model.query_type.parse()?;
    let filter = build_filter(model, window)?;
    let limit = model.limit();
    debug!(%kind, ?filter, limit, "Running Autotask query");
    let frame = match kind {
        EntityKind::Tickets => frames::tickets(&fetch::<Ticket>(client, filter, limit).await?),
        EntityKind::Resources => {
            frames::resources(&fetch::<Resource>(client, filter, limit).await?)
        }
        EntityKind::Companies => {
            frames::companies(&fetch::<Company>(client, filter, limit).await?)
        }
        EntityKind::Contacts => frames::contacts(&fetch::<Contact>(client, filter, limit).await?),
    };
    Ok(frame)
}

async fn fetch<T: Entity>(
    client: &Client,
    filter: Option<Filter>,
    limit: usize,
) -> autotask_client::Result<Vec<T>> {
    let params = EntityQueryParams::new(filter.or_else(T::default_filter));
    client.entities::<T>().query_all(params, limit).await
}
