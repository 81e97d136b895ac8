//! The Grafana backend services for the Autotask datasource.
use std::{convert::Infallible, sync::Arc};

use autotask_client::StatusCode as AutotaskStatus;
use bytes::Bytes;
use futures_util::stream::FuturesOrdered;
use grafana_plugin_sdk::{backend, data, prelude::*};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    config::{AutotaskJsonData, AutotaskSecureJsonData, DatasourceSettings},
    instance::{Datasource, InstanceError, InstanceRegistry},
    query::{self, QueryModel, TimeWindow},
};

/// The instance settings Grafana sends for this datasource.
pub type InstanceSettings =
    backend::DataSourceInstanceSettings<AutotaskJsonData, AutotaskSecureJsonData>;

type Registry = InstanceRegistry<InstanceSettings, Datasource, InstanceError>;

/// The Autotask datasource plugin.
#[derive(Clone, Debug, GrafanaPlugin)]
#[grafana_plugin(
    plugin_type = "datasource",
    json_data = "AutotaskJsonData",
    secure_json_data = "AutotaskSecureJsonData"
)]
pub struct AutotaskPlugin {
    instances: Arc<Registry>,
}

impl Default for AutotaskPlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl AutotaskPlugin {
    /// Create a plugin with no datasource instances.
    pub fn new() -> Self {
        let instances = InstanceRegistry::new(
            |settings: &InstanceSettings| -> Result<Datasource, InstanceError> {
                let settings = DatasourceSettings::load(
                    &settings.json_data,
                    &settings.decrypted_secure_json_data,
                    &settings.url,
                )?;
                Datasource::new(&settings)
            },
            Datasource::dispose,
        );
        Self {
            instances: Arc::new(instances),
        }
    }

    fn datasource(
        &self,
        settings: Option<&InstanceSettings>,
    ) -> Result<Arc<Datasource>, Arc<InstanceError>> {
        let settings = settings.ok_or_else(|| Arc::new(InstanceError::MissingSettings))?;
        self.instances
            .get(&settings.uid, settings.updated, settings)
            .map_err(|e| {
                error!(uid = %settings.uid, error = %e, "Failed to create datasource instance");
                Arc::new(e)
            })
    }
}

/// The Grafana status best describing an Autotask failure.
fn query_status(err: &query::Error) -> backend::DataQueryStatus {
    use autotask_client::Error as E;
    use backend::DataQueryStatus as S;
    let err = match err {
        query::Error::UnknownQueryType(_) => return S::BadRequest,
        query::Error::Frame(_) => return S::Internal,
        query::Error::Autotask(e) => e,
    };
    if let Some(status) = err.status() {
        return match status {
            AutotaskStatus::BAD_REQUEST => S::BadRequest,
            AutotaskStatus::UNAUTHORIZED => S::Unauthorized,
            AutotaskStatus::FORBIDDEN => S::Forbidden,
            AutotaskStatus::NOT_FOUND => S::NotFound,
            AutotaskStatus::TOO_MANY_REQUESTS => S::TooManyRequests,
            other => http::StatusCode::from_u16(other.as_u16())
                .map(S::Custom)
                .unwrap_or(S::BadGateway),
        };
    }
    match err.root() {
        E::InvalidFilter(_) => S::BadRequest,
        E::Config(_) => S::ValidationFailed,
        E::NotFound { .. } => S::NotFound,
        E::RateLimited => S::TooManyRequests,
        E::Cancelled => S::Timeout,
        E::Network(e) if e.is_timeout() => S::Timeout,
        E::Network(_) | E::Decode(_) => S::BadGateway,
        _ => S::Internal,
    }
}

fn is_downstream(err: &autotask_client::Error) -> bool {
    use autotask_client::Error as E;
    matches!(
        err.root(),
        E::Http(_) | E::Network(_) | E::Decode(_) | E::RateLimited | E::NotFound { .. }
    )
}

/// An error returned for a single query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The datasource instance could not be created.
    #[error("Failed to get instance: {source}")]
    Instance {
        /// The query's ref id.
        ref_id: String,
        /// Why the instance couldn't be created.
        source: Arc<InstanceError>,
    },
    /// The query failed.
    #[error("Query failed: {source}")]
    Query {
        /// The query's ref id.
        ref_id: String,
        /// The underlying failure.
        source: query::Error,
    },
}

impl backend::DataQueryError for QueryError {
    fn ref_id(self) -> String {
        match self {
            Self::Instance { ref_id, .. } | Self::Query { ref_id, .. } => ref_id,
        }
    }

    fn status(&self) -> backend::DataQueryStatus {
        match self {
            Self::Instance { .. } => backend::DataQueryStatus::ValidationFailed,
            Self::Query { source, .. } => query_status(source),
        }
    }

    fn source(&self) -> backend::ErrorSource {
        match self {
            Self::Query {
                source: query::Error::Autotask(e),
                ..
            } if is_downstream(e) => backend::ErrorSource::Downstream,
            _ => backend::ErrorSource::Plugin,
        }
    }
}

/// Run a single query, isolating its failure from the rest of the request.
pub(crate) async fn handle_query(
    datasource: Result<Arc<Datasource>, Arc<InstanceError>>,
    ref_id: String,
    query_type: &str,
    query: QueryModel,
    window: TimeWindow,
) -> Result<backend::DataResponse, QueryError> {
    let datasource = datasource.map_err(|source| QueryError::Instance {
        ref_id: ref_id.clone(),
        source,
    })?;
    let model = query.with_fallback_query_type(query_type);
    debug!(%ref_id, query_type = %model.query_type, "Handling query");
    let frame = datasource
        .query(&model, Some(&window))
        .await
        .map_err(|source| {
            warn!(%ref_id, error = %source, "Query failed");
            QueryError::Query {
                ref_id: ref_id.clone(),
                source,
            }
        })?;
    let checked = frame.check().map_err(|e| QueryError::Query {
        ref_id: ref_id.clone(),
        source: e.into(),
    })?;
    Ok(backend::DataResponse::new(ref_id, vec![checked]))
}

#[backend::async_trait]
impl backend::DataService for AutotaskPlugin {
    type Query = QueryModel;
    type QueryError = QueryError;
    type Stream = backend::BoxDataResponseStream<Self::QueryError>;

    async fn query_data(
        &self,
        request: backend::QueryDataRequest<Self::Query, Self>,
    ) -> Self::Stream {
        let datasource = self.datasource(request.plugin_context.instance_settings.as_ref());
        Box::pin(
            request
                .queries
                .into_iter()
                .map(|q: backend::DataQuery<Self::Query>| {
                    let window = TimeWindow::from(&q.time_range);
                    let datasource = datasource.clone();
                    async move {
                        handle_query(datasource, q.ref_id, &q.query_type, q.query, window).await
                    }
                })
                .collect::<FuturesOrdered<_>>(),
        )
    }
}

#[backend::async_trait]
impl backend::DiagnosticsService for AutotaskPlugin {
    type CheckHealthError = Infallible;

    async fn check_health(
        &self,
        request: backend::CheckHealthRequest<Self>,
    ) -> Result<backend::CheckHealthResponse, Self::CheckHealthError> {
        let datasource = match self.datasource(request.plugin_context.instance_settings.as_ref()) {
            Ok(ds) => ds,
            Err(e) => {
                return Ok(backend::CheckHealthResponse::error(format!(
                    "Failed to get instance: {e}"
                )))
            }
        };
        Ok(health_message(datasource.zone_info().await))
    }

    type CollectMetricsError = Infallible;

    async fn collect_metrics(
        &self,
        _request: backend::CollectMetricsRequest<Self>,
    ) -> Result<backend::CollectMetricsResponse, Self::CollectMetricsError> {
        Ok(backend::CollectMetricsResponse::new(None))
    }
}

fn health_message(
    zone: autotask_client::Result<autotask_client::ZoneInfo>,
) -> backend::CheckHealthResponse {
    match zone {
        Ok(zone) => backend::CheckHealthResponse::ok(format!(
            "Connected to Autotask (Zone: {})",
            zone.zone_name
        )),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            backend::CheckHealthResponse::error(format!("Failed to connect to Autotask: {e}"))
        }
    }
}

/// An error returned from a resource call.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResourceError {
    /// No handler is registered for the path.
    #[error("Unknown resource path: {0}")]
    NotFound(String),
    /// The handler doesn't accept the request method.
    #[error("Method {0} not allowed")]
    MethodNotAllowed(http::Method),
    /// The datasource instance could not be created.
    #[error("Failed to get instance: {0}")]
    Instance(Arc<InstanceError>),
    /// The request body was not a valid query.
    #[error("Invalid request body: {0}")]
    InvalidBody(#[source] serde_json::Error),
    /// Zone discovery failed.
    #[error("Failed to get zone info: {0}")]
    ZoneInfo(#[source] autotask_client::Error),
    /// The query failed.
    #[error("Query failed: {0}")]
    Query(#[from] query::Error),
    /// The connection test failed.
    #[error("Failed to connect to Autotask: {0}")]
    Connection(#[source] autotask_client::Error),
    /// The response body couldn't be serialized.
    #[error("Failed to serialize response: {0}")]
    Json(#[from] serde_json::Error),
    /// The response couldn't be built.
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),
}

impl ResourceError {
    fn status(&self) -> http::StatusCode {
        match self {
            Self::NotFound(_) => http::StatusCode::NOT_FOUND,
            Self::MethodNotAllowed(_) => http::StatusCode::METHOD_NOT_ALLOWED,
            Self::InvalidBody(_) | Self::Instance(_) => http::StatusCode::BAD_REQUEST,
            Self::Query(query::Error::UnknownQueryType(_)) => http::StatusCode::BAD_REQUEST,
            _ => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl backend::ErrIntoHttpResponse for ResourceError {
    fn into_http_response(self) -> Result<http::Response<Bytes>, Box<dyn std::error::Error>> {
        Ok(http::Response::builder()
            .status(self.status())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(Bytes::from(serde_json::to_vec(
                &json!({"error": self.to_string()}),
            )?))?)
    }
}

fn json_response(body: &impl Serialize) -> Result<http::Response<Bytes>, ResourceError> {
    Ok(http::Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Bytes::from(serde_json::to_vec(body)?))?)
}

const RESOURCE_QUERY_REF_ID: &str = "A";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResourceQueryResult<'a> {
    ref_id: &'a str,
    frames: &'a [data::Frame],
}

fn require_post(method: &http::Method) -> Result<(), ResourceError> {
    if method == http::Method::POST {
        Ok(())
    } else {
        Err(ResourceError::MethodNotAllowed(method.clone()))
    }
}

/// Handle a resource call for an already-resolved datasource.
pub async fn handle_resource(
    datasource: &Datasource,
    method: &http::Method,
    path: &str,
    body: &[u8],
) -> Result<http::Response<Bytes>, ResourceError> {
    match path.trim_end_matches('/') {
        "/zoneinfo" => {
            require_post(method)?;
            let zone = datasource.zone_info().await.map_err(ResourceError::ZoneInfo)?;
            json_response(&zone)
        }
        "/query" => {
            require_post(method)?;
            let model: QueryModel =
                serde_json::from_slice(body).map_err(ResourceError::InvalidBody)?;
            let frame = datasource.query(&model, None).await?;
            json_response(&ResourceQueryResult {
                ref_id: RESOURCE_QUERY_REF_ID,
                frames: &[frame],
            })
        }
        "/test" => {
            datasource.zone_info().await.map_err(ResourceError::Connection)?;
            json_response(&json!({
                "status": "success",
                "message": "Successfully connected to Autotask API"
            }))
        }
        other => Err(ResourceError::NotFound(other.to_string())),
    }
}

#[backend::async_trait]
impl backend::ResourceService for AutotaskPlugin {
    type Error = ResourceError;
    type InitialResponse = http::Response<Bytes>;
    type Stream = backend::BoxResourceStream<Self::Error>;

    async fn call_resource(
        &self,
        r: backend::CallResourceRequest<Self>,
    ) -> Result<(Self::InitialResponse, Self::Stream), Self::Error> {
        let path = r.request.uri().path().to_string();
        debug!(%path, method = %r.request.method(), "Handling resource call");
        let datasource = self
            .datasource(r.plugin_context.instance_settings.as_ref())
            .map_err(ResourceError::Instance)?;
        let response =
            handle_resource(&datasource, r.request.method(), &path, r.request.body()).await?;
        Ok((response, Box::pin(futures_util::stream::empty()) as Self::Stream))
    }
}

#[cfg(test)]
mod tests {
    use backend::{DataQueryError, DataQueryStatus};
    use serde_json::Value;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    async fn mock_autotask() -> MockServer {
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

    fn datasource(server: &MockServer) -> Datasource {
        let json_data: AutotaskJsonData = serde_json::from_value(json!({
            "username": "api@example.com",
            "url": server.uri()
        }))
        .unwrap();
        let secure: AutotaskSecureJsonData =
            serde_json::from_value(json!({"secret": "s", "integrationCode": "c"})).unwrap();
        Datasource::new(&DatasourceSettings::load(&json_data, &secure, "").unwrap()).unwrap()
    }

    fn body(response: &http::Response<Bytes>) -> Value {
        serde_json::from_slice(response.body()).unwrap()
    }

    fn http_error(status: u16) -> query::Error {
        let err = autotask_client::HttpError::from_response(
            autotask_client::Method::GET,
            "https://example.com/",
            AutotaskStatus::from_u16(status).unwrap(),
            b"",
        );
        query::Error::Autotask(autotask_client::Error::from(err).context("Tickets", "query"))
    }

    fn query_error(source: query::Error) -> QueryError {
        QueryError::Query {
            ref_id: "A".to_string(),
            source,
        }
    }

    #[test]
    fn maps_statuses_and_sources() {
        let err = query_error(http_error(401));
        assert!(matches!(err.status(), DataQueryStatus::Unauthorized));
        assert!(matches!(DataQueryError::source(&err), backend::ErrorSource::Downstream));
        assert_eq!(err.ref_id(), "A");

        let err = query_error(http_error(503));
        assert!(matches!(
            err.status(),
            DataQueryStatus::Custom(s) if s == http::StatusCode::SERVICE_UNAVAILABLE
        ));

        let err = query_error(query::Error::UnknownQueryType("x".to_string()));
        assert!(matches!(err.status(), DataQueryStatus::BadRequest));
        assert!(matches!(DataQueryError::source(&err), backend::ErrorSource::Plugin));

        let err = query_error(query::Error::Autotask(autotask_client::Error::InvalidFilter(
            "x".to_string(),
        )));
        assert!(matches!(err.status(), DataQueryStatus::BadRequest));
        assert!(matches!(DataQueryError::source(&err), backend::ErrorSource::Plugin));

        let err = QueryError::Instance {
            ref_id: "B".to_string(),
            source: Arc::new(InstanceError::MissingSettings),
        };
        assert!(matches!(err.status(), DataQueryStatus::ValidationFailed));
        assert_eq!(err.to_string(), "Failed to get instance: missing datasource instance settings");
    }

    #[test]
    fn resource_errors_become_json_responses() {
        use backend::ErrIntoHttpResponse;
        let response = ResourceError::NotFound("/nope".to_string())
            .into_http_response()
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::NOT_FOUND);
        assert_eq!(body(&response), json!({"error": "Unknown resource path: /nope"}));

        let response = ResourceError::MethodNotAllowed(http::Method::GET)
            .into_http_response()
            .unwrap();
        assert_eq!(response.status(), http::StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn health_messages() {
        let server = mock_autotask().await;
        let ds = datasource(&server);
        let response = health_message(ds.zone_info().await);
        assert!(format!("{response:?}").contains("Connected to Autotask (Zone: Test Zone)"));

        let unreachable = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(401)
                    .set_body_json(json!({"errors": ["Bad credentials"]})),
            )
            .mount(&unreachable)
            .await;
        let response = health_message(datasource(&unreachable).zone_info().await);
        let debug = format!("{response:?}");
        assert!(debug.contains("Failed to connect to Autotask"), "{debug}");
        assert!(debug.contains("Bad credentials"), "{debug}");
    }

    #[tokio::test]
    async fn failed_query_does_not_affect_siblings() {
        use futures_util::StreamExt;

        let server = mock_autotask().await;
        Mock::given(method("GET"))
            .and(path("/atservicesrest/v1.0/Companies/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": 1, "companyName": "Acme"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let ds = Ok(Arc::new(datasource(&server)));
        let window = TimeWindow {
            from: chrono::Utc::now() - chrono::Duration::hours(1),
            to: chrono::Utc::now(),
        };
        let query = |query_type: &str| QueryModel {
            query_type: query_type.to_string(),
            ..Default::default()
        };

        let results: Vec<_> = [
            handle_query(ds.clone(), "A".to_string(), "", query("widgets"), window),
            handle_query(ds.clone(), "B".to_string(), "companies", query(""), window),
        ]
        .into_iter()
        .collect::<FuturesOrdered<_>>()
        .collect()
        .await;

        let mut results = results.into_iter();
        match results.next() {
            Some(Err(err)) => {
                assert!(matches!(err.status(), DataQueryStatus::BadRequest));
                assert_eq!(err.ref_id(), "A");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(results.next(), Some(Ok(_))));

        let missing = Err(Arc::new(InstanceError::MissingSettings));
        let err = handle_query(missing, "C".to_string(), "", query("tickets"), window)
            .await
            .unwrap_err();
        assert!(matches!(err.status(), DataQueryStatus::ValidationFailed));
        assert_eq!(err.ref_id(), "C");
    }

    #[tokio::test]
    async fn resource_endpoints() {
        let server = mock_autotask().await;
        Mock::given(method("GET"))
            .and(path("/atservicesrest/v1.0/Companies/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": 1, "companyName": "Acme", "isActive": true}]
            })))
            .mount(&server)
            .await;
        let ds = datasource(&server);

        let response = handle_resource(&ds, &http::Method::POST, "/zoneinfo", b"").await.unwrap();
        assert_eq!(body(&response)["zoneName"], "Test Zone");
        assert!(matches!(
            handle_resource(&ds, &http::Method::GET, "/zoneinfo", b"").await,
            Err(ResourceError::MethodNotAllowed(_))
        ));

        let response = handle_resource(&ds, &http::Method::GET, "/test", b"").await.unwrap();
        assert_eq!(body(&response)["status"], "success");

        let query = br#"{"queryType":"companies","filter":""}"#;
        let response = handle_resource(&ds, &http::Method::POST, "/query", query).await.unwrap();
        let frames = body(&response);
        assert_eq!(frames["refId"], "A");
        assert_eq!(frames["frames"][0]["schema"]["name"], "companies");
        assert_eq!(frames["frames"][0]["data"]["values"][1], json!(["Acme"]));

        assert!(matches!(
            handle_resource(&ds, &http::Method::POST, "/query", b"not json").await,
            Err(ResourceError::InvalidBody(_))
        ));
        assert!(matches!(
            handle_resource(&ds, &http::Method::POST, "/nope", b"").await,
            Err(ResourceError::NotFound(p)) if p == "/nope"
        ));
    }
}
