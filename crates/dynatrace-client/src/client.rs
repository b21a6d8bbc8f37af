//! HTTP Client for the Dynatrace Environment API

use crate::error::DynatraceError;
use crate::types::{
    CustomDevice, CustomDeviceResponse, EventCreation, EventStoreResult, Problem, ProblemList,
    Tag, TagResponse,
};
use crate::DynatraceApi;
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Problems requested per page
const PROBLEM_PAGE_SIZE: &str = "50";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Environment URL, e.g. `https://abc12345.live.dynatrace.com`
    pub base_url: String,
    /// API token with event, problem, entity and tag scopes
    pub api_token: String,
    /// Attempts per call before giving up
    pub retries: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Timeout of a single HTTP request
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_token: String::new(),
            retries: 5,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntityResponse {
    #[serde(default)]
    display_name: String,
}

/// Dynatrace API client with a bounded, fixed-delay retry policy
pub struct DynatraceClient {
    http: Client,
    base_url: Url,
    config: ClientConfig,
}

impl DynatraceClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self, DynatraceError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| DynatraceError::Config(format!("invalid base URL {}: {}", config.base_url, e)))?;

        let http = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("dynatrace-receiver/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DynatraceError::Config(e.to_string()))?;

        info!(
            "Creating Dynatrace client for {} ({} attempts, {:?} apart)",
            base_url, config.retries, config.retry_delay
        );

        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    /// Build an endpoint URL, percent-encoding every path segment
    fn endpoint(&self, segments: &[&str]) -> Result<Url, DynatraceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DynatraceError::Config(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send the request built by `build`, retrying transient failures
    async fn execute<F>(&self, operation: &'static str, build: F) -> Result<String, DynatraceError>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let attempts = self.config.retries.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(operation, build(&self.http)).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < attempts => {
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation, attempt, attempts, self.config.retry_delay, e
                    );
                    tokio::time::sleep(self.config.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<String, DynatraceError> {
        let network = |e: reqwest::Error| DynatraceError::Network {
            operation,
            message: e.to_string(),
        };

        let response = request
            .header(AUTHORIZATION, format!("Api-Token {}", self.config.api_token))
            .send()
            .await
            .map_err(network)?;

        let status = response.status();
        let body = response.text().await.map_err(network)?;

        if !status.is_success() {
            return Err(DynatraceError::Http {
                operation,
                status: status.as_u16(),
                body,
            });
        }

        debug!("{} answered {}", operation, status);
        Ok(body)
    }

    fn decode<T: DeserializeOwned>(operation: &'static str, body: &str) -> Result<T, DynatraceError> {
        serde_json::from_str(body).map_err(|e| DynatraceError::Decode {
            operation,
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl DynatraceApi for DynatraceClient {
    async fn create_custom_device(
        &self,
        custom_device_id: &str,
        device: &CustomDevice,
    ) -> Result<CustomDeviceResponse, DynatraceError> {
        const OP: &str = "create custom device";
        let url = self.endpoint(&["api", "v1", "entity", "infrastructure", "custom", custom_device_id])?;
        let body = self.execute(OP, |http| http.post(url.clone()).json(device)).await?;
        Self::decode(OP, &body)
    }

    async fn create_event(&self, event: &EventCreation) -> Result<EventStoreResult, DynatraceError> {
        const OP: &str = "create event";
        let url = self.endpoint(&["api", "v1", "events"])?;
        let body = self.execute(OP, |http| http.post(url.clone()).json(event)).await?;
        Self::decode(OP, &body)
    }

    async fn list_open_problems(&self) -> Result<Vec<Problem>, DynatraceError> {
        const OP: &str = "list problems";
        let url = self.endpoint(&["api", "v2", "problems"])?;
        let mut problems = Vec::new();
        let mut next_page_key: Option<String> = None;

        loop {
            let body = match &next_page_key {
                // Follow-up pages only accept the page key
                Some(key) => {
                    self.execute(OP, |http| http.get(url.clone()).query(&[("nextPageKey", key)]))
                        .await?
                }
                None => {
                    self.execute(OP, |http| {
                        http.get(url.clone()).query(&[
                            ("fields", "evidenceDetails"),
                            ("problemSelector", "status(\"open\")"),
                            ("pageSize", PROBLEM_PAGE_SIZE),
                        ])
                    })
                    .await?
                }
            };

            let page: ProblemList = Self::decode(OP, &body)?;
            problems.extend(page.problems);

            match page.next_page_key {
                Some(key) if !key.is_empty() => next_page_key = Some(key),
                _ => break,
            }
        }

        debug!("Fetched {} open problems", problems.len());
        Ok(problems)
    }

    async fn close_problem(&self, problem_id: &str, message: &str) -> Result<(), DynatraceError> {
        let url = self.endpoint(&["api", "v2", "problems", problem_id, "close"])?;
        let payload = json!({ "message": message });
        self.execute("close problem", |http| http.post(url.clone()).json(&payload))
            .await?;
        Ok(())
    }

    async fn apply_tags(
        &self,
        entity_selector: &str,
        tags: &[Tag],
    ) -> Result<TagResponse, DynatraceError> {
        const OP: &str = "apply tags";
        let url = self.endpoint(&["api", "v2", "tags"])?;
        let payload = json!({ "tags": tags });
        let body = self
            .execute(OP, |http| {
                http.post(url.clone())
                    .query(&[("entitySelector", entity_selector)])
                    .json(&payload)
            })
            .await?;
        Self::decode(OP, &body)
    }

    async fn entity_display_name(&self, entity_id: &str) -> Result<String, DynatraceError> {
        const OP: &str = "get entity";
        let url = self.endpoint(&["api", "v2", "entities", entity_id])?;
        let body = self.execute(OP, |http| http.get(url.clone())).await?;
        let entity: EntityResponse = Self::decode(OP, &body)?;
        Ok(entity.display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttachRules, EventType};
    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(base_url: String, retries: u32) -> DynatraceClient {
        DynatraceClient::new(ClientConfig {
            base_url,
            api_token: "dt0c01.token".to_string(),
            retries,
            retry_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn event() -> EventCreation {
        EventCreation {
            event_type: EventType::CustomInfo,
            start: None,
            end: None,
            timeout_minutes: 120,
            attach_rules: AttachRules {
                entity_ids: vec!["CUSTOM_DEVICE-1".to_string()],
            },
            source: "AlertManager".to_string(),
            title: "Alert from AlertManager".to_string(),
            description: String::new(),
            custom_properties: Default::default(),
            allow_davis_merge: false,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/api/v1/events",
                post(|State(hits): State<Arc<AtomicUsize>>, headers: HeaderMap| async move {
                    assert_eq!(headers["authorization"], "Api-Token dt0c01.token");
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        (StatusCode::SERVICE_UNAVAILABLE, "busy".to_string())
                    } else {
                        (StatusCode::OK, r#"{"storedCorrelationIds": ["c-1"]}"#.to_string())
                    }
                }),
            )
            .with_state(Arc::clone(&hits));
        let client = client(serve(app).await, 5);

        let result = client.create_event(&event()).await.unwrap();
        assert_eq!(result.stored_correlation_ids, vec!["c-1".to_string()]);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/api/v1/events",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::BAD_GATEWAY
                }),
            )
            .with_state(Arc::clone(&hits));
        let client = client(serve(app).await, 3);

        let err = client.create_event(&event()).await.unwrap_err();
        assert!(matches!(err, DynatraceError::Http { status: 502, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = Router::new()
            .route(
                "/api/v2/problems/:id/close",
                post(|State(hits): State<Arc<AtomicUsize>>| async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::UNAUTHORIZED
                }),
            )
            .with_state(Arc::clone(&hits));
        let client = client(serve(app).await, 5);

        let err = client.close_problem("P-1", "closed").await.unwrap_err();
        assert!(matches!(err, DynatraceError::Http { status: 401, .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_problem_pages_are_followed() {
        let app = Router::new().route(
            "/api/v2/problems",
            get(|Query(params): Query<HashMap<String, String>>| async move {
                let body = if params.contains_key("nextPageKey") {
                    assert!(!params.contains_key("problemSelector"));
                    r#"{"problems": [{"problemId": "P-2"}]}"#
                } else {
                    assert_eq!(params["problemSelector"], "status(\"open\")");
                    assert_eq!(params["fields"], "evidenceDetails");
                    r#"{"nextPageKey": "page-2", "problems": [{"problemId": "P-1"}]}"#
                };
                (StatusCode::OK, body)
            }),
        );
        let client = client(serve(app).await, 1);

        let problems = client.list_open_problems().await.unwrap();
        let ids: Vec<_> = problems.iter().map(|p| p.problem_id.as_str()).collect();
        assert_eq!(ids, vec!["P-1", "P-2"]);
    }

    #[tokio::test]
    async fn test_custom_device_id_is_path_encoded() {
        let app = Router::new().route(
            "/api/v1/entity/infrastructure/custom/:id",
            post(|axum::extract::Path(id): axum::extract::Path<String>, Json(device): Json<CustomDevice>| async move {
                assert_eq!(id, "Alertmanager - monitoring: kubelet");
                assert_eq!(device.group.as_deref(), Some("alertmanager"));
                Json(serde_json::json!({ "entityId": "CUSTOM_DEVICE-ABC", "groupId": "CUSTOM_DEVICE_GROUP-DEF" }))
            }),
        );
        let client = client(serve(app).await, 1);

        let device = CustomDevice {
            display_name: "Alertmanager - monitoring: kubelet".to_string(),
            group: Some("alertmanager".to_string()),
            device_type: None,
        };
        let response = client
            .create_custom_device("Alertmanager - monitoring: kubelet", &device)
            .await
            .unwrap();
        assert_eq!(response.entity_id, "CUSTOM_DEVICE-ABC");
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let result = DynatraceClient::new(ClientConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(DynatraceError::Config(_))));
    }
}
