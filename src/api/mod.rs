pub mod error;
pub mod types;
pub mod ws;

pub use error::{normalize_server_error, ApiError, RequestError};
pub use types::{
    Answer, ClarificationPrompt, ClarificationRequest, HealthStatus, Portfolio, QueryOutcome,
    QueryRequest, SessionSnapshot,
};

use crate::config::Config;
use async_trait::async_trait;
use error::normalize_error_body;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use types::QueryResponse;

/// Operations the session layer needs from the Portfolio Intelligence API.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn submit_query(&self, request: QueryRequest) -> Result<QueryOutcome, ApiError>;

    async fn submit_clarification(
        &self,
        request: ClarificationRequest,
    ) -> Result<QueryOutcome, ApiError>;

    async fn fetch_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError>;

    async fn delete_session(&self, session_id: &str) -> Result<(), ApiError>;

    async fn fetch_portfolio(&self, client_id: &str) -> Result<Portfolio, ApiError>;
}

/// HTTP client for the Portfolio Intelligence API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    root: Url,
    timeout: Duration,
}

const API_PREFIX: [&str; 2] = ["api", "v1"];

impl ApiClient {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        Self::with_timeout(&config.api_base_url, config.request_timeout())
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ApiError> {
        let base_url = base_url.trim_end_matches('/');
        let root = Url::parse(base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ApiError::RequestFailed {
                message: format!("invalid API base URL: {}", base_url),
            })?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::RequestFailed {
                message: format!("could not build HTTP client: {}", e),
            })?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
            root,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Append path segments to the base URL. Each segment is percent-encoded,
    /// so ids containing `/`, `?` or `#` stay inside their segment.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.root.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn api_url(&self, path: &[&str]) -> Url {
        self.url(API_PREFIX.iter().chain(path).copied())
    }

    fn transport_error(&self, err: reqwest::Error) -> RequestError {
        if err.is_timeout() {
            RequestError::Timeout(self.timeout.as_secs().max(1))
        } else if err.is_connect() {
            RequestError::Connect(self.base_url.clone())
        } else if err.is_decode() {
            RequestError::Decode(err.to_string())
        } else {
            RequestError::Http(err.to_string())
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<reqwest::Response, RequestError> {
        let resp = req
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(RequestError::Server {
                status,
                message: normalize_error_body(status, &text),
            });
        }
        Ok(resp)
    }

    async fn call<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, RequestError> {
        let resp = self.send(req).await?;
        // Read the body first so a timeout mid-body is not reported as a decode error.
        let body = resp.text().await.map_err(|e| self.transport_error(e))?;
        serde_json::from_str(&body).map_err(|e| RequestError::Decode(e.to_string()))
    }

    fn request(&self, method: Method, path: &[&str]) -> RequestBuilder {
        let url = self.api_url(path);
        tracing::debug!(%method, %url, "api request");
        self.http.request(method, url)
    }

    pub async fn health(&self) -> Result<HealthStatus, ApiError> {
        self.call(self.http.get(self.url(["health"])))
            .await
            .map_err(|e| ApiError::RequestFailed {
                message: e.to_string(),
            })
    }
}

#[async_trait]
impl QueryBackend for ApiClient {
    async fn submit_query(&self, request: QueryRequest) -> Result<QueryOutcome, ApiError> {
        let original_query = request.query.clone();
        let resp: QueryResponse = self
            .call(self.request(Method::POST, &["query"]).json(&request))
            .await
            .map_err(ApiError::query)?;
        Ok(resp.into_outcome(&original_query))
    }

    async fn submit_clarification(
        &self,
        request: ClarificationRequest,
    ) -> Result<QueryOutcome, ApiError> {
        let resp: QueryResponse = self
            .call(self.request(Method::POST, &["query", "clarify"]).json(&request))
            .await
            .map_err(ApiError::query)?;
        Ok(resp.into_outcome(&request.original_query))
    }

    async fn fetch_session(&self, session_id: &str) -> Result<SessionSnapshot, ApiError> {
        self.call(self.request(Method::GET, &["session", session_id]))
            .await
            .map_err(|e| ApiError::session(session_id, e))
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.send(self.request(Method::DELETE, &["session", session_id]))
            .await
            .map(|_| ())
            .map_err(|e| ApiError::session(session_id, e))
    }

    async fn fetch_portfolio(&self, client_id: &str) -> Result<Portfolio, ApiError> {
        self.call(self.request(Method::GET, &["clients", client_id, "portfolio"]))
            .await
            .map_err(ApiError::portfolio)
    }
}
