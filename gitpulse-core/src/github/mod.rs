//! Typed client for the upstream REST API.
//!
//! GET-only. Every call passes through the rate coordinator on both sides of
//! the request: `check_limit` before, `record_limit` on whatever response
//! comes back, error or not. The events listing is conditional: the client
//! replays the last `ETag` so an unchanged stream costs a 304.

pub mod types;

pub use types::{
    EventActor, EventData, EventRepo, LicenseData, OrganizationData, OwnerData, PushPayload,
    RepositoryData, UserData,
};

use crate::ratelimit::{DEFAULT_RESOURCE, RateCoordinator, header_i64};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

const ACCEPT_HEADER: &str = "application/vnd.github+json";
const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("gitpulse/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static RATE_LIMIT_MESSAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)rate limit").expect("static regex"));

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// 304 against a conditional request; the caller treats this as "no new
    /// data", not as a failure.
    #[error("not modified")]
    NotModified,

    #[error("rate limited (status {status:?})")]
    RateLimited { status: Option<u16>, body: String },

    #[error("client error (status {status})")]
    ClientError { status: u16, body: String },

    #[error("server error (status {status:?}): {body}")]
    ServerError { status: Option<u16>, body: String },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotModified => Some(304),
            ApiError::RateLimited { status, .. } => *status,
            ApiError::ClientError { status, .. } => Some(*status),
            ApiError::ServerError { status, .. } => *status,
        }
    }
}

/// One event off the public listing: the decoded shape next to the verbatim
/// JSON text it was decoded from. The raw text is what gets persisted.
#[derive(Debug, Clone)]
pub struct RawEvent {
    pub raw: String,
    pub data: EventData,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GithubApi: Send + Sync {
    async fn list_public_events(&self) -> Result<Vec<RawEvent>, ApiError>;

    async fn get_user(&self, login: &str) -> Result<UserData, ApiError>;

    async fn get_repository(&self, owner: &str, name: &str) -> Result<RepositoryData, ApiError>;

    async fn get_organization(&self, login: &str) -> Result<OrganizationData, ApiError>;
}

pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    limiter: Arc<RateCoordinator>,
    events_etag: Mutex<Option<String>>,
}

impl fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl GithubClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        limiter: Arc<RateCoordinator>,
    ) -> Self {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT_HEADER));
        default_headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));
        default_headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(default_headers)
            .build()
            .expect("Failed to create HTTP client");

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            token,
            limiter,
            events_etag: Mutex::new(None),
        }
    }

    async fn get(&self, path: &str, etag: Option<String>) -> Result<reqwest::Response, ApiError> {
        // The coordinator is advisory; a KV outage must not stop ingestion.
        if let Err(e) = self.limiter.check_limit(DEFAULT_RESOURCE).await {
            warn!("rate coordinator unavailable before request: {e}");
        }

        let url = format!("{}{}", self.base_url, path);
        debug!(%url, "GET");

        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(etag) = etag {
            request = request.header(header::IF_NONE_MATCH, etag);
        }

        let response = request.send().await.map_err(|e| ApiError::ServerError {
            status: None,
            body: e.to_string(),
        })?;

        if let Err(e) = self.limiter.record_limit(response.headers()).await {
            warn!("failed to record rate-limit headers: {e}");
        }

        Ok(response)
    }

    /// Map the response status onto the error taxonomy and hand back the body
    /// text of successful responses.
    async fn into_body(response: reqwest::Response) -> Result<(u16, String), ApiError> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();

        match status {
            304 => Err(ApiError::NotModified),
            429 => Err(ApiError::RateLimited {
                status: Some(status),
                body,
            }),
            403 if is_rate_limit_response(&headers, &body) => Err(ApiError::RateLimited {
                status: Some(status),
                body,
            }),
            400..=499 => Err(ApiError::ClientError { status, body }),
            500.. => Err(ApiError::ServerError {
                status: Some(status),
                body,
            }),
            _ => Ok((status, body)),
        }
    }

    async fn fetch_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.get(path, None).await?;
        let (status, body) = Self::into_body(response).await?;
        serde_json::from_str(&body).map_err(|e| ApiError::ServerError {
            status: Some(status),
            body: format!("invalid JSON payload: {e}"),
        })
    }
}

#[async_trait]
impl GithubApi for GithubClient {
    async fn list_public_events(&self) -> Result<Vec<RawEvent>, ApiError> {
        let etag = self.events_etag.lock().await.clone();
        let response = self.get("/events?per_page=100", etag).await?;
        let new_etag = response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let (status, body) = Self::into_body(response).await?;
        if let Some(tag) = new_etag {
            *self.events_etag.lock().await = Some(tag);
        }

        let items: Vec<Box<RawValue>> =
            serde_json::from_str(&body).map_err(|e| ApiError::ServerError {
                status: Some(status),
                body: format!("invalid events payload: {e}"),
            })?;

        let mut events = Vec::with_capacity(items.len());
        for item in items {
            let data: EventData =
                serde_json::from_str(item.get()).map_err(|e| ApiError::ServerError {
                    status: Some(status),
                    body: format!("invalid event entry: {e}"),
                })?;
            events.push(RawEvent {
                raw: item.get().to_string(),
                data,
            });
        }
        Ok(events)
    }

    async fn get_user(&self, login: &str) -> Result<UserData, ApiError> {
        self.fetch_json(&format!("/users/{login}")).await
    }

    async fn get_repository(&self, owner: &str, name: &str) -> Result<RepositoryData, ApiError> {
        self.fetch_json(&format!("/repos/{owner}/{name}")).await
    }

    async fn get_organization(&self, login: &str) -> Result<OrganizationData, ApiError> {
        self.fetch_json(&format!("/orgs/{login}")).await
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// A 403 is a rate-limit rejection when the window is exhausted, the response
/// asks us to come back later, or the error message says so.
fn is_rate_limit_response(headers: &HeaderMap, body: &str) -> bool {
    if header_i64(headers, "x-ratelimit-remaining") == Some(0) {
        return true;
    }
    if headers.contains_key(header::RETRY_AFTER) {
        return true;
    }
    serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .is_some_and(|m| RATE_LIMIT_MESSAGE.is_match(&m))
}
