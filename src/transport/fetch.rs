//! Resilient HTTP execution with retry, backoff, and 401 refresh-and-retry.
//!
//! [`ResilientFetch`] wraps a shared `reqwest::Client`. Transient failures
//! (5xx, network errors) are retried under the shared [`BackoffPolicy`];
//! non-401 client errors fail immediately; a 401 on an authorized call
//! triggers one token refresh and a single replay with fresh headers. When
//! the process knows it is offline, failures short-circuit instead of
//! burning retries.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use reqwest::{Client, Method, Response};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use crate::session::SessionManager;

use super::backoff::BackoffPolicy;

const CONNECT_TIMEOUT_SECS: u64 = 10;
const READ_TIMEOUT_SECS: u64 = 30;

/// Process-wide connectivity signal.
///
/// The embedding application flips this from its platform's network
/// monitoring; the fetch loop only reads it at failure time.
#[derive(Debug)]
pub struct Connectivity {
    online: AtomicBool,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self {
            online: AtomicBool::new(true),
        }
    }
}

impl Connectivity {
    /// Creates a shared connectivity signal, initially online.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records the current connectivity state.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }

    /// True when the process believes it has no connectivity.
    #[must_use]
    pub fn is_offline(&self) -> bool {
        !self.online.load(Ordering::Relaxed)
    }
}

/// A retry-safe description of an outbound API call.
///
/// Requests are rebuilt from this description on every attempt, so bodies
/// are always JSON values rather than consumable streams.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL.
    pub url: String,
    /// Extra headers attached to every attempt.
    pub headers: Vec<(String, String)>,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Creates a GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a POST request with a JSON body.
    #[must_use]
    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: Some(body),
        }
    }

    /// Attaches a header to every attempt of this request.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

// Error body convention shared by all API endpoints.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    code: Option<String>,
}

/// Errors surfaced by [`ResilientFetch`].
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection refused, TLS, etc.).
    #[error("network error calling {url}: {source}")]
    Network {
        /// The URL that failed.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout calling {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The process is offline; the request was not retried.
    #[error("network offline, not retrying {url}")]
    Offline {
        /// The URL that was being called.
        url: String,
    },

    /// Terminal HTTP error response.
    #[error("HTTP {status} calling {url}")]
    Status {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// Machine-readable error code from the response body, if any.
        code: Option<String>,
        /// Server-provided message, if any.
        message: Option<String>,
    },

    /// A 401 that survived the refresh-and-retry path.
    #[error("authorization failed for {url}")]
    Unauthorized {
        /// The URL that rejected the credentials.
        url: String,
    },
}

impl FetchError {
    /// HTTP status taxonomy surfaced to callers: 503 offline, 504 timeout,
    /// 401 auth, the response's own status for HTTP errors, 500 otherwise.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Offline { .. } => 503,
            Self::Timeout { .. } => 504,
            Self::Unauthorized { .. } => 401,
            Self::Status { status, .. } => *status,
            Self::Network { .. } => 500,
        }
    }

    /// True for failures that a retry might resolve.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Offline { .. } | Self::Unauthorized { .. } => false,
        }
    }
}

/// HTTP executor with retry, backoff, and refresh-on-401.
#[derive(Clone)]
pub struct ResilientFetch {
    client: Client,
    backoff: BackoffPolicy,
    connectivity: Arc<Connectivity>,
}

impl std::fmt::Debug for ResilientFetch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientFetch")
            .field("backoff", &self.backoff)
            .field("offline", &self.connectivity.is_offline())
            .finish_non_exhaustive()
    }
}

impl Default for ResilientFetch {
    fn default() -> Self {
        Self::new(BackoffPolicy::default(), Connectivity::shared())
    }
}

impl ResilientFetch {
    /// Creates an executor with the given backoff policy and connectivity
    /// signal.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails with the static configuration.
    /// This should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new(backoff: BackoffPolicy, connectivity: Arc<Connectivity>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(READ_TIMEOUT_SECS))
            .user_agent(default_user_agent())
            .gzip(true)
            .build()
            .expect("failed to build HTTP client with static configuration");
        Self {
            client,
            backoff,
            connectivity,
        }
    }

    /// Returns the backoff policy this executor retries under.
    #[must_use]
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Executes a request with transient-failure retry.
    ///
    /// A 401 here is a terminal client error; use
    /// [`execute_authorized`](Self::execute_authorized) for calls that should
    /// refresh the session instead.
    ///
    /// # Errors
    ///
    /// Returns the last [`FetchError`] once retries are exhausted, or
    /// immediately for client errors and offline failures.
    #[instrument(level = "debug", skip(self, request), fields(url = %request.url))]
    pub async fn execute(&self, request: &ApiRequest) -> Result<Response, FetchError> {
        self.execute_inner(request, None).await
    }

    /// Executes a request with auth headers from the session, refreshing and
    /// replaying once on 401.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Unauthorized`] when the refresh path fails, and
    /// otherwise behaves like [`execute`](Self::execute).
    #[instrument(level = "debug", skip(self, request, session), fields(url = %request.url))]
    pub async fn execute_authorized(
        &self,
        request: &ApiRequest,
        session: &SessionManager,
    ) -> Result<Response, FetchError> {
        self.execute_inner(request, Some(session)).await
    }

    async fn execute_inner(
        &self,
        request: &ApiRequest,
        session: Option<&SessionManager>,
    ) -> Result<Response, FetchError> {
        let mut attempt: u32 = 0;
        loop {
            let error = match self.send_once(request, session).await {
                Ok(response) if response.status().is_success() => return Ok(response),

                Ok(response) if response.status().as_u16() == 401 => {
                    if let Some(manager) = session {
                        return self.refresh_and_replay(request, manager).await;
                    }
                    // Unauthenticated call: 401 is just another client error
                    return Err(status_error(&request.url, response).await);
                }

                // Client errors other than 401 are never retried
                Ok(response) if response.status().is_client_error() => {
                    return Err(status_error(&request.url, response).await);
                }

                Ok(response) => status_error(&request.url, response).await,

                Err(error) => {
                    if self.connectivity.is_offline() {
                        return Err(FetchError::Offline {
                            url: request.url.clone(),
                        });
                    }
                    if !error.is_transient() {
                        return Err(error);
                    }
                    error
                }
            };

            if !self.backoff.allows_retry(attempt) {
                return Err(error);
            }
            let delay = self.backoff.delay(attempt);
            warn!(
                url = %request.url,
                attempt = attempt + 1,
                delay_ms = delay.as_millis(),
                error = %error,
                "transient failure, will retry"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    // The 401 path: one refresh, one replay, the replay's outcome is final.
    async fn refresh_and_replay(
        &self,
        request: &ApiRequest,
        session: &SessionManager,
    ) -> Result<Response, FetchError> {
        debug!(url = %request.url, "401 received, refreshing session");
        if !session.refresh_token().await {
            return Err(FetchError::Unauthorized {
                url: request.url.clone(),
            });
        }
        let replay = self.send_once(request, Some(session)).await?;
        if replay.status().is_success() {
            Ok(replay)
        } else {
            Err(status_error(&request.url, replay).await)
        }
    }

    async fn send_once(
        &self,
        request: &ApiRequest,
        session: Option<&SessionManager>,
    ) -> Result<Response, FetchError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(manager) = session {
            let headers =
                manager
                    .auth_headers()
                    .await
                    .map_err(|_| FetchError::Unauthorized {
                        url: request.url.clone(),
                    })?;
            for (name, value) in headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        builder
            .send()
            .await
            .map_err(|source| classify_send_error(&request.url, source))
    }
}

fn default_user_agent() -> String {
    format!("cookievault/{}", env!("CARGO_PKG_VERSION"))
}

fn classify_send_error(url: &str, source: reqwest::Error) -> FetchError {
    if source.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network {
            url: url.to_string(),
            source,
        }
    }
}

async fn status_error(url: &str, response: Response) -> FetchError {
    let status = response.status().as_u16();
    let body = response.json::<ApiErrorBody>().await.ok();
    FetchError::Status {
        url: url.to_string(),
        status,
        code: body.as_ref().and_then(|b| b.code.clone()),
        message: body.and_then(|b| b.error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_request_builders() {
        let req = ApiRequest::post("https://api.example.com/auth/login", serde_json::json!({}))
            .with_header("x-device-id", "abc");
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.headers.len(), 1);
        assert!(req.body.is_some());

        let get = ApiRequest::get("https://api.example.com/health");
        assert_eq!(get.method, Method::GET);
        assert!(get.body.is_none());
    }

    #[test]
    fn test_connectivity_defaults_online() {
        let connectivity = Connectivity::shared();
        assert!(!connectivity.is_offline());
        connectivity.set_online(false);
        assert!(connectivity.is_offline());
        connectivity.set_online(true);
        assert!(!connectivity.is_offline());
    }

    #[test]
    fn test_fetch_error_status_taxonomy() {
        assert_eq!(
            FetchError::Offline {
                url: "u".to_string()
            }
            .status_code(),
            503
        );
        assert_eq!(
            FetchError::Timeout {
                url: "u".to_string()
            }
            .status_code(),
            504
        );
        assert_eq!(
            FetchError::Unauthorized {
                url: "u".to_string()
            }
            .status_code(),
            401
        );
        assert_eq!(
            FetchError::Status {
                url: "u".to_string(),
                status: 400,
                code: None,
                message: None
            }
            .status_code(),
            400
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(
            FetchError::Timeout {
                url: "u".to_string()
            }
            .is_transient()
        );
        assert!(
            FetchError::Status {
                url: "u".to_string(),
                status: 503,
                code: None,
                message: None
            }
            .is_transient()
        );
        assert!(
            !FetchError::Status {
                url: "u".to_string(),
                status: 404,
                code: None,
                message: None
            }
            .is_transient()
        );
        assert!(
            !FetchError::Offline {
                url: "u".to_string()
            }
            .is_transient()
        );
    }

    #[test]
    fn test_default_user_agent_carries_version() {
        let ua = default_user_agent();
        assert!(ua.starts_with("cookievault/"));
        assert!(ua.contains(env!("CARGO_PKG_VERSION")));
    }
}
