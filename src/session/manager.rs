//! Token session lifecycle: login, logout, refresh, and auth headers.
//!
//! The manager owns the persisted [`Session`] exclusively. Refreshes are
//! single-flight — concurrent callers share one in-flight future — and a
//! proactive timer refreshes the token before expiry regardless of request
//! traffic. A failed refresh always tears the whole session down; there is
//! no half-authenticated state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::clock::epoch_ms;
use crate::transport::{ApiRequest, FetchError, ResilientFetch};

use super::device::DeviceFingerprint;
use super::store::{StoreError, TokenStore};

/// Refresh this long before token expiry (5 minutes).
pub const REFRESH_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Session lifetime assumed when the server omits `expiresAt` (15 minutes).
const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

const EVENT_CHANNEL_CAPACITY: usize = 32;

/// The authenticated user attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// The current token session.
///
/// Invariant: `expires_at` is in the future whenever the session is
/// considered authenticated; expiry or refresh failure clears the session
/// entirely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Short-lived credential authorizing API calls.
    pub access_token: String,
    /// Longer-lived credential used solely to mint new access tokens.
    pub refresh_token: String,
    /// Expiry of the access token, epoch milliseconds.
    pub expires_at: i64,
    /// The authenticated user.
    pub user: SessionUser,
    /// Stable device id this session is bound to.
    pub device_id: Option<String>,
}

/// Typed authentication lifecycle events.
///
/// Replaces ad hoc runtime messages: observers subscribe to a broadcast
/// channel and receive exactly these variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    LoginSuccess,
    LoginFailure {
        /// Server-provided rejection message.
        message: String,
    },
    LogoutSuccess,
    SessionExpired,
    TokenRefreshed,
    TokenRefreshFailed,
}

/// Authentication and session errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The server rejected the operation with a machine-readable code.
    #[error("{message}")]
    Rejected {
        /// Human-readable message.
        message: String,
        /// Machine-readable code, e.g. `INVALID_CREDENTIALS`.
        code: String,
        /// HTTP status the rejection maps to.
        status: u16,
    },

    /// No session is active.
    #[error("no active session")]
    NoSession,

    /// The session expired and could not be refreshed.
    #[error("session expired")]
    SessionExpired,

    /// The server response could not be interpreted.
    #[error("malformed server response: {reason}")]
    MalformedResponse {
        /// What was wrong with the response.
        reason: String,
    },

    /// Transport-level failure.
    #[error(transparent)]
    Transport(#[from] FetchError),

    /// Persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Creates a server-style rejection.
    #[must_use]
    pub fn rejected(message: impl Into<String>, code: impl Into<String>, status: u16) -> Self {
        Self::Rejected {
            message: message.into(),
            code: code.into(),
            status,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Rejected { code, .. } => code,
            Self::NoSession => "NO_SESSION",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::MalformedResponse { .. } => "MALFORMED_RESPONSE",
            Self::Transport(_) => "NETWORK_ERROR",
            Self::Store(_) => "STORAGE_ERROR",
        }
    }

    /// HTTP status this error maps to at an API boundary.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Rejected { status, .. } => *status,
            Self::NoSession | Self::SessionExpired => 401,
            Self::MalformedResponse { .. } | Self::Store(_) => 500,
            Self::Transport(error) => error.status_code(),
        }
    }
}

/// Configuration for a [`SessionManager`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// API base URL, without a trailing slash.
    pub base_url: String,
    /// Refresh this long before expiry.
    pub refresh_threshold: Duration,
    /// Assumed session lifetime when the server omits `expiresAt`.
    pub default_session_ttl: Duration,
}

impl SessionConfig {
    /// Creates a config for the given API base URL with default timings.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            refresh_threshold: REFRESH_THRESHOLD,
            default_session_ttl: DEFAULT_SESSION_TTL,
        }
    }
}

// Token issue/rotation response shared by login, register, and refresh.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_at: Option<i64>,
    user: Option<SessionUser>,
}

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

// Built in a free function so the `Send` obligation on the refresh future is
// discharged here, outside the single-flight storage whose type would
// otherwise make the auto-trait solver recurse on itself.
fn make_refresh_future(manager: SessionManager, epoch: u64) -> RefreshFuture {
    let boxed: BoxFuture<'static, bool> =
        Box::pin(async move { manager.perform_refresh(epoch).await });
    boxed.shared()
}

#[derive(Default)]
struct RuntimeState {
    refresh_timer: Option<JoinHandle<()>>,
    inflight: Option<RefreshFuture>,
    // Bumped on every teardown; an in-flight refresh that observes a stale
    // epoch discards its result instead of resurrecting the session.
    epoch: u64,
}

struct Inner {
    config: SessionConfig,
    fetch: ResilientFetch,
    tokens: TokenStore,
    fingerprint: DeviceFingerprint,
    events: broadcast::Sender<AuthEvent>,
    state: Mutex<RuntimeState>,
}

/// Orchestrates the token session lifecycle.
///
/// Cheap to clone; clones share one session, one refresh timer, and one
/// single-flight refresh slot.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("base_url", &self.inner.config.base_url)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Creates a manager over the given transport, token store, and device
    /// fingerprint.
    #[must_use]
    pub fn new(
        config: SessionConfig,
        fetch: ResilientFetch,
        tokens: TokenStore,
        fingerprint: DeviceFingerprint,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                fetch,
                tokens,
                fingerprint,
                events,
                state: Mutex::new(RuntimeState::default()),
            }),
        }
    }

    /// Subscribes to authentication lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.inner.events.subscribe()
    }

    /// Resumes a persisted session after process start.
    ///
    /// An unexpired session re-arms the proactive refresh timer; an expired
    /// one is cleared. Returns whether a live session was resumed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] when the token store is unreadable.
    #[instrument(level = "debug", skip(self))]
    pub async fn resume(&self) -> Result<bool, AuthError> {
        match self.inner.tokens.load().await? {
            Some(session) if session.expires_at > epoch_ms() => {
                self.schedule_refresh(session.expires_at);
                debug!(user = %session.user.email, "resumed persisted session");
                Ok(true)
            }
            Some(_) => {
                self.inner.tokens.clear().await?;
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Logs in with email/password credentials.
    ///
    /// Expected rejections (bad credentials, unknown user) return
    /// `Ok(false)` and emit [`AuthEvent::LoginFailure`]; only transport and
    /// store failures are errors.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] for transport, store, or malformed-response
    /// failures.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn login(&self, email: &str, password: &str) -> Result<bool, AuthError> {
        self.authenticate("/auth/login", email, password).await
    }

    /// Registers a new account; on success the returned tokens open a
    /// session exactly like [`login`](Self::login).
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] for transport, store, or malformed-response
    /// failures.
    #[instrument(skip(self, password), fields(email = %email))]
    pub async fn register(&self, email: &str, password: &str) -> Result<bool, AuthError> {
        self.authenticate("/auth/register", email, password).await
    }

    async fn authenticate(&self, path: &str, email: &str, password: &str) -> Result<bool, AuthError> {
        let request = self.device_request(path, json!({ "email": email, "password": password }));
        match self.inner.fetch.execute(&request).await {
            Ok(response) => {
                let body: TokenResponse =
                    response
                        .json()
                        .await
                        .map_err(|error| AuthError::MalformedResponse {
                            reason: error.to_string(),
                        })?;
                let session = self.session_from(body, None)?;
                self.inner.tokens.save(&session).await?;
                self.schedule_refresh(session.expires_at);
                info!(user = %session.user.email, "authenticated");
                self.emit(AuthEvent::LoginSuccess);
                Ok(true)
            }
            Err(FetchError::Status {
                status,
                message,
                code,
                ..
            }) if (400..500).contains(&status) => {
                let message = message.unwrap_or_else(|| "authentication rejected".to_string());
                warn!(status, code = code.as_deref().unwrap_or("-"), "authentication rejected");
                self.emit(AuthEvent::LoginFailure { message });
                Ok(false)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Logs out: best-effort server-side invalidation, then unconditional
    /// local teardown. Idempotent; never leaves a stale refresh timer.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        if let Ok(Some(session)) = self.inner.tokens.load().await {
            let request = self
                .device_request("/auth/logout", json!({}))
                .with_header("Authorization", format!("Bearer {}", session.access_token));
            if let Err(error) = self.inner.fetch.execute(&request).await {
                warn!(%error, "server-side logout failed; clearing local session anyway");
            }
        }
        self.teardown_local().await;
        self.emit(AuthEvent::LogoutSuccess);
    }

    /// Refreshes the token pair, returning whether the session is still
    /// live afterwards.
    ///
    /// Single-flight: concurrent callers await the same in-flight attempt,
    /// so at most one refresh request is ever outstanding. Failure tears the
    /// session down and makes [`AuthEvent::SessionExpired`] observable.
    pub async fn refresh_token(&self) -> bool {
        let shared = {
            let mut state = self.lock_state();
            if let Some(existing) = &state.inflight {
                existing.clone()
            } else {
                let manager = self.clone();
                let epoch = state.epoch;
                let fut: RefreshFuture = make_refresh_future(manager, epoch);
                state.inflight = Some(fut.clone());
                fut
            }
        };

        let outcome = shared.clone().await;

        let mut state = self.lock_state();
        if state.inflight.as_ref().is_some_and(|f| f.ptr_eq(&shared)) {
            state.inflight = None;
        }
        outcome
    }

    /// Returns headers for an authenticated API call, proactively refreshing
    /// when the token is within the refresh threshold.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::NoSession`] without a session and
    /// [`AuthError::SessionExpired`] when the required refresh fails.
    pub async fn auth_headers(&self) -> Result<Vec<(String, String)>, AuthError> {
        let session = self
            .inner
            .tokens
            .load()
            .await?
            .ok_or(AuthError::NoSession)?;

        let threshold_ms = duration_ms(self.inner.config.refresh_threshold);
        if session.expires_at - epoch_ms() < threshold_ms && !self.refresh_token().await {
            return Err(AuthError::SessionExpired);
        }

        // Re-read: the refresh (ours or a concurrent one) may have rotated
        let session = self
            .inner
            .tokens
            .load()
            .await?
            .ok_or(AuthError::SessionExpired)?;

        Ok(vec![
            (
                "Authorization".to_string(),
                format!("Bearer {}", session.access_token),
            ),
            (
                "x-device-id".to_string(),
                self.inner.fingerprint.device_id(),
            ),
            (
                "x-device-info".to_string(),
                self.inner.fingerprint.header_value(),
            ),
        ])
    }

    /// True while an unexpired session is held.
    pub async fn is_authenticated(&self) -> bool {
        match self.inner.tokens.load().await {
            Ok(Some(session)) => session.expires_at > epoch_ms(),
            _ => false,
        }
    }

    /// Returns the current session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Store`] when the token store is unreadable.
    pub async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.inner.tokens.load().await?)
    }

    // ---- internals ----

    fn lock_state(&self) -> MutexGuard<'_, RuntimeState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn epoch(&self) -> u64 {
        self.lock_state().epoch
    }

    fn emit(&self, event: AuthEvent) {
        let _ = self.inner.events.send(event);
    }

    fn device_request(&self, path: &str, body: serde_json::Value) -> ApiRequest {
        ApiRequest::post(format!("{}{path}", self.inner.config.base_url), body)
            .with_header("x-device-id", self.inner.fingerprint.device_id())
            .with_header("x-device-info", self.inner.fingerprint.header_value())
    }

    fn session_from(
        &self,
        body: TokenResponse,
        previous_user: Option<SessionUser>,
    ) -> Result<Session, AuthError> {
        let user = body
            .user
            .or(previous_user)
            .ok_or_else(|| AuthError::MalformedResponse {
                reason: "token response is missing the user".to_string(),
            })?;
        let expires_at = body
            .expires_at
            .unwrap_or_else(|| epoch_ms() + duration_ms(self.inner.config.default_session_ttl));
        Ok(Session {
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at,
            user,
            device_id: Some(self.inner.fingerprint.device_id()),
        })
    }

    async fn perform_refresh(&self, epoch_at_start: u64) -> bool {
        let session = match self.inner.tokens.load().await {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!("no session to refresh");
                return false;
            }
            Err(error) => {
                warn!(%error, "token store unreadable during refresh");
                return false;
            }
        };

        let request = self.device_request(
            "/auth/refresh",
            json!({ "refreshToken": session.refresh_token }),
        );

        let rotated = match self.inner.fetch.execute(&request).await {
            Ok(response) => match response.json::<TokenResponse>().await {
                Ok(body) => self.session_from(body, Some(session.user)),
                Err(error) => Err(AuthError::MalformedResponse {
                    reason: error.to_string(),
                }),
            },
            Err(error) => Err(error.into()),
        };

        match rotated {
            Ok(rotated) => {
                // A logout during the round trip wins; do not resurrect.
                if self.epoch() != epoch_at_start {
                    debug!("session torn down during refresh; discarding result");
                    return false;
                }
                if let Err(error) = self.inner.tokens.save(&rotated).await {
                    warn!(%error, "failed to persist rotated session");
                    return self.fail_refresh(epoch_at_start).await;
                }
                self.schedule_refresh(rotated.expires_at);
                debug!("token pair rotated");
                self.emit(AuthEvent::TokenRefreshed);
                true
            }
            Err(error) => {
                warn!(%error, "token refresh failed");
                self.fail_refresh(epoch_at_start).await
            }
        }
    }

    async fn fail_refresh(&self, epoch_at_start: u64) -> bool {
        self.emit(AuthEvent::TokenRefreshFailed);
        // Skip the teardown when a logout already ran; it did the clearing.
        if self.epoch() == epoch_at_start {
            self.teardown_local().await;
            self.emit(AuthEvent::SessionExpired);
        }
        false
    }

    async fn teardown_local(&self) {
        {
            let mut state = self.lock_state();
            state.epoch += 1;
            if let Some(timer) = state.refresh_timer.take() {
                abort_unless_current(&timer);
            }
        }
        if let Err(error) = self.inner.tokens.clear().await {
            warn!(%error, "failed to clear persisted session");
        }
    }

    // Arms the proactive refresh timer, cancelling any previous one. The
    // task holds only a weak reference so a dropped manager cannot be
    // revived by its own timer.
    fn schedule_refresh(&self, expires_at: i64) {
        let delay = refresh_delay(expires_at, epoch_ms(), self.inner.config.refresh_threshold);
        let weak = Arc::downgrade(&self.inner);
        let mut state = self.lock_state();
        if let Some(previous) = state.refresh_timer.take() {
            abort_unless_current(&previous);
        }
        debug!(delay_ms = delay.as_millis(), "proactive refresh scheduled");
        state.refresh_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                let manager = SessionManager { inner };
                if !manager.refresh_token().await {
                    debug!("proactive refresh failed; session torn down");
                }
            }
        }));
    }
}

// A refresh-failure teardown can run on the refresh timer task itself;
// aborting that task here would cancel the teardown mid-way. The spent
// handle is dropped instead — the task is already past its sleep.
fn abort_unless_current(timer: &JoinHandle<()>) {
    if tokio::task::try_id() != Some(timer.id()) {
        timer.abort();
    }
}

/// Delay until the proactive refresh should fire:
/// `max(0, time_until_expiry - threshold)`.
fn refresh_delay(expires_at: i64, now: i64, threshold: Duration) -> Duration {
    let threshold_ms = duration_ms(threshold);
    let delay_ms = (expires_at - now - threshold_ms).max(0);
    Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0))
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
