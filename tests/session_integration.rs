//! Integration tests for the session lifecycle against a mock auth API.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::timeout;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use cookievault::{
    AuthEvent, BackoffPolicy, Connectivity, DeviceFingerprint, MemoryStore, ResilientFetch,
    SessionConfig, SessionManager, TokenStore,
};

fn epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

fn fast_fetch() -> ResilientFetch {
    // Millisecond-scale backoff keeps retry paths quick in tests
    ResilientFetch::new(
        BackoffPolicy::new(Duration::from_millis(5), Duration::from_millis(20), 0.1, 3),
        Connectivity::shared(),
    )
}

fn manager_for(server: &MockServer) -> SessionManager {
    SessionManager::new(
        SessionConfig::new(server.uri()),
        fast_fetch(),
        TokenStore::new(MemoryStore::shared()),
        DeviceFingerprint::new("Mozilla/5.0 Firefox/127.0", "linux", "en-US"),
    )
}

fn manager_with_threshold(server: &MockServer, threshold: Duration) -> SessionManager {
    let mut config = SessionConfig::new(server.uri());
    config.refresh_threshold = threshold;
    SessionManager::new(
        config,
        fast_fetch(),
        TokenStore::new(MemoryStore::shared()),
        DeviceFingerprint::new("Mozilla/5.0 Firefox/127.0", "linux", "en-US"),
    )
}

fn token_body(access: &str, refresh: &str, expires_at: i64) -> serde_json::Value {
    json!({
        "accessToken": access,
        "refreshToken": refresh,
        "expiresAt": expires_at,
        "user": { "id": "u1", "email": "a@b.com", "name": "A" }
    })
}

async fn mount_login(server: &MockServer, expires_at: i64) {
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(body_partial_json(json!({ "email": "a@b.com" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("AT1", "RT1", expires_at)))
        .mount(server)
        .await;
}

// ---- login ----

#[tokio::test]
async fn test_login_success_opens_session() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;

    let manager = manager_for(&server);
    let mut events = manager.subscribe();

    assert!(manager.login("a@b.com", "secret123").await.unwrap());
    assert!(manager.is_authenticated().await);

    let session = manager.current_session().await.unwrap().unwrap();
    assert_eq!(session.access_token, "AT1");
    assert_eq!(session.refresh_token, "RT1");
    assert_eq!(session.user.email, "a@b.com");
    assert!(session.device_id.is_some());

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, AuthEvent::LoginSuccess);
}

#[tokio::test]
async fn test_login_sends_device_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .and(header_exists("x-device-id"))
        .and(header_exists("x-device-info"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("AT1", "RT1", epoch_ms() + 900_000)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());
}

#[tokio::test]
async fn test_login_rejection_returns_false_with_event() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "Invalid email or password",
            "code": "INVALID_CREDENTIALS"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    let mut events = manager.subscribe();

    assert!(!manager.login("a@b.com", "wrong").await.unwrap());
    assert!(!manager.is_authenticated().await);

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        AuthEvent::LoginFailure {
            message: "Invalid email or password".to_string()
        }
    );
}

// ---- single-flight refresh ----

#[tokio::test]
async fn test_concurrent_auth_headers_trigger_exactly_one_refresh() {
    let server = MockServer::start().await;
    // Token already inside the 5-minute refresh threshold
    mount_login(&server, epoch_ms() + 100_000).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_partial_json(json!({ "refreshToken": "RT1" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("AT2", "RT2", epoch_ms() + 900_000)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());

    let (a, b, c) = tokio::join!(
        manager.auth_headers(),
        manager.auth_headers(),
        manager.auth_headers()
    );

    for headers in [a.unwrap(), b.unwrap(), c.unwrap()] {
        let authorization = headers
            .iter()
            .find(|(name, _)| name == "Authorization")
            .map(|(_, value)| value.clone())
            .unwrap();
        assert_eq!(
            authorization, "Bearer AT2",
            "all concurrent callers must see the single refreshed token"
        );
    }
}

#[tokio::test]
async fn test_concurrent_refresh_calls_share_one_flight() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("AT2", "RT2", epoch_ms() + 900_000))
                // Slow response widens the in-flight window
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());

    let (a, b, c, d) = tokio::join!(
        manager.refresh_token(),
        manager.refresh_token(),
        manager.refresh_token(),
        manager.refresh_token()
    );
    assert!(a && b && c && d);
}

// ---- rotation ----

#[tokio::test]
async fn test_refresh_rotates_both_tokens() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_partial_json(json!({ "refreshToken": "RT1" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("AT2", "RT2", epoch_ms() + 900_000)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());
    assert!(manager.refresh_token().await);

    let session = manager.current_session().await.unwrap().unwrap();
    assert_eq!(session.access_token, "AT2");
    assert_eq!(session.refresh_token, "RT2");
    // User survives a refresh response that omits it
    assert_eq!(session.user.email, "a@b.com");
}

// ---- refresh failure tears the session down ----

#[tokio::test]
async fn test_refresh_failure_clears_session_and_emits_expired() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "Invalid refresh token",
            "code": "INVALID_REFRESH_TOKEN"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());
    let mut events = manager.subscribe();

    assert!(!manager.refresh_token().await);
    assert!(!manager.is_authenticated().await, "no partial state");
    assert!(manager.current_session().await.unwrap().is_none());

    let first = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, AuthEvent::TokenRefreshFailed);
    let second = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, AuthEvent::SessionExpired);
}

#[tokio::test]
async fn test_refresh_retries_transient_failures_before_giving_up() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;
    // Two 503s, then success: the shared retry policy must absorb them
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("AT2", "RT2", epoch_ms() + 900_000)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());
    assert!(manager.refresh_token().await);
}

#[tokio::test]
async fn test_refresh_exhausting_retries_clears_session() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;
    // The refresh endpoint never recovers
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3) // retry budget is 3 attempts total
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());
    let mut events = manager.subscribe();

    assert!(!manager.refresh_token().await);
    assert!(manager.current_session().await.unwrap().is_none());

    let deadline = Duration::from_secs(2);
    loop {
        let event = timeout(deadline, events.recv()).await.unwrap().unwrap();
        if event == AuthEvent::SessionExpired {
            break;
        }
    }
}

// ---- auth headers ----

#[tokio::test]
async fn test_auth_headers_without_session_fails() {
    let server = MockServer::start().await;
    let manager = manager_for(&server);
    let result = manager.auth_headers().await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_auth_headers_fresh_token_skips_refresh() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;
    // No /auth/refresh mock mounted: any refresh attempt would 404 and fail

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());

    let headers = manager.auth_headers().await.unwrap();
    let authorization = headers
        .iter()
        .find(|(name, _)| name == "Authorization")
        .map(|(_, value)| value.clone())
        .unwrap();
    assert_eq!(authorization, "Bearer AT1");
}

#[tokio::test]
async fn test_auth_headers_surfaces_session_expired_when_refresh_fails() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 100_000).await; // inside threshold
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "Invalid refresh token",
            "code": "INVALID_REFRESH_TOKEN"
        })))
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());

    let error = manager.auth_headers().await.unwrap_err();
    assert_eq!(error.code(), "SESSION_EXPIRED");
    assert_eq!(error.status(), 401);
}

// ---- proactive refresh timer ----

#[tokio::test]
async fn test_proactive_refresh_fires_before_expiry() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 700).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("AT2", "RT2", epoch_ms() + 900_000)),
        )
        .expect(1)
        .mount(&server)
        .await;

    // 500ms threshold on a 700ms token: the timer fires ~200ms in, with no
    // request traffic driving it
    let manager = manager_with_threshold(&server, Duration::from_millis(500));
    let mut events = manager.subscribe();
    assert!(manager.login("a@b.com", "secret123").await.unwrap());

    // login + refresh events, in order
    let first = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first, AuthEvent::LoginSuccess);
    let second = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, AuthEvent::TokenRefreshed);

    let session = manager.current_session().await.unwrap().unwrap();
    assert_eq!(session.access_token, "AT2");
}

#[tokio::test]
async fn test_failed_proactive_refresh_tears_session_down() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 600).await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": "Invalid refresh token",
            "code": "INVALID_REFRESH_TOKEN"
        })))
        .mount(&server)
        .await;

    let manager = manager_with_threshold(&server, Duration::from_millis(500));
    let mut events = manager.subscribe();
    assert!(manager.login("a@b.com", "secret123").await.unwrap());

    // Drain until SessionExpired shows up; the timer path must reach it
    let deadline = Duration::from_secs(2);
    loop {
        let event = timeout(deadline, events.recv()).await.unwrap().unwrap();
        if event == AuthEvent::SessionExpired {
            break;
        }
    }
    assert!(!manager.is_authenticated().await);
}

// ---- logout ----

#[tokio::test]
async fn test_logout_posts_bearer_and_clears_locally() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .and(header("Authorization", "Bearer AT1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());
    let mut events = manager.subscribe();

    manager.logout().await;
    assert!(!manager.is_authenticated().await);
    assert!(manager.current_session().await.unwrap().is_none());

    let event = timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event, AuthEvent::LogoutSuccess);
}

#[tokio::test]
async fn test_logout_is_idempotent_and_survives_server_failure() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());

    // Server-side failure must not keep the local session alive
    manager.logout().await;
    assert!(!manager.is_authenticated().await);

    // Second logout with nothing to clear is fine
    manager.logout().await;
    assert!(!manager.is_authenticated().await);
}

#[tokio::test]
async fn test_refresh_after_logout_does_not_resurrect_session() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;
    Mock::given(method("POST"))
        .and(path("/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("AT2", "RT2", epoch_ms() + 900_000))
                // Refresh still in flight while logout completes
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());

    let refresher = manager.clone();
    let inflight = tokio::spawn(async move { refresher.refresh_token().await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.logout().await;

    let refreshed = inflight.await.unwrap();
    assert!(!refreshed, "refresh completing after logout must be a no-op");
    assert!(
        manager.current_session().await.unwrap().is_none(),
        "logged-out session must not be resurrected"
    );
}

// ---- resume ----

#[tokio::test]
async fn test_resume_rearms_unexpired_session() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;

    let backend = MemoryStore::shared();
    let fingerprint = DeviceFingerprint::new("Mozilla/5.0 Firefox/127.0", "linux", "en-US");
    let first = SessionManager::new(
        SessionConfig::new(server.uri()),
        fast_fetch(),
        TokenStore::new(backend.clone()),
        fingerprint.clone(),
    );
    assert!(first.login("a@b.com", "secret123").await.unwrap());

    // A new manager over the same backing store picks the session up
    let second = SessionManager::new(
        SessionConfig::new(server.uri()),
        fast_fetch(),
        TokenStore::new(backend),
        fingerprint,
    );
    assert!(second.resume().await.unwrap());
    assert!(second.is_authenticated().await);
}

// ---- device binding ----

// The server maps the fingerprint headers to one stable device id.
#[tokio::test]
async fn test_refresh_carries_device_fingerprint() {
    let server = MockServer::start().await;
    mount_login(&server, epoch_ms() + 900_000).await;

    let fingerprint = DeviceFingerprint::new("Mozilla/5.0 Firefox/127.0", "linux", "en-US");
    let expected_id = fingerprint.device_id();

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(header("x-device-id", expected_id.as_str()))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(token_body("AT2", "RT2", epoch_ms() + 900_000)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let manager = SessionManager::new(
        SessionConfig::new(server.uri()),
        fast_fetch(),
        TokenStore::new(MemoryStore::shared()),
        fingerprint,
    );
    assert!(manager.login("a@b.com", "secret123").await.unwrap());
    assert!(manager.refresh_token().await);
}

// Verifies device-info header parses back into the same fingerprint shape.
#[tokio::test]
async fn test_device_info_header_is_json_fingerprint() {
    let server = MockServer::start().await;
    let received: Arc<std::sync::Mutex<Option<String>>> = Arc::new(std::sync::Mutex::new(None));
    let sink = received.clone();

    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(move |request: &Request| {
            let value = request
                .headers
                .get("x-device-info")
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            *sink.lock().unwrap() = value;
            ResponseTemplate::new(200).set_body_json(json!({
                "accessToken": "AT1",
                "refreshToken": "RT1",
                "expiresAt": 4_102_444_800_000_i64,
                "user": { "id": "u1", "email": "a@b.com", "name": "A" }
            }))
        })
        .mount(&server)
        .await;

    let manager = manager_for(&server);
    assert!(manager.login("a@b.com", "secret123").await.unwrap());

    let raw = received.lock().unwrap().clone().unwrap();
    let parsed: DeviceFingerprint = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed.platform, "linux");
}
