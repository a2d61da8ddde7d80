//! Backend counterpart of the session layer: device registration,
//! server-session rotation, and per-device revocation.
//!
//! Framework-free — any HTTP router can mount these operations and map
//! [`AuthError`] codes/statuses onto responses. State lives in concurrent
//! maps; durable persistence is an externally provided concern.

use std::time::Duration;

use dashmap::DashMap;
use rand::RngCore;
use tracing::{debug, instrument};

use crate::clock::epoch_ms;

use super::device::DeviceFingerprint;
use super::manager::AuthError;

/// Access token lifetime (15 minutes).
const ACCESS_TOKEN_TTL: Duration = Duration::from_secs(15 * 60);

/// Refresh token / server session lifetime (7 days).
const REFRESH_TOKEN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A registered device: one row per (user, fingerprint hash).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Row id.
    pub id: String,
    /// Stable fingerprint hash; the same browser always maps here.
    pub device_id: String,
    /// Owning user.
    pub user_id: String,
    /// Fingerprint characteristics as presented at registration.
    pub user_agent: String,
    pub platform: String,
    pub language: String,
    /// Display name, e.g. `Firefox on linux`.
    pub name: String,
    /// Last login/refresh from this device, epoch milliseconds.
    pub last_used: i64,
    /// Deactivated devices cannot hold valid sessions.
    pub is_active: bool,
}

/// One row per issued token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSession {
    /// Row id.
    pub id: String,
    /// Owning user.
    pub user_id: String,
    /// Id shared by the access/refresh pair of this row.
    pub token_id: String,
    /// Device this session is bound to.
    pub device_id: String,
    /// The refresh token accepted for rotation.
    pub refresh_token: String,
    /// Cleared on rotation, logout, or revocation.
    pub is_valid: bool,
    /// Refresh validity horizon, epoch milliseconds.
    pub expires_at: i64,
    /// Last validated use, epoch milliseconds.
    pub last_activity: i64,
}

/// A freshly minted token pair.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    /// Short-lived credential for API calls.
    pub access_token: String,
    /// Credential accepted by [`SessionRegistry::rotate`].
    pub refresh_token: String,
    /// Row id of the backing [`ServerSession`].
    pub token_id: String,
    /// Device the pair is bound to.
    pub device_id: String,
    /// Access token expiry, epoch milliseconds.
    pub expires_at: i64,
}

/// Context resolved from a validated access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenContext {
    pub user_id: String,
    pub token_id: String,
    pub device_id: String,
}

#[derive(Debug, Clone)]
struct AccessEntry {
    token_id: String,
    expires_at: i64,
}

/// In-memory device and server-session tracking.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    devices: DashMap<(String, String), Device>,
    sessions: DashMap<String, ServerSession>,
    access_index: DashMap<String, AccessEntry>,
}

impl SessionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or touches) the device for a fingerprint.
    ///
    /// The device id is the deterministic fingerprint hash, so repeated
    /// logins from the same browser reuse one row; only `last_used` moves.
    #[instrument(level = "debug", skip(self, fingerprint))]
    pub fn register_device(
        &self,
        user_id: &str,
        fingerprint: &DeviceFingerprint,
        name: Option<&str>,
    ) -> Device {
        let device_id = fingerprint.device_id();
        let key = (user_id.to_string(), device_id.clone());
        let mut entry = self.devices.entry(key).or_insert_with(|| Device {
            id: random_hex(16),
            device_id,
            user_id: user_id.to_string(),
            user_agent: fingerprint.user_agent.clone(),
            platform: fingerprint.platform.clone(),
            language: fingerprint.language.clone(),
            name: name
                .map_or_else(|| fingerprint.display_name(), ToString::to_string),
            last_used: epoch_ms(),
            is_active: true,
        });
        entry.last_used = epoch_ms();
        entry.clone()
    }

    /// Issues a token pair bound to the fingerprint's device, creating one
    /// [`ServerSession`] row.
    #[instrument(level = "debug", skip(self, fingerprint))]
    pub fn create_session(&self, user_id: &str, fingerprint: &DeviceFingerprint) -> IssuedTokens {
        let device = self.register_device(user_id, fingerprint, None);
        let now = epoch_ms();

        let token_id = random_hex(16);
        let access_token = random_hex(32);
        let refresh_token = random_hex(32);

        self.sessions.insert(
            token_id.clone(),
            ServerSession {
                id: random_hex(16),
                user_id: user_id.to_string(),
                token_id: token_id.clone(),
                device_id: device.device_id.clone(),
                refresh_token: refresh_token.clone(),
                is_valid: true,
                expires_at: now + duration_ms(REFRESH_TOKEN_TTL),
                last_activity: now,
            },
        );
        let access_expires_at = now + duration_ms(ACCESS_TOKEN_TTL);
        self.access_index.insert(
            access_token.clone(),
            AccessEntry {
                token_id: token_id.clone(),
                expires_at: access_expires_at,
            },
        );

        debug!(user = user_id, token_id = %token_id, "session created");
        IssuedTokens {
            access_token,
            refresh_token,
            token_id,
            device_id: device.device_id,
            expires_at: access_expires_at,
        }
    }

    /// Rotates a refresh token: invalidates the old row, issues a new pair.
    ///
    /// The invalidate and create are two separate writes; a crash between
    /// them leaves a revoked old session with no replacement. This is a
    /// known failure mode, not hidden.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] with `INVALID_REFRESH_TOKEN` for unknown or
    /// already-invalidated tokens and `REFRESH_TOKEN_EXPIRED` past the
    /// refresh horizon (both 401).
    #[instrument(level = "debug", skip(self, refresh_token, fingerprint))]
    pub fn rotate(
        &self,
        refresh_token: &str,
        fingerprint: &DeviceFingerprint,
    ) -> Result<IssuedTokens, AuthError> {
        let current = self
            .sessions
            .iter()
            .find(|entry| entry.value().is_valid && entry.value().refresh_token == refresh_token)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                AuthError::rejected("Invalid refresh token", "INVALID_REFRESH_TOKEN", 401)
            })?;

        if current.expires_at < epoch_ms() {
            return Err(AuthError::rejected(
                "Refresh token has expired",
                "REFRESH_TOKEN_EXPIRED",
                401,
            ));
        }

        self.invalidate_session(&current.token_id);
        Ok(self.create_session(&current.user_id, fingerprint))
    }

    /// Resolves and touches the session behind an access token.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] with `INVALID_TOKEN` (401) for unknown or
    /// expired access tokens and `INVALID_SESSION` (401) when the backing
    /// session row is gone or invalidated.
    pub fn validate_token(&self, access_token: &str) -> Result<TokenContext, AuthError> {
        let entry = self
            .access_index
            .get(access_token)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AuthError::rejected("Invalid token", "INVALID_TOKEN", 401))?;

        if entry.expires_at < epoch_ms() {
            return Err(AuthError::rejected("Invalid token", "INVALID_TOKEN", 401));
        }

        let mut session = self
            .sessions
            .get_mut(&entry.token_id)
            .ok_or_else(|| {
                AuthError::rejected("Invalid or expired session", "INVALID_SESSION", 401)
            })?;
        if !session.is_valid || session.expires_at < epoch_ms() {
            return Err(AuthError::rejected(
                "Invalid or expired session",
                "INVALID_SESSION",
                401,
            ));
        }

        session.last_activity = epoch_ms();
        Ok(TokenContext {
            user_id: session.user_id.clone(),
            token_id: session.token_id.clone(),
            device_id: session.device_id.clone(),
        })
    }

    /// Invalidates the session row behind a token id (logout).
    pub fn invalidate_session(&self, token_id: &str) {
        if let Some(mut session) = self.sessions.get_mut(token_id) {
            session.is_valid = false;
        }
    }

    /// Invalidates every session of a user, across all devices.
    pub fn invalidate_user_sessions(&self, user_id: &str) {
        for mut entry in self.sessions.iter_mut() {
            if entry.value().user_id == user_id {
                entry.value_mut().is_valid = false;
            }
        }
    }

    /// Deactivates a device and invalidates all of its sessions.
    ///
    /// # Errors
    ///
    /// Returns an [`AuthError`] with `DEVICE_NOT_FOUND` (404) for an unknown
    /// device.
    #[instrument(level = "debug", skip(self))]
    pub fn deactivate_device(&self, user_id: &str, device_id: &str) -> Result<(), AuthError> {
        let key = (user_id.to_string(), device_id.to_string());
        let mut device = self
            .devices
            .get_mut(&key)
            .ok_or_else(|| AuthError::rejected("Device not found", "DEVICE_NOT_FOUND", 404))?;
        device.is_active = false;
        drop(device);

        for mut entry in self.sessions.iter_mut() {
            let session = entry.value_mut();
            if session.user_id == user_id && session.device_id == device_id {
                session.is_valid = false;
            }
        }
        Ok(())
    }

    /// Returns a user's devices, most recently used first.
    #[must_use]
    pub fn user_devices(&self, user_id: &str) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        devices.sort_by(|a, b| b.last_used.cmp(&a.last_used));
        devices
    }

    /// Returns all valid session rows for a user (one per device lineage).
    #[must_use]
    pub fn valid_sessions(&self, user_id: &str) -> Vec<ServerSession> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().user_id == user_id && entry.value().is_valid)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn random_hex(len: usize) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut bytes = vec![0_u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(len * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
