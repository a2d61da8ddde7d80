//! Device fingerprinting for session binding.
//!
//! A fingerprint hashes to a stable device id, so repeated logins from the
//! same client map to one device row server-side and can be revoked together.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Raw device characteristics sent with login/refresh requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFingerprint {
    /// Client user agent string.
    pub user_agent: String,
    /// Operating system / platform identifier.
    pub platform: String,
    /// Preferred language, e.g. `en-US`.
    pub language: String,
}

impl DeviceFingerprint {
    /// Creates a fingerprint from explicit characteristics.
    #[must_use]
    pub fn new(
        user_agent: impl Into<String>,
        platform: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            user_agent: user_agent.into(),
            platform: platform.into(),
            language: language.into(),
        }
    }

    /// Detects a fingerprint for the current process environment.
    ///
    /// Language falls back to `en-US` when no locale variable is set.
    #[must_use]
    pub fn detect() -> Self {
        let language = std::env::var("LC_ALL")
            .or_else(|_| std::env::var("LANG"))
            .ok()
            .and_then(|locale| {
                let trimmed = locale.split('.').next().unwrap_or("").replace('_', "-");
                (!trimmed.is_empty()).then_some(trimmed)
            })
            .unwrap_or_else(|| "en-US".to_string());

        Self {
            user_agent: format!("cookievault/{}", env!("CARGO_PKG_VERSION")),
            platform: std::env::consts::OS.to_string(),
            language,
        }
    }

    /// Derives the stable device id: SHA-256 over the joined characteristics.
    ///
    /// The same physical client always maps to the same id.
    #[must_use]
    pub fn device_id(&self) -> String {
        let joined = [
            self.user_agent.as_str(),
            self.platform.as_str(),
            self.language.as_str(),
        ]
        .join("|");
        let digest = Sha256::digest(joined.as_bytes());
        digest.iter().fold(
            String::with_capacity(digest.len() * 2),
            |mut out, byte| {
                use std::fmt::Write as _;
                let _ = write!(out, "{byte:02x}");
                out
            },
        )
    }

    /// Human-readable default name, e.g. `Firefox on linux`.
    #[must_use]
    pub fn display_name(&self) -> String {
        format!("{} on {}", browser_name(&self.user_agent), self.platform)
    }

    /// JSON encoding for the `x-device-info` request header.
    #[must_use]
    pub fn header_value(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn browser_name(user_agent: &str) -> &str {
    if user_agent.contains("Firefox") {
        "Firefox"
    } else if user_agent.contains("Edge") {
        "Edge"
    } else if user_agent.contains("Opera") {
        "Opera"
    } else if user_agent.contains("Chrome") {
        "Chrome"
    } else if user_agent.contains("Safari") {
        "Safari"
    } else if user_agent.starts_with("cookievault/") {
        "cookievault"
    } else {
        "Unknown Browser"
    }
}
