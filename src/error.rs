//! Crate-wide error umbrella.
//!
//! Individual modules raise their own typed errors; [`VaultError`] is the
//! taxonomy the orchestration layer and [`ErrorManager`](crate::failure)
//! classify over. The HTTP status mapping preserved here is the boundary
//! contract: 401 auth, 400 validation, 503 offline, 504 timeout, 500
//! unknown.

use thiserror::Error;

use crate::cookie::{CookieStoreError, SecurityError, ValidationError};
use crate::session::{AuthError, StoreError};
use crate::transport::FetchError;

/// Machine-readable error codes used across the crate.
pub mod codes {
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";
    pub const TEMPORARY_FAILURE: &str = "TEMPORARY_FAILURE";
    pub const NETWORK_OFFLINE: &str = "NETWORK_OFFLINE";
    pub const HTTP_ERROR: &str = "HTTP_ERROR";
    pub const SECURITY_ERROR: &str = "SECURITY_ERROR";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const COOKIE_STORE_ERROR: &str = "COOKIE_STORE_ERROR";
}

/// Any failure the vault can surface.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Structural cookie/data issue. Recoverable.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Integrity/encryption failure. Never recoverable, never retried.
    #[error(transparent)]
    Security(#[from] SecurityError),

    /// Credential/session issue with a machine code and HTTP status.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Transport failure (network, timeout, offline, HTTP status).
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Key-value persistence failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Browser cookie-store collaborator failure.
    #[error(transparent)]
    CookieStore(#[from] CookieStoreError),
}

impl VaultError {
    /// Machine-readable code for classification and retry bookkeeping.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Validation(_) => codes::VALIDATION_ERROR,
            Self::Security(_) => codes::SECURITY_ERROR,
            Self::Auth(error) => error.code(),
            Self::Fetch(error) => match error {
                FetchError::Network { .. } => codes::NETWORK_ERROR,
                FetchError::Timeout { .. } => codes::TIMEOUT_ERROR,
                FetchError::Offline { .. } => codes::NETWORK_OFFLINE,
                FetchError::Status { status, .. } if *status >= 500 => codes::TEMPORARY_FAILURE,
                FetchError::Status { .. } => codes::HTTP_ERROR,
                FetchError::Unauthorized { .. } => "SESSION_EXPIRED",
            },
            Self::Store(_) => codes::STORAGE_ERROR,
            Self::CookieStore(_) => codes::COOKIE_STORE_ERROR,
        }
    }

    /// HTTP status this error maps to at an API boundary.
    #[must_use]
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Security(_) => 500,
            Self::Auth(error) => error.status(),
            Self::Fetch(error) => error.status_code(),
            Self::Store(_) | Self::CookieStore(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        let err: VaultError = SecurityError::IntegrityCheckFailed.into();
        assert_eq!(err.code(), codes::SECURITY_ERROR);

        let err: VaultError = FetchError::Timeout {
            url: "u".to_string(),
        }
        .into();
        assert_eq!(err.code(), codes::TIMEOUT_ERROR);

        let err: VaultError = FetchError::Status {
            url: "u".to_string(),
            status: 502,
            code: None,
            message: None,
        }
        .into();
        assert_eq!(err.code(), codes::TEMPORARY_FAILURE);
    }

    #[test]
    fn test_status_taxonomy_preserved() {
        let validation: VaultError = ValidationError::Internal {
            name: "c".to_string(),
            reason: "r".to_string(),
        }
        .into();
        assert_eq!(validation.status(), 400);

        let offline: VaultError = FetchError::Offline {
            url: "u".to_string(),
        }
        .into();
        assert_eq!(offline.status(), 503);

        let timeout: VaultError = FetchError::Timeout {
            url: "u".to_string(),
        }
        .into();
        assert_eq!(timeout.status(), 504);

        let auth: VaultError = AuthError::NoSession.into();
        assert_eq!(auth.status(), 401);
    }
}
