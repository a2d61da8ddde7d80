//! Cookie record type and the browser cookie-store collaborator trait.
//!
//! [`CookieRecord`] mirrors the shape a browser cookie store exposes. The
//! store itself is an external capability behind [`CookieStore`]; an
//! in-memory implementation is provided for tests and for the CLI, which
//! stages cookies from a file before export.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// SameSite policy attached to a cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// A single browser cookie.
///
/// The value field is intentionally redacted in Debug output to prevent
/// accidental logging of sensitive cookie data.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieRecord {
    /// Cookie name.
    pub name: String,
    /// Cookie value (sensitive — never log).
    value: String,
    /// The domain the cookie belongs to (e.g., `.example.com`).
    pub domain: String,
    /// The URL path scope for the cookie.
    pub path: String,
    /// Whether the cookie should only be sent over HTTPS.
    pub secure: bool,
    /// Whether the cookie is hidden from page scripts.
    pub http_only: bool,
    /// SameSite policy, when the browser reported one.
    pub same_site: Option<SameSite>,
    /// Unix timestamp (seconds) for expiry; `None` for session cookies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<u64>,
}

impl CookieRecord {
    /// Creates a new cookie record.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: String,
        value: String,
        domain: String,
        path: String,
        secure: bool,
        http_only: bool,
        same_site: Option<SameSite>,
        expiration_date: Option<u64>,
    ) -> Self {
        Self {
            name,
            value,
            domain,
            path,
            secure,
            http_only,
            same_site,
            expiration_date,
        }
    }

    /// Returns the cookie value.
    ///
    /// Cookie values are sensitive — avoid logging the return value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

// Custom Debug impl that redacts the cookie value.
impl fmt::Debug for CookieRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CookieRecord")
            .field("name", &self.name)
            .field("value", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("path", &self.path)
            .field("secure", &self.secure)
            .field("http_only", &self.http_only)
            .field("same_site", &self.same_site)
            .field("expiration_date", &self.expiration_date)
            .finish()
    }
}

/// Filter for [`CookieStore::get_all`].
///
/// A `domain` filter matches the domain itself and any of its subdomains,
/// mirroring how browser cookie APIs interpret a domain filter.
#[derive(Debug, Clone, Default)]
pub struct CookieFilter {
    /// Restrict results to this domain and its subdomains.
    pub domain: Option<String>,
}

impl CookieFilter {
    /// Creates a filter matching a domain and its subdomains.
    #[must_use]
    pub fn domain(domain: impl Into<String>) -> Self {
        Self {
            domain: Some(domain.into()),
        }
    }

    /// Returns true when `cookie_domain` is covered by this filter.
    #[must_use]
    pub fn matches(&self, cookie_domain: &str) -> bool {
        let Some(wanted) = &self.domain else {
            return true;
        };
        let wanted = wanted.trim_start_matches('.');
        let candidate = cookie_domain.trim_start_matches('.');
        candidate == wanted || candidate.ends_with(&format!(".{wanted}"))
    }
}

/// Errors raised by a cookie store implementation.
#[derive(Debug, thiserror::Error)]
pub enum CookieStoreError {
    /// The underlying store rejected the cookie.
    #[error("cookie store rejected '{name}': {reason}")]
    Rejected {
        /// Name of the rejected cookie.
        name: String,
        /// Store-provided reason.
        reason: String,
    },

    /// The store itself is unavailable.
    #[error("cookie store unavailable: {0}")]
    Unavailable(String),
}

/// External browser cookie-store capability.
///
/// The browser-provided store is trusted; implementations only surface
/// transport/shape failures, never validate content (that is
/// [`CookieValidator`](super::CookieValidator)'s job).
#[async_trait]
pub trait CookieStore: Send + Sync {
    /// Returns all cookies matching the filter.
    async fn get_all(&self, filter: &CookieFilter) -> Result<Vec<CookieRecord>, CookieStoreError>;

    /// Writes a cookie into the store, replacing any cookie with the same
    /// (domain, path, name) identity.
    async fn set(&self, cookie: CookieRecord) -> Result<(), CookieStoreError>;
}

/// In-memory cookie store keyed by (domain, path, name).
#[derive(Debug, Default)]
pub struct MemoryCookieStore {
    cookies: DashMap<(String, String, String), CookieRecord>,
}

impl MemoryCookieStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-seeded with the given cookies, shared-ownership ready.
    #[must_use]
    pub fn with_cookies(cookies: Vec<CookieRecord>) -> Arc<Self> {
        let store = Self::new();
        for cookie in cookies {
            store.insert(cookie);
        }
        Arc::new(store)
    }

    fn insert(&self, cookie: CookieRecord) {
        let key = (
            cookie.domain.clone(),
            cookie.path.clone(),
            cookie.name.clone(),
        );
        self.cookies.insert(key, cookie);
    }

    /// Returns a snapshot of every cookie currently held.
    #[must_use]
    pub fn snapshot(&self) -> Vec<CookieRecord> {
        self.cookies.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of cookies currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    /// True when the store holds no cookies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

#[async_trait]
impl CookieStore for MemoryCookieStore {
    async fn get_all(&self, filter: &CookieFilter) -> Result<Vec<CookieRecord>, CookieStoreError> {
        Ok(self
            .cookies
            .iter()
            .filter(|entry| filter.matches(&entry.value().domain))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn set(&self, cookie: CookieRecord) -> Result<(), CookieStoreError> {
        self.insert(cookie);
        Ok(())
    }
}
