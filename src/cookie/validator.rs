//! Structural and security validation of individual cookies.
//!
//! Every rule is evaluated independently — validation never short-circuits,
//! so a report lists everything wrong with a cookie at once. Errors block
//! export/import; warnings are advisory security hygiene only.

use std::sync::LazyLock;

use regex::Regex;
use tracing::instrument;

use super::record::{CookieRecord, SameSite};

/// Maximum recommended cookie value length in bytes.
const MAX_VALUE_LENGTH: usize = 4096;

// Conservative domain shape: one or more alphanumeric labels (hyphens
// allowed inside), a 2+ character alphabetic TLD, optional leading dot.
#[allow(clippy::expect_used)]
static DOMAIN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\.?([a-zA-Z0-9]([a-zA-Z0-9-]*[a-zA-Z0-9])?\.)+[a-zA-Z]{2,}$")
        .expect("domain pattern is a valid regex")
});

// Injection markers that must never appear in a cookie value: script tags,
// script-capable URL schemes, inline event handlers, and the URL-encoded
// form of an opening script tag.
#[allow(clippy::expect_used)]
static SUSPICIOUS_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)<script",
        r"(?i)javascript:",
        r"(?i)data:",
        r"(?i)vbscript:",
        r"(?i)on(click|error|load)\s*=",
        r"(?i)%3Cscript",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("suspicious-content pattern is a valid regex"))
    .collect()
});

/// Machine-readable codes for validation findings.
pub mod codes {
    pub const MISSING_REQUIRED_FIELD: &str = "MISSING_REQUIRED_FIELD";
    pub const INVALID_DOMAIN_FORMAT: &str = "INVALID_DOMAIN_FORMAT";
    pub const INVALID_PATH_FORMAT: &str = "INVALID_PATH_FORMAT";
    pub const SUSPICIOUS_CONTENT: &str = "SUSPICIOUS_CONTENT";
    pub const VALUE_TOO_LONG: &str = "VALUE_TOO_LONG";
    pub const MISSING_SECURE_FLAG: &str = "MISSING_SECURE_FLAG";
    pub const MISSING_HTTPONLY_FLAG: &str = "MISSING_HTTPONLY_FLAG";
    pub const WEAK_SAME_SITE: &str = "WEAK_SAME_SITE";
}

/// A single validation finding (blocking error or advisory warning).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFinding {
    /// The cookie field the finding refers to.
    pub field: &'static str,
    /// Machine-readable finding code (see [`codes`]).
    pub code: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl ValidationFinding {
    fn new(field: &'static str, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            code,
            message: message.into(),
        }
    }
}

/// Outcome of validating one cookie.
///
/// `is_valid` reflects errors only; warnings never block. Structural and
/// injection issues are errors, security hygiene issues are warnings.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// True when no blocking errors were found.
    pub is_valid: bool,
    /// Blocking findings.
    pub errors: Vec<ValidationFinding>,
    /// Advisory findings.
    pub warnings: Vec<ValidationFinding>,
}

/// Internal validator failure (never raised for merely malformed cookies).
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The validator itself failed while evaluating a rule.
    #[error("validation failed for cookie '{name}': {reason}")]
    Internal {
        /// Name of the cookie under validation.
        name: String,
        /// What went wrong inside the validator.
        reason: String,
    },
}

/// Validates cookies against structural and security rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieValidator;

impl CookieValidator {
    /// Creates a validator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Validates a single cookie, evaluating every rule.
    ///
    /// Malformed input yields findings, never an `Err`; the error path is
    /// reserved for internal validator failures.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::Internal`] only when rule evaluation itself
    /// fails.
    #[instrument(level = "debug", skip(self, cookie), fields(name = %cookie.name))]
    pub fn validate(&self, cookie: &CookieRecord) -> Result<ValidationReport, ValidationError> {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        Self::check_required_fields(cookie, &mut errors);
        Self::check_domain(cookie, &mut errors);
        Self::check_path(cookie, &mut errors);
        Self::check_value_length(cookie, &mut warnings);
        Self::check_suspicious_content(cookie, &mut errors);
        Self::check_security_flags(cookie, &mut warnings);

        Ok(ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
        })
    }

    fn check_required_fields(cookie: &CookieRecord, errors: &mut Vec<ValidationFinding>) {
        let fields: [(&'static str, &str); 4] = [
            ("domain", &cookie.domain),
            ("name", &cookie.name),
            ("value", cookie.value()),
            ("path", &cookie.path),
        ];
        for (field, value) in fields {
            if value.is_empty() {
                errors.push(ValidationFinding::new(
                    field,
                    codes::MISSING_REQUIRED_FIELD,
                    format!("Missing required field: {field}"),
                ));
            }
        }
    }

    fn check_domain(cookie: &CookieRecord, errors: &mut Vec<ValidationFinding>) {
        if !cookie.domain.is_empty() && !DOMAIN_PATTERN.is_match(&cookie.domain) {
            errors.push(ValidationFinding::new(
                "domain",
                codes::INVALID_DOMAIN_FORMAT,
                "Invalid domain format",
            ));
        }
    }

    fn check_path(cookie: &CookieRecord, errors: &mut Vec<ValidationFinding>) {
        if !cookie.path.is_empty() && !cookie.path.starts_with('/') {
            errors.push(ValidationFinding::new(
                "path",
                codes::INVALID_PATH_FORMAT,
                "Path must start with /",
            ));
        }
    }

    fn check_value_length(cookie: &CookieRecord, warnings: &mut Vec<ValidationFinding>) {
        if cookie.value().len() > MAX_VALUE_LENGTH {
            warnings.push(ValidationFinding::new(
                "value",
                codes::VALUE_TOO_LONG,
                format!(
                    "Cookie value ({} bytes) exceeds recommended length of {MAX_VALUE_LENGTH}",
                    cookie.value().len()
                ),
            ));
        }
    }

    fn check_suspicious_content(cookie: &CookieRecord, errors: &mut Vec<ValidationFinding>) {
        let suspicious = SUSPICIOUS_PATTERNS
            .iter()
            .any(|pattern| pattern.is_match(cookie.value()));
        if suspicious {
            errors.push(ValidationFinding::new(
                "value",
                codes::SUSPICIOUS_CONTENT,
                "Cookie value contains suspicious content",
            ));
        }
    }

    fn check_security_flags(cookie: &CookieRecord, warnings: &mut Vec<ValidationFinding>) {
        if cookie.domain.contains("https://") && !cookie.secure {
            warnings.push(ValidationFinding::new(
                "secure",
                codes::MISSING_SECURE_FLAG,
                "Secure flag recommended for HTTPS domains",
            ));
        }
        if !cookie.http_only {
            warnings.push(ValidationFinding::new(
                "http_only",
                codes::MISSING_HTTPONLY_FLAG,
                "HttpOnly flag recommended for security",
            ));
        }
        if cookie.same_site.is_none() || cookie.same_site == Some(SameSite::None) {
            warnings.push(ValidationFinding::new(
                "same_site",
                codes::WEAK_SAME_SITE,
                "Consider using a strict SameSite policy",
            ));
        }
    }
}
