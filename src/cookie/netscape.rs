//! Netscape cookie file parsing and serialization.
//!
//! Bridges browser-exported `cookies.txt` files (7 TAB-separated fields per
//! line) to [`CookieRecord`]s for the CLI. The curl/browser convention of
//! prefixing a line with `#HttpOnly_` marks HttpOnly cookies and is honored
//! in both directions; SameSite is not representable in this format.

use std::fmt::Write as _;
use std::io::BufRead;

use tracing::{debug, instrument, warn};

use super::record::CookieRecord;

const HTTPONLY_PREFIX: &str = "#HttpOnly_";

/// Errors that can occur while parsing a cookie file.
#[derive(Debug, thiserror::Error)]
pub enum NetscapeError {
    /// A line in the cookie file has an invalid format.
    #[error("line {line_number}: {reason} (got: {content})")]
    InvalidLine {
        /// 1-based line number in the cookie file.
        line_number: usize,
        /// The offending line content (value redacted).
        content: String,
        /// Description of what was wrong.
        reason: String,
    },

    /// I/O error reading the cookie file.
    #[error("failed to read cookie file: {0}")]
    Io(#[from] std::io::Error),

    /// No valid cookies found in a non-empty file.
    #[error("no valid cookies found in file ({malformed_count} lines failed to parse)")]
    NoCookiesFound {
        /// Number of malformed lines encountered.
        malformed_count: usize,
    },
}

/// Result of parsing a cookie file: parsed cookies plus warnings for
/// malformed lines (partial success).
#[derive(Debug)]
pub struct NetscapeParseResult {
    /// Successfully parsed cookies.
    pub cookies: Vec<CookieRecord>,
    /// Warnings for malformed lines (line number and reason).
    pub warnings: Vec<(usize, String)>,
}

/// Parses a Netscape-format cookie file from a buffered reader.
///
/// Each non-comment, non-blank line must contain exactly 7 TAB-separated
/// fields: `domain`, `tailmatch`, `path`, `secure`, `expires`, `name`,
/// `value`. Lines starting with `#` are skipped unless they carry the
/// `#HttpOnly_` prefix, which is treated as a data line with the HttpOnly
/// flag set.
///
/// # Errors
///
/// Returns [`NetscapeError::Io`] on read failure, or
/// [`NetscapeError::NoCookiesFound`] when a non-empty file yields zero valid
/// cookies. Individual malformed lines are collected as warnings.
#[instrument(level = "debug", skip(reader))]
pub fn parse_netscape_cookies(
    reader: impl BufRead,
) -> Result<NetscapeParseResult, NetscapeError> {
    let mut cookies = Vec::new();
    let mut warnings = Vec::new();
    let mut non_blank_lines = 0;

    for (idx, line_result) in reader.lines().enumerate() {
        let line_number = idx + 1;
        let line = line_result?;
        // Handle CRLF: strip trailing \r
        let line = line.trim_end();

        if line.is_empty() {
            continue;
        }

        let (line, http_only) = match line.strip_prefix(HTTPONLY_PREFIX) {
            Some(rest) => (rest, true),
            None if line.starts_with('#') => continue,
            None => (line, false),
        };

        non_blank_lines += 1;

        match parse_cookie_line(line, http_only, line_number) {
            Ok(cookie) => {
                debug!(
                    line = line_number,
                    domain = %cookie.domain,
                    name = %cookie.name,
                    "parsed cookie"
                );
                cookies.push(cookie);
            }
            Err(e) => {
                warn!(line = line_number, reason = %e, "skipping malformed cookie line");
                warnings.push((line_number, e.to_string()));
            }
        }
    }

    if cookies.is_empty() && non_blank_lines > 0 {
        return Err(NetscapeError::NoCookiesFound {
            malformed_count: warnings.len(),
        });
    }

    Ok(NetscapeParseResult { cookies, warnings })
}

/// Serializes cookies back into Netscape file format.
///
/// HttpOnly cookies get the `#HttpOnly_` line prefix. Session cookies
/// (no expiry) are written with an expires field of 0.
#[must_use]
pub fn serialize_netscape_cookies(cookies: &[CookieRecord]) -> String {
    let mut out = String::from("# Netscape HTTP Cookie File\n");
    for cookie in cookies {
        if cookie.http_only {
            out.push_str(HTTPONLY_PREFIX);
        }
        let tailmatch = if cookie.domain.starts_with('.') {
            "TRUE"
        } else {
            "FALSE"
        };
        let secure = if cookie.secure { "TRUE" } else { "FALSE" };
        let expires = cookie.expiration_date.unwrap_or(0);
        let _ = writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            cookie.domain,
            tailmatch,
            cookie.path,
            secure,
            expires,
            cookie.name,
            cookie.value()
        );
    }
    out
}

fn parse_cookie_line(
    line: &str,
    http_only: bool,
    line_number: usize,
) -> Result<CookieRecord, NetscapeError> {
    let fields: Vec<&str> = line.split('\t').collect();

    if fields.len() != 7 {
        return Err(NetscapeError::InvalidLine {
            line_number,
            content: redact_line_for_error(line),
            reason: format!("expected 7 TAB-separated fields, found {}", fields.len()),
        });
    }

    let domain = fields[0].to_string();
    // The tailmatch field must still be well-formed even though the leading
    // dot on the domain is what actually drives matching.
    parse_bool_field(fields[1], "tailmatch", line_number, line)?;
    let path = fields[2].to_string();
    let secure = parse_bool_field(fields[3], "secure", line_number, line)?;

    let expires = fields[4]
        .parse::<u64>()
        .map_err(|_| NetscapeError::InvalidLine {
            line_number,
            content: redact_line_for_error(line),
            reason: format!(
                "expires field must be a non-negative integer, got '{}'",
                fields[4]
            ),
        })?;

    let name = fields[5].to_string();
    let value = fields[6].to_string();

    if domain.is_empty() {
        return Err(NetscapeError::InvalidLine {
            line_number,
            content: redact_line_for_error(line),
            reason: "domain field is empty".to_string(),
        });
    }

    if name.is_empty() {
        return Err(NetscapeError::InvalidLine {
            line_number,
            content: redact_line_for_error(line),
            reason: "cookie name field is empty".to_string(),
        });
    }

    Ok(CookieRecord::new(
        name,
        value,
        domain,
        path,
        secure,
        http_only,
        None,
        (expires > 0).then_some(expires),
    ))
}

/// Parses a `TRUE`/`FALSE` string field.
fn parse_bool_field(
    value: &str,
    field_name: &str,
    line_number: usize,
    line: &str,
) -> Result<bool, NetscapeError> {
    match value {
        "TRUE" => Ok(true),
        "FALSE" => Ok(false),
        _ => Err(NetscapeError::InvalidLine {
            line_number,
            content: redact_line_for_error(line),
            reason: format!("{field_name} field must be TRUE or FALSE, got '{value}'"),
        }),
    }
}

/// Redacts cookie value (7th field) from a line for safe error messages.
fn redact_line_for_error(line: &str) -> String {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() >= 7 {
        let mut redacted = fields[..6].join("\t");
        redacted.push_str("\t[REDACTED]");
        redacted
    } else {
        // Not enough fields to identify value — show as-is (no value present)
        line.to_string()
    }
}
