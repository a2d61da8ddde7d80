//! Export/import orchestration: cookie store → validate → encrypt and back.
//!
//! Both directions are gated on an authenticated session. Invalid cookies
//! are dropped (counted, not fatal); per-cookie store failures on import are
//! likewise counted. Every failure goes through the [`ErrorManager`] before
//! being surfaced.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::clock::epoch_ms;
use crate::cookie::{
    CookieCipher, CookieFilter, CookieRecord, CookieStore, CookieValidator, EncryptedPayload,
};
use crate::error::VaultError;
use crate::failure::ErrorManager;
use crate::session::{AuthError, SessionManager};

/// Result of [`CookieVault::export_cookies`].
#[derive(Debug)]
pub struct ExportOutcome {
    /// The encrypted batch of valid cookies.
    pub payload: EncryptedPayload,
    /// Cookies read from the store.
    pub total: usize,
    /// Cookies that passed validation and were encrypted.
    pub valid: usize,
    /// Completion time, epoch milliseconds.
    pub timestamp: i64,
}

/// Result of [`CookieVault::import_cookies`].
#[derive(Debug)]
pub struct ImportOutcome {
    /// At least one cookie made it into the store.
    pub success: bool,
    /// Cookies decrypted from the payload.
    pub total: usize,
    /// Cookies that passed validation.
    pub valid: usize,
    /// Cookies actually written to the store.
    pub imported: usize,
    /// Completion time, epoch milliseconds.
    pub timestamp: i64,
}

/// Orchestrates the validate → encrypt pipeline over the cookie store.
pub struct CookieVault {
    cipher: CookieCipher,
    validator: CookieValidator,
    session: SessionManager,
    cookies: Arc<dyn CookieStore>,
    errors: Arc<ErrorManager>,
}

impl std::fmt::Debug for CookieVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieVault").finish_non_exhaustive()
    }
}

impl CookieVault {
    /// Creates a vault over the given collaborators.
    #[must_use]
    pub fn new(
        cipher: CookieCipher,
        session: SessionManager,
        cookies: Arc<dyn CookieStore>,
        errors: Arc<ErrorManager>,
    ) -> Self {
        Self {
            cipher,
            validator: CookieValidator::new(),
            session,
            cookies,
            errors,
        }
    }

    /// Exports a domain's cookies as an encrypted payload.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError`] when no session is active, the cookie store
    /// fails, or encryption fails. Invalid cookies are excluded, not fatal.
    #[instrument(skip(self), fields(domain = domain))]
    pub async fn export_cookies(&self, domain: &str) -> Result<ExportOutcome, VaultError> {
        match self.export_inner(domain).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.errors.handle(&error, "export").await;
                Err(error)
            }
        }
    }

    async fn export_inner(&self, domain: &str) -> Result<ExportOutcome, VaultError> {
        self.require_session().await?;

        let cookies = self
            .cookies
            .get_all(&CookieFilter::domain(domain))
            .await?;
        let total = cookies.len();

        let valid_cookies = self.filter_valid(cookies)?;
        let valid = valid_cookies.len();
        debug!(total, valid, "validated cookies for export");

        let payload = self.cipher.encrypt(&valid_cookies)?;
        Ok(ExportOutcome {
            payload,
            total,
            valid,
            timestamp: epoch_ms(),
        })
    }

    /// Imports an encrypted payload back into the cookie store.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError`] when no session is active or decryption fails
    /// (tampered, stale, or wrong-key payloads never reach the store).
    /// Per-cookie store rejections are counted, not fatal.
    #[instrument(skip(self, payload))]
    pub async fn import_cookies(
        &self,
        payload: &EncryptedPayload,
    ) -> Result<ImportOutcome, VaultError> {
        match self.import_inner(payload).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                self.errors.handle(&error, "import").await;
                Err(error)
            }
        }
    }

    async fn import_inner(&self, payload: &EncryptedPayload) -> Result<ImportOutcome, VaultError> {
        self.require_session().await?;

        let cookies = self.cipher.decrypt(payload)?;
        let total = cookies.len();

        let valid_cookies = self.filter_valid(cookies)?;
        let valid = valid_cookies.len();

        let mut imported = 0_usize;
        for cookie in valid_cookies {
            let name = cookie.name.clone();
            match self.cookies.set(cookie).await {
                Ok(()) => imported += 1,
                Err(error) => {
                    warn!(cookie = %name, %error, "cookie store rejected import");
                }
            }
        }
        debug!(total, valid, imported, "imported cookies");

        Ok(ImportOutcome {
            success: imported > 0,
            total,
            valid,
            imported,
            timestamp: epoch_ms(),
        })
    }

    async fn require_session(&self) -> Result<(), VaultError> {
        if self.session.is_authenticated().await {
            Ok(())
        } else {
            Err(AuthError::NoSession.into())
        }
    }

    // Validation is all-rules-per-cookie; cookies with blocking errors are
    // dropped, warnings ride along in logs only.
    fn filter_valid(&self, cookies: Vec<CookieRecord>) -> Result<Vec<CookieRecord>, VaultError> {
        let mut valid = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let report = self.validator.validate(&cookie)?;
            if report.is_valid {
                if !report.warnings.is_empty() {
                    debug!(
                        cookie = %cookie.name,
                        warnings = report.warnings.len(),
                        "cookie has advisory findings"
                    );
                }
                valid.push(cookie);
            } else {
                warn!(
                    cookie = %cookie.name,
                    errors = report.errors.len(),
                    "dropping invalid cookie"
                );
            }
        }
        Ok(valid)
    }
}
