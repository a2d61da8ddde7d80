//! Error classification, retry bookkeeping, and recovery strategies.
//!
//! [`ErrorManager`] wraps each failure into an [`EnhancedError`], logs it,
//! applies backoff-gated retry bookkeeping for transient codes, then
//! consults a per-code recovery-strategy table. A missing or failing
//! strategy yields a non-recovered outcome; nothing here ever panics the
//! caller.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{error, info, instrument, warn};

use crate::clock::epoch_ms;
use crate::error::{VaultError, codes};
use crate::transport::BackoffPolicy;

/// Retry-count entries are dropped this long after their last update.
const RETRY_COOLDOWN: Duration = Duration::from_secs(30);

/// Maximum bookkeeping-driven retry waves per (code, context) key.
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Severity classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Integrity/encryption failures. Surfaced, never retried.
    Critical,
    /// Structural data issues.
    Warning,
    /// Everything else.
    Info,
}

impl Severity {
    /// Lowercase label used in user-facing messages.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// A classified failure, created per error and consumed once.
#[derive(Debug, Clone)]
pub struct EnhancedError {
    /// Machine-readable code.
    pub code: String,
    /// Human-readable message from the original error.
    pub message: String,
    /// The operation that failed, e.g. `export` or `token_refresh`.
    pub context: String,
    /// Classified severity.
    pub severity: Severity,
    /// False only for security errors.
    pub recoverable: bool,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
}

/// What a recovery strategy reports back.
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    /// Whether the strategy considers the failure recovered.
    pub success: bool,
    /// Short action label, e.g. `reauthenticate`.
    pub action: String,
}

impl RecoveryOutcome {
    /// A non-recovered outcome with no action.
    #[must_use]
    pub fn none() -> Self {
        Self {
            success: false,
            action: "none".to_string(),
        }
    }
}

/// Result of [`ErrorManager::handle`].
#[derive(Debug, Clone)]
pub struct HandleOutcome {
    /// The manager processed the error.
    pub handled: bool,
    /// A recovery strategy reported success.
    pub recovered: bool,
    /// User-facing message: severity label plus the original message.
    pub message: String,
    /// Action taken: a strategy's action, `retry`, or `none`.
    pub action: String,
}

/// A pluggable recovery routine for one error code.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync {
    /// Attempts recovery. Errors inside a strategy must be expressed as a
    /// non-success outcome; panics are not caught.
    async fn recover(&self, error: &EnhancedError) -> RecoveryOutcome;
}

#[derive(Debug, Clone)]
struct RetryEntry {
    attempts: u32,
    last_seen: Instant,
}

/// Classifies failures and drives retry/recovery behavior.
pub struct ErrorManager {
    strategies: RwLock<HashMap<String, Arc<dyn RecoveryStrategy>>>,
    retries: DashMap<(String, String), RetryEntry>,
    backoff: BackoffPolicy,
}

impl std::fmt::Debug for ErrorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorManager")
            .field("backoff", &self.backoff)
            .field("tracked_keys", &self.retries.len())
            .finish_non_exhaustive()
    }
}

impl Default for ErrorManager {
    fn default() -> Self {
        Self::new(BackoffPolicy::default())
    }
}

impl ErrorManager {
    /// Creates a manager using the shared backoff policy for retry delays.
    #[must_use]
    pub fn new(backoff: BackoffPolicy) -> Self {
        Self {
            strategies: RwLock::new(HashMap::new()),
            retries: DashMap::new(),
            backoff,
        }
    }

    /// Registers (or replaces) the recovery strategy for an error code.
    pub fn register_strategy(&self, code: impl Into<String>, strategy: Arc<dyn RecoveryStrategy>) {
        if let Ok(mut strategies) = self.strategies.write() {
            strategies.insert(code.into(), strategy);
        }
    }

    /// Handles a failure: classify, log, retry-bookkeep, attempt recovery.
    ///
    /// For retry-eligible codes under the attempt ceiling, the call sleeps
    /// the backoff delay for the current attempt before consulting the
    /// strategy table, so callers re-running the failed operation after
    /// `handle` returns are naturally paced.
    #[instrument(level = "debug", skip(self, error), fields(context = context))]
    pub async fn handle(&self, error: &VaultError, context: &str) -> HandleOutcome {
        self.purge_stale_entries();

        let enhanced = Self::enhance(error, context);
        self.log(&enhanced);

        let mut action = "none".to_string();
        if Self::retry_eligible(&enhanced.code)
            && let Some(delay) = self.next_retry_delay(&enhanced)
        {
            info!(
                code = %enhanced.code,
                delay_ms = delay.as_millis(),
                "transient failure, pacing retry"
            );
            tokio::time::sleep(delay).await;
            action = "retry".to_string();
        }

        let recovery = self.attempt_recovery(&enhanced).await;

        HandleOutcome {
            handled: true,
            recovered: recovery.success,
            message: format!("{}: {}", enhanced.severity.label(), enhanced.message),
            action: if recovery.success {
                recovery.action
            } else {
                action
            },
        }
    }

    /// Classifies a raw error without handling it.
    #[must_use]
    pub fn enhance(error: &VaultError, context: &str) -> EnhancedError {
        let severity = match error {
            VaultError::Security(_) => Severity::Critical,
            VaultError::Validation(_) => Severity::Warning,
            _ => Severity::Info,
        };
        EnhancedError {
            code: error.code().to_string(),
            message: error.to_string(),
            context: context.to_string(),
            severity,
            recoverable: !matches!(error, VaultError::Security(_)),
            timestamp: epoch_ms(),
        }
    }

    fn retry_eligible(code: &str) -> bool {
        matches!(
            code,
            codes::NETWORK_ERROR | codes::TIMEOUT_ERROR | codes::TEMPORARY_FAILURE
        )
    }

    // Bumps the (code, context) attempt counter; None once the ceiling is
    // reached.
    fn next_retry_delay(&self, error: &EnhancedError) -> Option<Duration> {
        let key = (error.code.clone(), error.context.clone());
        let mut entry = self.retries.entry(key).or_insert(RetryEntry {
            attempts: 0,
            last_seen: Instant::now(),
        });
        if entry.attempts >= MAX_RETRY_ATTEMPTS {
            return None;
        }
        let delay = self.backoff.delay(entry.attempts);
        entry.attempts += 1;
        entry.last_seen = Instant::now();
        Some(delay)
    }

    async fn attempt_recovery(&self, error: &EnhancedError) -> RecoveryOutcome {
        if !error.recoverable {
            return RecoveryOutcome::none();
        }
        let strategy = self
            .strategies
            .read()
            .ok()
            .and_then(|strategies| strategies.get(&error.code).cloned());
        match strategy {
            Some(strategy) => strategy.recover(error).await,
            None => RecoveryOutcome::none(),
        }
    }

    fn log(&self, error: &EnhancedError) {
        match error.severity {
            Severity::Critical => error!(
                code = %error.code,
                context = %error.context,
                message = %error.message,
                "critical failure"
            ),
            Severity::Warning => warn!(
                code = %error.code,
                context = %error.context,
                message = %error.message,
                "failure"
            ),
            Severity::Info => info!(
                code = %error.code,
                context = %error.context,
                message = %error.message,
                "failure"
            ),
        }
    }

    // Clears retry entries past the cooldown window, bounding memory.
    fn purge_stale_entries(&self) {
        self.retries
            .retain(|_, entry| entry.last_seen.elapsed() < RETRY_COOLDOWN);
    }

    /// Number of (code, context) keys currently tracked.
    #[must_use]
    pub fn tracked_retry_keys(&self) -> usize {
        self.retries.len()
    }
}
