//! Cookievault Core Library
//!
//! This library provides the core functionality for the cookievault tool:
//! a session-gated browser cookie vault that exports and imports cookies
//! through a validate-then-encrypt pipeline.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`cookie`] - Cookie records, validation, authenticated encryption
//! - [`session`] - Token session lifecycle, device binding, backend registry
//! - [`transport`] - Resilient HTTP execution with backoff and jitter
//! - [`failure`] - Error classification, retry bookkeeping, recovery
//! - [`vault`] - Export/import orchestration over the cookie store

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cookie;
pub mod error;
pub mod failure;
pub mod session;
pub mod transport;
pub mod vault;

pub(crate) mod clock;

// Re-export commonly used types
pub use cookie::{
    CookieCipher, CookieFilter, CookieRecord, CookieStore, CookieValidator, EncryptedPayload,
    MemoryCookieStore, SameSite, SecurityError, ValidationReport,
};
pub use error::VaultError;
pub use failure::{
    EnhancedError, ErrorManager, HandleOutcome, RecoveryOutcome, RecoveryStrategy, Severity,
};
pub use session::{
    AuthError, AuthEvent, DeviceFingerprint, FileStore, KeyValueStore, MemoryStore, Session,
    SessionConfig, SessionManager, SessionRegistry, SessionUser, TokenStore,
};
pub use transport::{ApiRequest, BackoffPolicy, Connectivity, FetchError, ResilientFetch};
pub use vault::{CookieVault, ExportOutcome, ImportOutcome};
