//! Cookie records, validation, and authenticated encryption.
//!
//! This module provides the cookie side of the vault: the [`CookieRecord`]
//! type and store collaborator, the [`CookieValidator`] rules, the
//! [`CookieCipher`] encrypt-then-MAC pipeline, master key custody, and a
//! Netscape `cookies.txt` bridge for the CLI.

mod cipher;
mod master_key;
mod netscape;
mod record;
mod validator;

pub use cipher::{CookieCipher, EncryptedPayload, PAYLOAD_VERSION, SecurityError};
pub use master_key::{KeyError, delete_master_key, resolve_master_key};
pub use netscape::{
    NetscapeError, NetscapeParseResult, parse_netscape_cookies, serialize_netscape_cookies,
};
pub use record::{
    CookieFilter, CookieRecord, CookieStore, CookieStoreError, MemoryCookieStore, SameSite,
};
pub use validator::{
    CookieValidator, ValidationError, ValidationFinding, ValidationReport, codes,
};
