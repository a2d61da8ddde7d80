//! Master key custody for the cookie cipher.
//!
//! Resolution order: the `COOKIEVAULT_MASTER_KEY` environment variable wins;
//! otherwise a key is read from (or generated into) the OS keychain. The
//! keychain calls are wrapped in `catch_unwind` because some sandboxed
//! environments panic inside platform credential APIs.

use std::env;
use std::panic::{AssertUnwindSafe, catch_unwind};

use rand::RngCore;

const MASTER_KEY_ENV: &str = "COOKIEVAULT_MASTER_KEY";
const KEYRING_SERVICE: &str = "cookievault";
const KEYRING_ENTRY_NAME: &str = "payload-master-key-v1";
const KEY_LEN: usize = 32;

/// Errors for master key resolution.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// Could not access keychain and no env fallback key was provided.
    #[error(
        "unable to access system keychain for the payload master key; set COOKIEVAULT_MASTER_KEY or configure keychain access"
    )]
    KeychainUnavailable,
}

/// Resolves the master key material for [`CookieCipher`](super::CookieCipher).
///
/// # Errors
///
/// Returns [`KeyError::KeychainUnavailable`] when neither the environment
/// variable nor the keychain yields usable key material.
pub fn resolve_master_key() -> Result<String, KeyError> {
    if let Some(from_env) = env::var_os(MASTER_KEY_ENV) {
        let key = from_env.to_string_lossy().trim().to_string();
        if !key.is_empty() {
            return Ok(key);
        }
    }

    let entry = safe_keyring_entry()?;

    match safe_keyring_get_password(&entry) {
        Ok(existing) if !existing.trim().is_empty() => Ok(existing),
        _ => {
            let generated = generate_key_material();
            safe_keyring_set_password(&entry, &generated)?;
            Ok(generated)
        }
    }
}

/// Removes the keychain-held master key, if any.
///
/// Best effort: returns `Ok(())` even when no entry existed. The env-var
/// override, when set, is untouched.
///
/// # Errors
///
/// Returns [`KeyError::KeychainUnavailable`] when the keychain cannot be
/// reached at all.
pub fn delete_master_key() -> Result<(), KeyError> {
    let entry = safe_keyring_entry()?;
    let _ = safe_keyring_delete_credential(&entry);
    Ok(())
}

fn safe_keyring_entry() -> Result<keyring::Entry, KeyError> {
    catch_unwind(|| keyring::Entry::new(KEYRING_SERVICE, KEYRING_ENTRY_NAME))
        .map_err(|_| KeyError::KeychainUnavailable)?
        .map_err(|_| KeyError::KeychainUnavailable)
}

fn safe_keyring_get_password(entry: &keyring::Entry) -> Result<String, KeyError> {
    catch_unwind(AssertUnwindSafe(|| entry.get_password()))
        .map_err(|_| KeyError::KeychainUnavailable)?
        .map_err(|_| KeyError::KeychainUnavailable)
}

fn safe_keyring_set_password(entry: &keyring::Entry, password: &str) -> Result<(), KeyError> {
    catch_unwind(AssertUnwindSafe(|| entry.set_password(password)))
        .map_err(|_| KeyError::KeychainUnavailable)?
        .map_err(|_| KeyError::KeychainUnavailable)
}

fn safe_keyring_delete_credential(entry: &keyring::Entry) -> Result<(), KeyError> {
    catch_unwind(AssertUnwindSafe(|| entry.delete_credential()))
        .map_err(|_| KeyError::KeychainUnavailable)?
        .map_err(|_| KeyError::KeychainUnavailable)
}

fn generate_key_material() -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut bytes = [0_u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from(HEX[usize::from(byte >> 4)]));
        out.push(char::from(HEX[usize::from(byte & 0x0f)]));
    }
    out
}
