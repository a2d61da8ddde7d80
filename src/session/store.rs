//! Key-value persistence collaborator and the session token store.
//!
//! Persistence is an external capability behind [`KeyValueStore`]; swapping
//! the durable file backend for the ephemeral memory backend never touches
//! SessionManager logic. [`TokenStore`] is the single holder of the persisted
//! session and always re-reads the backing store rather than caching — in a
//! multi-context deployment the store is the source of truth.

use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::manager::Session;

const SESSION_KEY: &str = "session";
const SESSION_FILE_NAME: &str = "session.json";

/// Errors for key-value persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No suitable user config directory is available.
    #[error("unable to determine config directory (set XDG_CONFIG_HOME or HOME)")]
    ConfigDirUnavailable,

    /// Filesystem I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// External key-value persistence capability.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a value by key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a value under a key, replacing any existing value.
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Removes a key; removing an absent key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Ephemeral in-memory backend.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    /// Creates an empty store, shared-ownership ready.
    #[must_use]
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Durable JSON-file backend.
///
/// The whole map is re-read on every `get`, so concurrent processes writing
/// the same file are observed rather than shadowed by a stale cache. Writes
/// within this process are serialized by a mutex; the file is created with
/// owner-only permissions.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    /// Creates a store backed by the given file.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a store at the default location
    /// (`~/.config/cookievault/session.json`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ConfigDirUnavailable`] if no usable config dir
    /// is found.
    pub fn at_default_location() -> Result<Self, StoreError> {
        Ok(Self::new(default_config_dir()?.join(SESSION_FILE_NAME)))
    }

    /// The file this store reads and writes.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<HashMap<String, String>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(map)?).await?;
        set_owner_only_permissions(&self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_map().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        map.insert(key.to_string(), value);
        self.write_map(&map).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.read_map().await?;
        if map.remove(key).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }
}

#[cfg(unix)]
async fn set_owner_only_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;

    let permissions = std::fs::Permissions::from_mode(0o600);
    tokio::fs::set_permissions(path, permissions).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn set_owner_only_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

fn default_config_dir() -> Result<PathBuf, StoreError> {
    resolve_config_dir(
        sanitize_env_path(env::var_os("XDG_CONFIG_HOME")),
        sanitize_env_path(env::var_os("HOME")),
        sanitize_env_path(env::var_os("APPDATA")),
    )
}

fn sanitize_env_path(value: Option<OsString>) -> Option<PathBuf> {
    let value = value?;
    if value.to_string_lossy().trim().is_empty() {
        return None;
    }

    Some(PathBuf::from(value))
}

fn resolve_config_dir(
    xdg_config_home: Option<PathBuf>,
    home: Option<PathBuf>,
    app_data: Option<PathBuf>,
) -> Result<PathBuf, StoreError> {
    if let Some(xdg) = xdg_config_home {
        return Ok(xdg.join("cookievault"));
    }
    if let Some(home) = home {
        return Ok(home.join(".config").join("cookievault"));
    }
    if let Some(app_data) = app_data {
        return Ok(app_data.join("cookievault"));
    }

    Err(StoreError::ConfigDirUnavailable)
}

/// Persisted holder of the current [`Session`].
///
/// Single-writer within a process; reads always go back to the backing
/// store.
#[derive(Clone)]
pub struct TokenStore {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore").finish_non_exhaustive()
    }
}

impl TokenStore {
    /// Creates a token store over any key-value backend.
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Loads the persisted session, if any.
    ///
    /// A corrupt persisted session is treated as absent rather than fatal,
    /// so a damaged store never wedges the client in a half-authenticated
    /// state.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend read fails.
    #[instrument(level = "debug", skip(self))]
    pub async fn load(&self) -> Result<Option<Session>, StoreError> {
        let Some(raw) = self.store.get(SESSION_KEY).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(error) => {
                debug!(%error, "discarding unparseable persisted session");
                self.store.remove(SESSION_KEY).await?;
                Ok(None)
            }
        }
    }

    /// Persists the session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when serialization or the backend write fails.
    pub async fn save(&self, session: &Session) -> Result<(), StoreError> {
        let raw = serde_json::to_string(session)?;
        self.store.set(SESSION_KEY, raw).await
    }

    /// Removes any persisted session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend removal fails.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.store.remove(SESSION_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::manager::SessionUser;

    fn sample_session() -> Session {
        Session {
            access_token: "AT1".to_string(),
            refresh_token: "RT1".to_string(),
            expires_at: 4_102_444_800_000,
            user: SessionUser {
                id: "u1".to_string(),
                email: "a@b.com".to_string(),
                name: "A".to_string(),
            },
            device_id: Some("device-1".to_string()),
        }
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::shared();
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_remove_absent_key_ok() {
        let store = MemoryStore::shared();
        store.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("session.json"));
        store.set("k", "v".to_string()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        store.remove("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_missing_file_reads_empty() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::new(dir.path().join("absent.json"));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_observes_external_writes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let store = FileStore::new(&path);
        store.set("k", "old".to_string()).await.unwrap();

        // Another context rewrites the file out from under us
        let map: HashMap<String, String> =
            HashMap::from([("k".to_string(), "new".to_string())]);
        std::fs::write(&path, serde_json::to_vec(&map).unwrap()).unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_file_store_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        let store = FileStore::new(&path);
        store.set("k", "v".to_string()).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_resolve_config_dir_prefers_xdg_over_home() {
        let resolved = resolve_config_dir(
            Some(PathBuf::from("/tmp/xdg")),
            Some(PathBuf::from("/tmp/home")),
            Some(PathBuf::from("/tmp/appdata")),
        )
        .unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/xdg/cookievault"));
    }

    #[test]
    fn test_resolve_config_dir_falls_back_to_home_then_appdata() {
        let resolved =
            resolve_config_dir(None, Some(PathBuf::from("/tmp/home")), None).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/home/.config/cookievault"));

        let resolved =
            resolve_config_dir(None, None, Some(PathBuf::from("/tmp/appdata"))).unwrap();
        assert_eq!(resolved, PathBuf::from("/tmp/appdata/cookievault"));
    }

    #[test]
    fn test_resolve_config_dir_errors_when_all_sources_missing() {
        assert!(matches!(
            resolve_config_dir(None, None, None),
            Err(StoreError::ConfigDirUnavailable)
        ));
    }

    #[test]
    fn test_sanitize_env_path_rejects_blank_values() {
        assert!(sanitize_env_path(Some(OsString::from(""))).is_none());
        assert!(sanitize_env_path(Some(OsString::from("   "))).is_none());
    }

    #[tokio::test]
    async fn test_token_store_round_trip() {
        let tokens = TokenStore::new(MemoryStore::shared());
        assert!(tokens.load().await.unwrap().is_none());

        tokens.save(&sample_session()).await.unwrap();
        let loaded = tokens.load().await.unwrap().unwrap();
        assert_eq!(loaded.access_token, "AT1");
        assert_eq!(loaded.user.email, "a@b.com");

        tokens.clear().await.unwrap();
        assert!(tokens.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_store_discards_corrupt_session() {
        let backend = MemoryStore::shared();
        backend
            .set(SESSION_KEY, "{not json".to_string())
            .await
            .unwrap();
        let tokens = TokenStore::new(backend.clone());
        assert!(tokens.load().await.unwrap().is_none());
        // The corrupt entry is cleaned up, not left behind
        assert_eq!(backend.get(SESSION_KEY).await.unwrap(), None);
    }
}
