use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::ValidationError;
use crate::models::User;

/// id -> display name
pub type UserMap = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("user store io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("user store encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("user store task failed: {0}")]
    Task(String),
}

/// Durable storage for the allow-list
pub trait UserStore: Send + Sync {
    fn load_all(&self) -> Result<UserMap, UserStoreError>;
    fn save_all(&self, users: &UserMap) -> Result<(), UserStoreError>;
}

/// Flat JSON object `{"<id>": "<name>"}` on disk
pub struct JsonFileUserStore {
    path: PathBuf,
}

impl JsonFileUserStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> UserStoreError {
        UserStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl UserStore for JsonFileUserStore {
    /// A missing or unreadable file yields an empty allow-list
    fn load_all(&self) -> Result<UserMap, UserStoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "users file not found, starting with empty allow-list");
                return Ok(UserMap::new());
            }
            Err(e) => return Err(self.io_error(e)),
        };

        match serde_json::from_str::<UserMap>(&raw) {
            Ok(users) => {
                info!(path = %self.path.display(), count = users.len(), "loaded users");
                Ok(users)
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "users file is not valid JSON, starting with empty allow-list");
                Ok(UserMap::new())
            }
        }
    }

    /// Write to a sibling temp file, then rename over the target
    fn save_all(&self, users: &UserMap) -> Result<(), UserStoreError> {
        let encoded = serde_json::to_string_pretty(users)?;

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let write = |tmp_path: &Path| -> std::io::Result<()> {
            let mut file = std::fs::File::create(tmp_path)?;
            file.write_all(encoded.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            std::fs::rename(tmp_path, &self.path)
        };
        write(&tmp_path).map_err(|e| self.io_error(e))
    }
}

/// Allow-list plus administrator identity.
///
/// The in-memory map is loaded once and is the source of truth afterwards;
/// changes to the backing file made by others are not picked up until
/// [`AccessGate::reload`]. Every mutation writes the staged map first and
/// only swaps it in once the write succeeded.
pub struct AccessGate {
    admin_id: String,
    users: Mutex<UserMap>,
    store: Arc<dyn UserStore>,
}

impl AccessGate {
    pub async fn load(admin_id: impl Into<String>, store: Arc<dyn UserStore>) -> Result<Self, UserStoreError> {
        let users = run_blocking({
            let store = store.clone();
            move || store.load_all()
        })
        .await?;

        Ok(Self {
            admin_id: admin_id.into(),
            users: Mutex::new(users),
            store,
        })
    }

    pub async fn is_authorized(&self, caller_id: &str) -> bool {
        self.users.lock().await.contains_key(caller_id)
    }

    pub fn is_admin(&self, caller_id: &str) -> bool {
        caller_id == self.admin_id
    }

    pub async fn list_users(&self) -> Vec<User> {
        self.users
            .lock()
            .await
            .iter()
            .map(|(id, name)| User {
                id: id.clone(),
                display_name: name.clone(),
            })
            .collect()
    }

    pub async fn user_count(&self) -> usize {
        self.users.lock().await.len()
    }

    /// Insert or overwrite `caller_id`
    pub async fn add_user(&self, caller_id: &str, display_name: &str) -> Result<(), UserStoreError> {
        let mut users = self.users.lock().await;
        let mut staged = users.clone();
        staged.insert(caller_id.to_string(), display_name.to_string());

        let staged = self.persist(staged).await?;
        *users = staged;
        info!(user_id = caller_id, display_name, "user added");
        Ok(())
    }

    /// Remove the first entry whose display name matches exactly
    pub async fn remove_user(&self, display_name: &str) -> Result<User, RemoveUserError> {
        let mut users = self.users.lock().await;
        let Some(user_id) = users
            .iter()
            .find(|(_, name)| name.as_str() == display_name)
            .map(|(id, _)| id.clone())
        else {
            let suggestion = closest_name(users.values(), display_name);
            return Err(RemoveUserError::NotFound(ValidationError::UserNotFound {
                name: display_name.to_string(),
                suggestion,
            }));
        };

        let mut staged = users.clone();
        staged.remove(&user_id);
        let staged = self.persist(staged).await?;
        *users = staged;
        info!(user_id = %user_id, display_name, "user removed");

        Ok(User {
            id: user_id,
            display_name: display_name.to_string(),
        })
    }

    /// Write the current map to the store
    pub async fn flush(&self) -> Result<(), UserStoreError> {
        let users = self.users.lock().await;
        self.persist(users.clone()).await?;
        Ok(())
    }

    /// Replace the in-memory map with what the store holds now
    pub async fn reload(&self) -> Result<usize, UserStoreError> {
        let mut users = self.users.lock().await;
        let store = self.store.clone();
        *users = run_blocking(move || store.load_all()).await?;
        Ok(users.len())
    }

    async fn persist(&self, staged: UserMap) -> Result<UserMap, UserStoreError> {
        let store = self.store.clone();
        run_blocking(move || store.save_all(&staged).map(|_| staged)).await
    }
}

#[derive(Debug, Error)]
pub enum RemoveUserError {
    #[error(transparent)]
    NotFound(ValidationError),
    #[error(transparent)]
    Store(#[from] UserStoreError),
}

async fn run_blocking<T, F>(f: F) -> Result<T, UserStoreError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, UserStoreError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| UserStoreError::Task(e.to_string()))?
}

/// Registered name most similar to `wanted`, if any is close enough
fn closest_name<'a>(names: impl Iterator<Item = &'a String>, wanted: &str) -> Option<String> {
    names
        .map(|name| (strsim::jaro_winkler(name, wanted), name))
        .filter(|(score, _)| *score >= 0.85)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, name)| name.clone())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// In-memory store that can be told to fail on save
    #[derive(Default)]
    pub(crate) struct MemoryUserStore {
        pub users: std::sync::Mutex<UserMap>,
        pub saves: AtomicUsize,
        pub fail_saves: AtomicBool,
    }

    impl UserStore for MemoryUserStore {
        fn load_all(&self) -> Result<UserMap, UserStoreError> {
            Ok(self.users.lock().unwrap().clone())
        }

        fn save_all(&self, users: &UserMap) -> Result<(), UserStoreError> {
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(UserStoreError::Io {
                    path: PathBuf::from("memory"),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
                });
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.users.lock().unwrap() = users.clone();
            Ok(())
        }
    }

    #[test]
    fn test_json_store_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileUserStore::new(dir.path().join("users.json"));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_json_store_corrupt_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonFileUserStore::new(&path);
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_json_store_reads_flat_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        std::fs::write(&path, r#"{"929686990": "admin", "12345": "alice"}"#).unwrap();

        let users = JsonFileUserStore::new(&path).load_all().unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users.get("12345").map(String::as_str), Some("alice"));
    }

    #[test]
    fn test_json_store_save_of_load_is_noop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        let store = JsonFileUserStore::new(&path);

        let mut users = UserMap::new();
        users.insert("2".to_string(), "bob".to_string());
        users.insert("1".to_string(), "alice".to_string());
        store.save_all(&users).unwrap();
        let first = std::fs::read(&path).unwrap();

        store.save_all(&store.load_all().unwrap()).unwrap();
        let second = std::fs::read(&path).unwrap();

        assert_eq!(first, second);
        assert!(!dir.path().join("users.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_authorization_and_admin() {
        let store = Arc::new(MemoryUserStore::default());
        store.users.lock().unwrap().insert("42".to_string(), "alice".to_string());
        let gate = AccessGate::load("7", store).await.unwrap();

        assert!(gate.is_authorized("42").await);
        assert!(!gate.is_authorized("7").await);
        assert!(gate.is_admin("7"));
        assert!(!gate.is_admin("42"));
    }

    #[tokio::test]
    async fn test_add_user_twice_keeps_one_entry() {
        let store = Arc::new(MemoryUserStore::default());
        let gate = AccessGate::load("7", store.clone()).await.unwrap();

        gate.add_user("42", "alice").await.unwrap();
        gate.add_user("42", "alice").await.unwrap();

        assert_eq!(gate.user_count().await, 1);
        assert_eq!(store.users.lock().unwrap().len(), 1);
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_add_user_overwrites_name_for_same_id() {
        let store = Arc::new(MemoryUserStore::default());
        let gate = AccessGate::load("7", store).await.unwrap();

        gate.add_user("42", "alice").await.unwrap();
        gate.add_user("42", "alice2").await.unwrap();

        let users = gate.list_users().await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].display_name, "alice2");
    }

    #[tokio::test]
    async fn test_remove_user_by_exact_name() {
        let store = Arc::new(MemoryUserStore::default());
        let gate = AccessGate::load("7", store.clone()).await.unwrap();
        gate.add_user("1", "alice").await.unwrap();
        gate.add_user("2", "bob").await.unwrap();

        let removed = gate.remove_user("alice").await.unwrap();
        assert_eq!(removed.id, "1");
        assert!(!gate.is_authorized("1").await);
        assert!(!store.users.lock().unwrap().contains_key("1"));
    }

    #[tokio::test]
    async fn test_remove_user_is_case_sensitive_and_suggests() {
        let store = Arc::new(MemoryUserStore::default());
        let gate = AccessGate::load("7", store).await.unwrap();
        gate.add_user("1", "alice").await.unwrap();

        match gate.remove_user("Alice").await {
            Err(RemoveUserError::NotFound(ValidationError::UserNotFound { name, suggestion })) => {
                assert_eq!(name, "Alice");
                assert_eq!(suggestion.as_deref(), Some("alice"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(gate.is_authorized("1").await);

        match gate.remove_user("zed").await {
            Err(RemoveUserError::NotFound(ValidationError::UserNotFound { suggestion, .. })) => {
                assert_eq!(suggestion, None);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_save_leaves_memory_untouched() {
        let store = Arc::new(MemoryUserStore::default());
        let gate = AccessGate::load("7", store.clone()).await.unwrap();
        gate.add_user("1", "alice").await.unwrap();

        store.fail_saves.store(true, Ordering::SeqCst);
        assert!(gate.add_user("2", "bob").await.is_err());
        assert!(!gate.is_authorized("2").await);

        assert!(matches!(
            gate.remove_user("alice").await,
            Err(RemoveUserError::Store(_))
        ));
        assert!(gate.is_authorized("1").await);
    }

    #[tokio::test]
    async fn test_reload_picks_up_external_changes() {
        let store = Arc::new(MemoryUserStore::default());
        let gate = AccessGate::load("7", store.clone()).await.unwrap();

        store.users.lock().unwrap().insert("9".to_string(), "carol".to_string());
        assert!(!gate.is_authorized("9").await);

        assert_eq!(gate.reload().await.unwrap(), 1);
        assert!(gate.is_authorized("9").await);
    }

    #[tokio::test]
    async fn test_file_backed_gate_persists_mutations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("users.json");
        let gate = AccessGate::load("7", Arc::new(JsonFileUserStore::new(&path)))
            .await
            .unwrap();

        gate.add_user("42", "alice").await.unwrap();
        gate.flush().await.unwrap();

        let on_disk: UserMap = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.get("42").map(String::as_str), Some("alice"));
    }
}
