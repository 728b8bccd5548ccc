//! File-based credential persistence.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use super::{CredentialStore, StoreError, TokenUser};

/// Current credential file format version.
///
/// Increment this when making breaking changes to the format.
const STORE_FILE_VERSION: u32 = 1;

/// On-disk format.
///
/// Credentials are keyed by member id. `next_id` survives deletions so
/// primary keys are never reused.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,

    /// Unix timestamp of the last write. For debugging only.
    #[serde(skip_serializing_if = "Option::is_none")]
    saved_at: Option<String>,

    next_id: u64,

    users: BTreeMap<String, TokenUser>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: STORE_FILE_VERSION,
            saved_at: None,
            next_id: 1,
            users: BTreeMap::new(),
        }
    }
}

/// Returns the current Unix timestamp as a string.
fn unix_timestamp_now() -> String {
    use std::time::SystemTime;

    let duration = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();

    format!("{}", duration.as_secs())
}

/// File-based implementation of [`CredentialStore`].
///
/// Stores all credentials in one JSON document.
///
/// # Atomic Writes
///
/// Uses write-to-temp-then-rename:
/// 1. Write to `{path}.tmp`
/// 2. Rename `{path}.tmp` to `{path}`
///
/// Writers inside one process are serialized so a read-modify-write
/// cycle never loses a concurrent update.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl FileCredentialStore {
    /// Creates a new file-based store at the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the path to the credential file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(path: &Path) -> Result<StoreFile, StoreError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(StoreFile::default()),
            Err(e) => return Err(StoreError::Read(e)),
        };

        let file: StoreFile =
            serde_json::from_str(&content).map_err(|e| StoreError::Corrupted {
                reason: format!("Invalid JSON: {e}"),
            })?;

        if file.version != STORE_FILE_VERSION {
            return Err(StoreError::Corrupted {
                reason: format!(
                    "Incompatible version: expected {STORE_FILE_VERSION}, got {}",
                    file.version
                ),
            });
        }

        Ok(file)
    }

    fn write(path: &Path, file: &mut StoreFile) -> Result<(), StoreError> {
        file.saved_at = Some(unix_timestamp_now());
        let content = serde_json::to_string_pretty(file).map_err(StoreError::Serialize)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::Write)?;
            }
        }

        // credentials.json -> credentials.json.tmp
        let temp_path = PathBuf::from(format!("{}.tmp", path.display()));
        std::fs::write(&temp_path, content).map_err(StoreError::Write)?;
        std::fs::rename(&temp_path, path).map_err(StoreError::Write)?;

        Ok(())
    }

    /// Applies `update` to the file content under the write lock.
    ///
    /// Runs on the blocking pool.
    async fn modify<T, F>(&self, update: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut StoreFile) -> (T, bool) + Send + 'static,
    {
        let path = self.path.clone();
        let lock = Arc::clone(&self.write_lock);

        let task = tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut file = Self::read(&path)?;
            let (value, changed) = update(&mut file);
            if changed {
                Self::write(&path, &mut file)?;
            }
            Ok(value)
        });

        task.await.map_err(|e| StoreError::Write(std::io::Error::other(e)))?
    }
}

impl CredentialStore for FileCredentialStore {
    fn find_by_member_id(&self, member_id: &str) -> Result<Option<TokenUser>, StoreError> {
        Ok(Self::read(&self.path)?.users.remove(member_id))
    }

    async fn save(&self, user: &TokenUser) -> Result<TokenUser, StoreError> {
        let mut user = user.clone();

        self.modify(move |file| {
            let existing_id = file.users.get(&user.member_id).and_then(|u| u.id);
            let id = match existing_id.or(user.id) {
                Some(id) => id,
                None => {
                    let id = file.next_id;
                    file.next_id += 1;
                    id
                }
            };
            file.next_id = file.next_id.max(id + 1);
            user.id = Some(id);
            file.users.insert(user.member_id.clone(), user.clone());
            (user, true)
        })
        .await
    }

    async fn delete_by_member_id(&self, member_id: &str) -> Result<bool, StoreError> {
        let member_id = member_id.to_string();

        self.modify(move |file| {
            let removed = file.users.remove(&member_id).is_some();
            (removed, removed)
        })
        .await
    }
}
