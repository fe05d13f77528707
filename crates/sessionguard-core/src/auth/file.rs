use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::credentials::{Credential, StoreError, TokenStore};

/// Credential file name in cache directory
const CREDENTIAL_FILE: &str = "credential.json";

/// On-disk shape. Each key is optional so a damaged file reads as absent
/// instead of failing to parse.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    access_token: Option<String>,
    refresh_token: Option<String>,
    session_id: Option<String>,
}

/// Credential persisted as JSON in the cache directory.
pub struct FileTokenStore {
    cache_dir: PathBuf,
    lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(CREDENTIAL_FILE)
    }

    fn load(path: &Path) -> Option<Credential> {
        if !path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to read credential file");
                return None;
            }
        };
        match serde_json::from_str::<CredentialFile>(&contents) {
            Ok(file) => Credential::from_parts(file.access_token, file.refresh_token, file.session_id),
            Err(e) => {
                warn!(error = %e, "Failed to parse credential file");
                None
            }
        }
    }
}

impl TokenStore for FileTokenStore {
    /// Written to a temp file then renamed, so readers see the old triple or
    /// the new one.
    fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        std::fs::create_dir_all(&self.cache_dir)?;
        let file = CredentialFile {
            access_token: Some(credential.access_token.clone()),
            refresh_token: Some(credential.refresh_token.clone()),
            session_id: Some(credential.session_id.clone()),
        };
        let contents = serde_json::to_string_pretty(&file)?;
        let path = self.path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get(&self) -> Option<Credential> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Self::load(&self.path())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.path();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> FileTokenStore {
        let dir = std::env::temp_dir().join(format!(
            "sessionguard-file-store-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        FileTokenStore::new(dir)
    }

    #[test]
    fn test_file_store_round_trip_and_clear() {
        let store = temp_store("roundtrip");
        assert!(store.get().is_none());

        let credential = Credential {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            session_id: "sess-7".to_string(),
        };
        store.set(&credential).unwrap();
        assert_eq!(store.get(), Some(credential));
        assert!(!store.path().with_extension("json.tmp").exists());

        store.clear().unwrap();
        assert!(store.get().is_none());
        // Clearing an absent file is fine
        store.clear().unwrap();
    }

    #[test]
    fn test_partial_file_reads_as_absent() {
        let store = temp_store("partial");
        std::fs::create_dir_all(&store.cache_dir).unwrap();
        std::fs::write(
            store.path(),
            r#"{"access_token": "at", "refresh_token": null, "session_id": "sess-1"}"#,
        )
        .unwrap();
        assert!(store.get().is_none());
        assert!(!store.is_present());
        let _ = std::fs::remove_dir_all(&store.cache_dir);
    }

    #[test]
    fn test_corrupt_file_reads_as_absent() {
        let store = temp_store("corrupt");
        std::fs::create_dir_all(&store.cache_dir).unwrap();
        std::fs::write(store.path(), "not json").unwrap();
        assert!(store.get().is_none());
        let _ = std::fs::remove_dir_all(&store.cache_dir);
    }
}
