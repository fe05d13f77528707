use std::sync::Mutex;

use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Storage key names, shared by every backend.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const SESSION_ID_KEY: &str = "session_id";

const SERVICE_NAME: &str = "sessionguard";

/// The three-part credential. Stored and cleared as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
}

impl Credential {
    /// Assemble from individually stored parts. Any missing or empty part
    /// means there is no credential.
    pub fn from_parts(
        access_token: Option<String>,
        refresh_token: Option<String>,
        session_id: Option<String>,
    ) -> Option<Self> {
        match (access_token, refresh_token, session_id) {
            (Some(a), Some(r), Some(s)) if !a.is_empty() && !r.is_empty() && !s.is_empty() => {
                Some(Self {
                    access_token: a,
                    refresh_token: r,
                    session_id: s,
                })
            }
            _ => None,
        }
    }

    pub fn with_access_token(&self, access_token: String) -> Self {
        Self {
            access_token,
            ..self.clone()
        }
    }

    /// Same sign-in, ignoring access token rotation.
    pub fn same_login(&self, other: &Credential) -> bool {
        self.session_id == other.session_id && self.refresh_token == other.refresh_token
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode credential: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Keychain did not retain the credential (set token_backend to \"file\")")]
    NotRetained,
}

/// Durable holder for the credential.
///
/// `get` never yields a partial credential; `clear` removes every key.
/// No network or validation logic belongs here.
pub trait TokenStore: Send + Sync {
    fn set(&self, credential: &Credential) -> Result<(), StoreError>;

    fn get(&self) -> Option<Credential>;

    fn clear(&self) -> Result<(), StoreError>;

    fn is_present(&self) -> bool {
        self.get().is_some()
    }
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    inner: Mutex<Option<Credential>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *guard = Some(credential.clone());
        Ok(())
    }

    fn get(&self) -> Option<Credential> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// One keychain entry per storage key, namespaced by profile.
pub struct KeyringTokenStore {
    service: String,
    // Serializes set/clear so readers in this process never interleave with
    // a half-written triple.
    write_lock: Mutex<()>,
}

impl KeyringTokenStore {
    pub fn new(profile: &str) -> Self {
        Self {
            service: format!("{}:{}", SERVICE_NAME, profile),
            write_lock: Mutex::new(()),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry, StoreError> {
        Ok(Entry::new(&self.service, key)?)
    }

    fn read(&self, key: &str) -> Option<String> {
        let entry = match self.entry(key) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Failed to create keyring entry");
                return None;
            }
        };
        match entry.get_password() {
            Ok(value) => Some(value),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                warn!(key, error = %e, "Failed to read keyring entry");
                None
            }
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl TokenStore for KeyringTokenStore {
    fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let result = (|| -> Result<(), StoreError> {
            self.entry(ACCESS_TOKEN_KEY)?.set_password(&credential.access_token)?;
            self.entry(REFRESH_TOKEN_KEY)?.set_password(&credential.refresh_token)?;
            self.entry(SESSION_ID_KEY)?.set_password(&credential.session_id)?;
            // Backends without persistence accept writes and then read
            // nothing back.
            let stored = Credential::from_parts(
                self.read(ACCESS_TOKEN_KEY),
                self.read(REFRESH_TOKEN_KEY),
                self.read(SESSION_ID_KEY),
            );
            if stored.as_ref() != Some(credential) {
                return Err(StoreError::NotRetained);
            }
            Ok(())
        })();
        if let Err(e) = &result {
            warn!(error = %e, "Failed to store credential in keychain");
            // Never leave a partial triple behind
            for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_ID_KEY] {
                if let Err(e) = self.delete(key) {
                    warn!(key, error = %e, "Failed to roll back keyring entry");
                }
            }
        }
        result
    }

    fn get(&self) -> Option<Credential> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        Credential::from_parts(
            self.read(ACCESS_TOKEN_KEY),
            self.read(REFRESH_TOKEN_KEY),
            self.read(SESSION_ID_KEY),
        )
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut first_error = None;
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_ID_KEY] {
            if let Err(e) = self.delete(key) {
                warn!(key, error = %e, "Failed to delete keyring entry");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
