//! Environment access behind traits: in-app navigation, hard navigation,
//! confirmation prompts and the client-side stores a full logout wipes.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlatformError {
    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Worker error: {0}")]
    Worker(String),
}

/// The current location. `full_path` includes the query string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: String,
    pub full_path: String,
}

impl Route {
    pub fn new(full_path: &str) -> Self {
        let path = full_path.split(['?', '#']).next().unwrap_or("/");
        Self {
            path: if path.is_empty() { "/".to_string() } else { path.to_string() },
            full_path: full_path.to_string(),
        }
    }
}

/// In-app navigation.
#[async_trait]
pub trait Router: Send + Sync {
    fn current_route(&self) -> Option<Route>;

    async fn push(&self, path: &str) -> Result<(), PlatformError>;
}

#[async_trait]
pub trait Platform: Send + Sync {
    /// Navigation that cannot fail. Used when the router is missing or errors.
    fn hard_redirect(&self, path: &str);

    /// Blocking yes/no prompt.
    async fn confirm(&self, message: &str) -> bool;

    fn clear_local_storage(&self) -> Result<(), PlatformError>;

    fn clear_session_storage(&self) -> Result<(), PlatformError>;

    async fn cache_names(&self) -> Result<Vec<String>, PlatformError>;

    async fn delete_cache(&self, name: &str) -> Result<(), PlatformError>;

    async fn worker_registrations(&self) -> Result<Vec<String>, PlatformError>;

    async fn unregister_worker(&self, id: &str) -> Result<(), PlatformError>;
}

// ============================================================================
// Headless implementation
// ============================================================================

/// Native platform for terminal use.
///
/// Local and session storage are in-process maps. Caches are the
/// subdirectories of `<cache_dir>/caches`. There are no background workers.
/// Confirmation reads a y/N answer from stdin unless `assume_yes` is set.
#[derive(Default)]
pub struct HeadlessPlatform {
    local_storage: Mutex<HashMap<String, String>>,
    session_storage: Mutex<HashMap<String, String>>,
    cache_root: Option<PathBuf>,
    assume_yes: bool,
    last_redirect: Mutex<Option<String>>,
}

impl HeadlessPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_dir(mut self, cache_dir: PathBuf) -> Self {
        self.cache_root = Some(cache_dir.join("caches"));
        self
    }

    pub fn assume_yes(mut self, yes: bool) -> Self {
        self.assume_yes = yes;
        self
    }

    #[cfg(test)]
    fn set_local_item(&self, key: &str, value: &str) {
        self.local_storage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    #[cfg(test)]
    fn set_session_item(&self, key: &str, value: &str) {
        self.session_storage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    #[cfg(test)]
    fn local_item(&self, key: &str) -> Option<String> {
        self.local_storage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    #[cfg(test)]
    fn session_item(&self, key: &str) -> Option<String> {
        self.session_storage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Where the last hard redirect pointed.
    #[cfg(test)]
    fn last_redirect(&self) -> Option<String> {
        self.last_redirect
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Platform for HeadlessPlatform {
    fn hard_redirect(&self, path: &str) {
        info!(path, "Hard redirect");
        *self.last_redirect.lock().unwrap_or_else(|e| e.into_inner()) = Some(path.to_string());
    }

    async fn confirm(&self, message: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        let message = message.to_string();
        let answer = tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{} [y/N] ", message);
            let _ = stderr.flush();
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;
        match answer {
            Ok(Ok(line)) => matches!(line.trim().to_lowercase().as_str(), "y" | "yes"),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read confirmation");
                false
            }
            Err(e) => {
                warn!(error = %e, "Confirmation prompt task failed");
                false
            }
        }
    }

    fn clear_local_storage(&self) -> Result<(), PlatformError> {
        self.local_storage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    fn clear_session_storage(&self) -> Result<(), PlatformError> {
        self.session_storage
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        Ok(())
    }

    async fn cache_names(&self) -> Result<Vec<String>, PlatformError> {
        let Some(root) = &self.cache_root else {
            return Ok(Vec::new());
        };
        if !root.exists() {
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(root).map_err(|e| PlatformError::Cache(e.to_string()))?;
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn delete_cache(&self, name: &str) -> Result<(), PlatformError> {
        let Some(root) = &self.cache_root else {
            return Ok(());
        };
        if name.contains(['/', '\\']) || name == ".." || name == "." {
            return Err(PlatformError::Cache(format!("invalid cache name: {}", name)));
        }
        let path = root.join(name);
        debug!(cache = name, "Deleting cache");
        std::fs::remove_dir_all(&path).map_err(|e| PlatformError::Cache(e.to_string()))
    }

    async fn worker_registrations(&self) -> Result<Vec<String>, PlatformError> {
        Ok(Vec::new())
    }

    async fn unregister_worker(&self, id: &str) -> Result<(), PlatformError> {
        Err(PlatformError::Worker(format!("no such worker: {}", id)))
    }
}
