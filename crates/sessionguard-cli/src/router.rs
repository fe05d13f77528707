use std::sync::Mutex;

use async_trait::async_trait;
use sessionguard_core::{PlatformError, Route, Router};
use tracing::info;

/// Tracks a pretend current location for `watch`. Navigation is printed.
pub struct TerminalRouter {
    current: Mutex<Route>,
}

impl TerminalRouter {
    pub fn new(start: &str) -> Self {
        Self {
            current: Mutex::new(Route::new(start)),
        }
    }

    /// Move to `full_path` without announcing it (user-driven navigation).
    pub fn set(&self, full_path: &str) -> Route {
        let route = Route::new(full_path);
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = route.clone();
        route
    }
}

#[async_trait]
impl Router for TerminalRouter {
    fn current_route(&self) -> Option<Route> {
        Some(self.current.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn push(&self, path: &str) -> Result<(), PlatformError> {
        info!(path, "Navigating");
        println!("-> {}", path);
        self.set(path);
        Ok(())
    }
}
