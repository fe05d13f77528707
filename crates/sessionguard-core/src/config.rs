//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, the token storage backend, the last
//! used login email, and the session lifecycle policy.
//!
//! Configuration is stored at `~/.config/sessionguard/config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "sessionguard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable that overrides the configured API base URL
pub const API_URL_ENV: &str = "SESSIONGUARD_API_URL";

const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";

/// Where the three-part credential is persisted
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    #[default]
    Keyring,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api_base_url: String,
    pub last_email: Option<String>,
    pub token_backend: TokenBackend,
    pub lifecycle: LifecycleConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            last_email: None,
            token_backend: TokenBackend::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the default location, falling back to defaults when absent.
    /// `SESSIONGUARD_API_URL` overrides the stored base URL.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let config = Self::load_from(&path)?;
        Ok(config.with_api_url_override(std::env::var(API_URL_ENV).ok()))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn with_api_url_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().trim_end_matches('/').to_string();
        }
        self
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

// ============================================================================
// Lifecycle Policy
// ============================================================================

/// Validation triggers, auto-logout policy per failure class, redirect policy
/// and the expiry warning window.
///
/// Replaced as a whole; see [`LifecycleConfigPatch`] for partial updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    pub validate_on_route_change: bool,
    pub validate_on_page_focus: bool,
    pub validate_on_interval: bool,
    #[serde(rename = "validation_interval_ms", with = "duration_ms")]
    pub validation_interval: Duration,
    /// Access tokens expiring within this window are refreshed before use.
    #[serde(rename = "refresh_lookahead_ms", with = "duration_ms")]
    pub refresh_lookahead: Duration,

    pub auto_logout_on_expiry: bool,
    pub auto_logout_on_invalid_session: bool,
    pub auto_logout_on_network_error: bool,

    pub redirect_to_login_on_logout: bool,
    pub redirect_to_home_on_logout: bool,
    pub preserve_current_route: bool,

    pub show_expiry_warning: bool,
    #[serde(rename = "warning_time_before_expiry_ms", with = "duration_ms")]
    pub warning_time_before_expiry: Duration,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            validate_on_route_change: true,
            validate_on_page_focus: true,
            validate_on_interval: true,
            validation_interval: Duration::from_secs(5 * 60),
            refresh_lookahead: Duration::from_secs(5 * 60),

            auto_logout_on_expiry: true,
            auto_logout_on_invalid_session: true,
            auto_logout_on_network_error: true,

            redirect_to_login_on_logout: true,
            redirect_to_home_on_logout: false,
            preserve_current_route: true,

            show_expiry_warning: true,
            warning_time_before_expiry: Duration::from_secs(10 * 60),
        }
    }
}

/// Partial update for [`LifecycleConfig`]. Unset fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleConfigPatch {
    pub validate_on_route_change: Option<bool>,
    pub validate_on_page_focus: Option<bool>,
    pub validate_on_interval: Option<bool>,
    pub validation_interval: Option<Duration>,
    pub refresh_lookahead: Option<Duration>,
    pub auto_logout_on_expiry: Option<bool>,
    pub auto_logout_on_invalid_session: Option<bool>,
    pub auto_logout_on_network_error: Option<bool>,
    pub redirect_to_login_on_logout: Option<bool>,
    pub redirect_to_home_on_logout: Option<bool>,
    pub preserve_current_route: Option<bool>,
    pub show_expiry_warning: Option<bool>,
    pub warning_time_before_expiry: Option<Duration>,
}

impl LifecycleConfigPatch {
    /// Produce a new config from `base` with every set field overridden.
    pub fn apply(&self, base: &LifecycleConfig) -> LifecycleConfig {
        LifecycleConfig {
            validate_on_route_change: self
                .validate_on_route_change
                .unwrap_or(base.validate_on_route_change),
            validate_on_page_focus: self
                .validate_on_page_focus
                .unwrap_or(base.validate_on_page_focus),
            validate_on_interval: self.validate_on_interval.unwrap_or(base.validate_on_interval),
            validation_interval: self.validation_interval.unwrap_or(base.validation_interval),
            refresh_lookahead: self.refresh_lookahead.unwrap_or(base.refresh_lookahead),
            auto_logout_on_expiry: self.auto_logout_on_expiry.unwrap_or(base.auto_logout_on_expiry),
            auto_logout_on_invalid_session: self
                .auto_logout_on_invalid_session
                .unwrap_or(base.auto_logout_on_invalid_session),
            auto_logout_on_network_error: self
                .auto_logout_on_network_error
                .unwrap_or(base.auto_logout_on_network_error),
            redirect_to_login_on_logout: self
                .redirect_to_login_on_logout
                .unwrap_or(base.redirect_to_login_on_logout),
            redirect_to_home_on_logout: self
                .redirect_to_home_on_logout
                .unwrap_or(base.redirect_to_home_on_logout),
            preserve_current_route: self
                .preserve_current_route
                .unwrap_or(base.preserve_current_route),
            show_expiry_warning: self.show_expiry_warning.unwrap_or(base.show_expiry_warning),
            warning_time_before_expiry: self
                .warning_time_before_expiry
                .unwrap_or(base.warning_time_before_expiry),
        }
    }
}

/// Durations are stored as whole milliseconds in the config file.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
