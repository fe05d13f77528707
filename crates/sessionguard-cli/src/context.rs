use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use sessionguard_core::{
    ApiClient, AppConfig, FileTokenStore, HeadlessPlatform, KeyringTokenStore, TokenBackend,
    TokenStore, UserContext,
};
use tracing::debug;

/// Everything a command needs, built once from config and flags.
pub struct Context {
    pub config: AppConfig,
    pub cache_dir: PathBuf,
    pub store: Arc<dyn TokenStore>,
    pub client: Arc<ApiClient>,
}

impl Context {
    pub fn load(api_url: Option<String>, profile: &str) -> Result<Self> {
        let config = AppConfig::load()?.with_api_url_override(api_url);
        let cache_dir = config.cache_dir()?;

        let store: Arc<dyn TokenStore> = match config.token_backend {
            TokenBackend::Keyring => Arc::new(KeyringTokenStore::new(profile)),
            TokenBackend::File => Arc::new(FileTokenStore::new(cache_dir.join(profile))),
        };
        debug!(backend = ?config.token_backend, api = %config.api_base_url, "Loaded configuration");

        let client = ApiClient::new(&config.api_base_url)
            .context("Failed to build HTTP client")?
            .with_token_store(store.clone());

        Ok(Self {
            config,
            cache_dir,
            store,
            client: Arc::new(client),
        })
    }

    pub fn user_context(&self) -> Arc<UserContext> {
        Arc::new(UserContext::new(self.store.clone(), self.client.clone()))
    }

    pub fn platform(&self, assume_yes: bool) -> Arc<HeadlessPlatform> {
        Arc::new(
            HeadlessPlatform::new()
                .with_cache_dir(self.cache_dir.clone())
                .assume_yes(assume_yes),
        )
    }
}
