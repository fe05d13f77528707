use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::api::{ApiError, AuthGateway, AuthResponse, LoginRequest, RegisterRequest};
use crate::session::types::string_or_number;

use super::credentials::{StoreError, TokenStore};

/// The signed-in user as returned by login and register.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub email_verified: bool,
    #[serde(default)]
    pub status: Option<String>,
}

impl User {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.clone(),
            _ => self.email.clone(),
        }
    }
}

/// What the lifecycle machinery needs from whoever owns the current user.
pub trait AuthContext: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Forget the signed-in user. Called after the credential is cleared.
    fn clear_user(&self);
}

#[derive(Error, Debug)]
pub enum LoginError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Failed to store credential: {0}")]
    Store(#[from] StoreError),
}

/// Holds the current user and performs login/registration.
pub struct UserContext {
    user: RwLock<Option<User>>,
    // Credential found at startup; the user record is not known yet
    restored: AtomicBool,
    store: Arc<dyn TokenStore>,
    gateway: Arc<dyn AuthGateway>,
}

impl UserContext {
    pub fn new(store: Arc<dyn TokenStore>, gateway: Arc<dyn AuthGateway>) -> Self {
        Self {
            user: RwLock::new(None),
            restored: AtomicBool::new(false),
            store,
            gateway,
        }
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<User, LoginError> {
        let request = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response = self.gateway.login(&request).await?;
        self.accept(response)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<User, LoginError> {
        let response = self.gateway.register(request).await?;
        self.accept(response)
    }

    /// Resume from a previously stored credential. Returns whether one exists.
    pub fn restore(&self) -> bool {
        let present = self.store.is_present();
        self.restored.store(present, Ordering::Release);
        if present {
            debug!("Restored stored credential");
        }
        present
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn accept(&self, response: AuthResponse) -> Result<User, LoginError> {
        self.store.set(&response.credential())?;
        info!(session_id = %response.session_id, "Signed in");
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = Some(response.user.clone());
        Ok(response.user)
    }
}

impl AuthContext for UserContext {
    /// In-memory sign-in state only. A credential removed behind our back is
    /// for the validator to notice, so the user is logged out properly.
    fn is_authenticated(&self) -> bool {
        self.user.read().unwrap_or_else(|e| e.into_inner()).is_some()
            || self.restored.load(Ordering::Acquire)
    }

    fn clear_user(&self) {
        *self.user.write().unwrap_or_else(|e| e.into_inner()) = None;
        self.restored.store(false, Ordering::Release);
    }
}
