//! User-initiated logout in four modes: this session, every device, one
//! named session, and a forced local-only logout.
//!
//! None of these return errors. Remote failures are logged and reflected in
//! `LogoutOutcome::success`; local cleanup always happens.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::api::AuthGateway;
use crate::auth::{token, AuthContext, TokenStore};
use crate::platform::{Platform, Router};

const LOGIN_PATH: &str = "/login";

const CONFIRM_LOGOUT: &str = "Are you sure you want to logout?";
const CONFIRM_LOGOUT_ALL: &str = "Are you sure you want to logout from all devices? \
     This will end your session on all devices including mobile apps.";
const CONFIRM_END_SESSION: &str = "Are you sure you want to end this session?";

/// Caller-supplied yes/no prompt.
pub type ConfirmFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct LogoutOptions {
    /// Where to navigate afterwards. Defaults to `/login`.
    pub redirect_to: Option<String>,
    /// `None` uses the mode's default: no prompt for the current session,
    /// a prompt for everything else.
    pub show_confirmation: Option<bool>,
    /// Also wipe local/session storage, caches and workers.
    pub clear_all_data: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogoutOutcome {
    pub success: bool,
    pub message: String,
    pub redirected: bool,
}

impl LogoutOutcome {
    fn new(success: bool, message: &str, redirected: bool) -> Self {
        Self {
            success,
            message: message.to_string(),
            redirected,
        }
    }

    fn cancelled(message: &str) -> Self {
        Self::new(false, message, false)
    }
}

/// Snapshot of the locally held session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub session_id: Option<String>,
    pub access_token_expires_at: Option<DateTime<Utc>>,
    pub is_authenticated: bool,
}

pub struct LogoutService {
    store: Arc<dyn TokenStore>,
    gateway: Arc<dyn AuthGateway>,
    auth: Arc<dyn AuthContext>,
    router: Option<Arc<dyn Router>>,
    platform: Arc<dyn Platform>,
    confirm: Option<ConfirmFn>,
}

impl LogoutService {
    pub fn new(
        store: Arc<dyn TokenStore>,
        gateway: Arc<dyn AuthGateway>,
        auth: Arc<dyn AuthContext>,
        router: Option<Arc<dyn Router>>,
        platform: Arc<dyn Platform>,
    ) -> Self {
        Self {
            store,
            gateway,
            auth,
            router,
            platform,
            confirm: None,
        }
    }

    /// Replace the platform prompt with `confirm`.
    pub fn with_confirm(mut self, confirm: ConfirmFn) -> Self {
        self.confirm = Some(confirm);
        self
    }

    pub async fn logout_current_session(&self, options: &LogoutOptions) -> LogoutOutcome {
        if options.show_confirmation == Some(true) && !self.ask(CONFIRM_LOGOUT).await {
            return LogoutOutcome::cancelled("Logout cancelled");
        }
        if let Some(reason) = &options.reason {
            info!(reason = %reason, "Logout requested");
        }
        if options.clear_all_data {
            self.wipe().await;
        }

        let remote_ok = match self.store.get() {
            Some(credential) => match self.gateway.logout(&credential.session_id).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Remote logout failed");
                    false
                }
            },
            None => {
                debug!("No stored session, skipping remote logout");
                true
            }
        };

        self.clear_local();
        self.navigate(redirect_target(options)).await;

        if remote_ok {
            LogoutOutcome::new(true, "Logged out successfully", true)
        } else {
            LogoutOutcome::new(false, "Logout completed with errors", true)
        }
    }

    pub async fn logout_all_devices(&self, options: &LogoutOptions) -> LogoutOutcome {
        if options.show_confirmation != Some(false) && !self.ask(CONFIRM_LOGOUT_ALL).await {
            return LogoutOutcome::cancelled("Logout cancelled");
        }
        if let Some(reason) = &options.reason {
            info!(reason = %reason, "Logout from all devices requested");
        }
        self.wipe().await;

        let remote_ok = match self.gateway.logout_all().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Remote logout-all failed");
                false
            }
        };

        self.clear_local();
        self.navigate(redirect_target(options)).await;

        if remote_ok {
            LogoutOutcome::new(true, "Logged out from all devices successfully", true)
        } else {
            LogoutOutcome::new(false, "Logout from all devices completed with errors", true)
        }
    }

    /// Revoke one session by id. Revoking the current session logs this
    /// client out as well, without a second prompt or remote call.
    pub async fn logout_session(&self, session_id: &str, options: &LogoutOptions) -> LogoutOutcome {
        if options.show_confirmation != Some(false) && !self.ask(CONFIRM_END_SESSION).await {
            return LogoutOutcome::cancelled("Session logout cancelled");
        }

        let is_current = self
            .store
            .get()
            .is_some_and(|credential| credential.session_id == session_id);

        if let Err(e) = self.gateway.revoke_session(session_id).await {
            warn!(session_id, error = %e, "Failed to revoke session");
            return LogoutOutcome::new(false, "Failed to revoke session", false);
        }
        info!(session_id, "Session revoked");

        if !is_current {
            return LogoutOutcome::new(true, "Session revoked successfully", false);
        }

        debug!("Revoked the current session, logging out locally");
        if options.clear_all_data {
            self.wipe().await;
        }
        self.clear_local();
        self.navigate(redirect_target(options)).await;
        LogoutOutcome::new(true, "Logged out successfully", true)
    }

    /// Local-only emergency logout. Always reports success.
    pub async fn force_logout(&self, reason: Option<&str>) -> LogoutOutcome {
        warn!(reason = reason.unwrap_or("No reason provided"), "Force logout triggered");

        let wiped = self.wipe().await;
        let cleared = self.clear_local();
        let routed = self.navigate(LOGIN_PATH).await;

        let message = if wiped && cleared && routed {
            "Force logout completed"
        } else {
            "Force logout completed with errors"
        };
        LogoutOutcome::new(true, message, true)
    }

    pub fn is_logged_in(&self) -> bool {
        self.auth.is_authenticated() && self.store.is_present()
    }

    pub fn current_session_info(&self) -> SessionInfo {
        let credential = self.store.get();
        SessionInfo {
            session_id: credential.as_ref().map(|c| c.session_id.clone()),
            access_token_expires_at: credential
                .as_ref()
                .and_then(|c| token::expiry(&c.access_token).ok()),
            is_authenticated: self.auth.is_authenticated() && credential.is_some(),
        }
    }

    async fn ask(&self, message: &str) -> bool {
        match &self.confirm {
            Some(confirm) => confirm(message),
            None => self.platform.confirm(message).await,
        }
    }

    /// Returns false if the credential could not be removed.
    fn clear_local(&self) -> bool {
        let cleared = match self.store.clear() {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to clear credential");
                false
            }
        };
        self.auth.clear_user();
        cleared
    }

    /// Navigate in-app, falling back to a hard redirect. Navigation always
    /// happens; returns false when the router failed.
    async fn navigate(&self, path: &str) -> bool {
        let Some(router) = &self.router else {
            self.platform.hard_redirect(path);
            return true;
        };
        match router.push(path).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, path, "Redirect failed, using hard redirect");
                self.platform.hard_redirect(path);
                false
            }
        }
    }

    /// Best-effort wipe of every client-side store. Returns false if any
    /// step failed.
    async fn wipe(&self) -> bool {
        let mut ok = true;

        if let Err(e) = self.platform.clear_local_storage() {
            warn!(error = %e, "Failed to clear local storage");
            ok = false;
        }
        if let Err(e) = self.platform.clear_session_storage() {
            warn!(error = %e, "Failed to clear session storage");
            ok = false;
        }

        match self.platform.cache_names().await {
            Ok(names) => {
                for name in names {
                    if let Err(e) = self.platform.delete_cache(&name).await {
                        warn!(cache = %name, error = %e, "Failed to delete cache");
                        ok = false;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to clear caches");
                ok = false;
            }
        }

        match self.platform.worker_registrations().await {
            Ok(ids) => {
                for id in ids {
                    if let Err(e) = self.platform.unregister_worker(&id).await {
                        warn!(worker = %id, error = %e, "Failed to unregister worker");
                        ok = false;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to unregister workers");
                ok = false;
            }
        }

        ok
    }
}

fn redirect_target(options: &LogoutOptions) -> &str {
    options.redirect_to.as_deref().unwrap_or(LOGIN_PATH)
}
