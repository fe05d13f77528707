//! Shared fakes and fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};

use crate::api::{ApiError, AuthGateway, AuthResponse, LoginRequest, RegisterRequest};
use crate::auth::{AuthContext, Credential, User};
use crate::platform::{Platform, PlatformError, Route, Router};
use crate::session::Session;

// ============================================================================
// Tokens and records
// ============================================================================

pub fn token_expiring_at(exp: DateTime<Utc>) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u-1","exp":{}}}"#, exp.timestamp()));
    format!("{}.{}.signature", header, payload)
}

pub fn credential_expiring_in(session_id: &str, ttl: chrono::Duration) -> Credential {
    Credential {
        access_token: token_expiring_at(Utc::now() + ttl),
        refresh_token: format!("rt-{}", session_id),
        session_id: session_id.to_string(),
    }
}

/// A credential whose access token is good for an hour.
pub fn credential(session_id: &str) -> Credential {
    credential_expiring_in(session_id, chrono::Duration::hours(1))
}

pub fn server_session(id: &str, active: bool, expires_in: chrono::Duration) -> Session {
    let now = Utc::now();
    Session {
        id: id.to_string(),
        user_id: "7".to_string(),
        device_info: "Firefox on Linux".to_string(),
        ip_address: "10.0.0.2".to_string(),
        is_active: active,
        expires_at: now + expires_in,
        created_at: Some(now - chrono::Duration::days(1)),
        last_used_at: Some(now),
    }
}

// ============================================================================
// Gateway
// ============================================================================

#[derive(Default)]
struct Script {
    refresh_token: Option<String>,
    sessions: Vec<Session>,
    delay: Option<Duration>,
    revoked: Vec<String>,
}

/// Scripted `AuthGateway` with per-endpoint call counters.
#[derive(Default)]
pub struct FakeGateway {
    script: Mutex<Script>,
    fail_refresh: AtomicBool,
    fail_sessions: AtomicBool,
    garble_sessions: AtomicBool,
    fail_login: AtomicBool,
    fail_logout: AtomicBool,
    fail_logout_all: AtomicBool,
    fail_revoke: AtomicBool,
    login_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    list_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    logout_all_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_refresh_token(&self, token: &str) {
        self.script().refresh_token = Some(token.to_string());
    }

    pub fn set_sessions(&self, sessions: Vec<Session>) {
        self.script().sessions = sessions;
    }

    /// Delay applied to refresh and session-list calls.
    pub fn set_delay(&self, delay: Duration) {
        self.script().delay = Some(delay);
    }

    pub fn fail_refresh(&self) {
        self.fail_refresh.store(true, Ordering::SeqCst);
    }

    pub fn fail_sessions(&self) {
        self.fail_sessions.store(true, Ordering::SeqCst);
    }

    /// Session list answers with a body that does not decode.
    pub fn garble_sessions(&self) {
        self.garble_sessions.store(true, Ordering::SeqCst);
    }

    pub fn fail_login(&self) {
        self.fail_login.store(true, Ordering::SeqCst);
    }

    pub fn fail_logout(&self) {
        self.fail_logout.store(true, Ordering::SeqCst);
    }

    pub fn fail_logout_all(&self) {
        self.fail_logout_all.store(true, Ordering::SeqCst);
    }

    pub fn fail_revoke(&self) {
        self.fail_revoke.store(true, Ordering::SeqCst);
    }

    pub fn login_calls(&self) -> usize {
        self.login_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    pub fn logout_all_calls(&self) -> usize {
        self.logout_all_calls.load(Ordering::SeqCst)
    }

    pub fn revoke_calls(&self) -> usize {
        self.revoke_calls.load(Ordering::SeqCst)
    }

    pub fn revoked(&self) -> Vec<String> {
        self.script().revoked.clone()
    }

    async fn pause(&self) {
        let delay = self.script().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn auth_response(email: &str) -> AuthResponse {
        AuthResponse {
            user: User {
                id: "7".to_string(),
                email: email.to_string(),
                first_name: None,
                last_name: None,
                role: Some("buyer".to_string()),
                email_verified: true,
                status: None,
            },
            access_token: token_expiring_at(Utc::now() + chrono::Duration::hours(1)),
            refresh_token: "rt-login".to_string(),
            session_id: "sess-login".to_string(),
        }
    }
}

#[async_trait]
impl AuthGateway for FakeGateway {
    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }
        Ok(Self::auth_response(&request.email))
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        Ok(Self::auth_response(&request.email))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<String, ApiError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(ApiError::Unauthorized);
        }
        let token = self.script().refresh_token.clone();
        Ok(token.unwrap_or_else(|| token_expiring_at(Utc::now() + chrono::Duration::hours(1))))
    }

    async fn logout(&self, _session_id: &str) -> Result<(), ApiError> {
        self.logout_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout.load(Ordering::SeqCst) {
            return Err(ApiError::ServerError("logout failed".to_string()));
        }
        Ok(())
    }

    async fn logout_all(&self) -> Result<(), ApiError> {
        self.logout_all_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_logout_all.load(Ordering::SeqCst) {
            return Err(ApiError::ServerError("logout-all failed".to_string()));
        }
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.fail_sessions.load(Ordering::SeqCst) {
            return Err(ApiError::ServerError("unreachable".to_string()));
        }
        if self.garble_sessions.load(Ordering::SeqCst) {
            return Err(ApiError::InvalidResponse("expected value at line 1".to_string()));
        }
        Ok(self.script().sessions.clone())
    }

    async fn revoke_session(&self, session_id: &str) -> Result<(), ApiError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(ApiError::NotFound(session_id.to_string()));
        }
        self.script().revoked.push(session_id.to_string());
        Ok(())
    }
}

// ============================================================================
// Router, platform, auth context
// ============================================================================

#[derive(Default)]
pub struct RecordingRouter {
    route: Mutex<Option<Route>>,
    pushes: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingRouter {
    pub fn at(full_path: &str) -> Self {
        let router = Self::default();
        *router.route.lock().unwrap_or_else(|e| e.into_inner()) = Some(Route::new(full_path));
        router
    }

    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    pub fn pushes(&self) -> Vec<String> {
        self.pushes.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Router for RecordingRouter {
    fn current_route(&self) -> Option<Route> {
        self.route.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn push(&self, path: &str) -> Result<(), PlatformError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PlatformError::Navigation("router unavailable".to_string()));
        }
        self.pushes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_string());
        *self.route.lock().unwrap_or_else(|e| e.into_inner()) = Some(Route::new(path));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePlatform {
    redirects: Mutex<Vec<String>>,
    caches: Mutex<Vec<String>>,
    workers: Mutex<Vec<String>>,
    decline: AtomicBool,
    fail_caches: AtomicBool,
    confirm_calls: AtomicUsize,
    local_clears: AtomicUsize,
    session_clears: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_caches(self, names: &[&str]) -> Self {
        *self.caches.lock().unwrap_or_else(|e| e.into_inner()) =
            names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn with_workers(self, ids: &[&str]) -> Self {
        *self.workers.lock().unwrap_or_else(|e| e.into_inner()) =
            ids.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn declining(self) -> Self {
        self.decline.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_caches(self) -> Self {
        self.fail_caches.store(true, Ordering::SeqCst);
        self
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn caches(&self) -> Vec<String> {
        self.caches.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn workers(&self) -> Vec<String> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn confirm_calls(&self) -> usize {
        self.confirm_calls.load(Ordering::SeqCst)
    }

    pub fn local_clears(&self) -> usize {
        self.local_clears.load(Ordering::SeqCst)
    }

    pub fn session_clears(&self) -> usize {
        self.session_clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Platform for FakePlatform {
    fn hard_redirect(&self, path: &str) {
        self.redirects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(path.to_string());
    }

    async fn confirm(&self, _message: &str) -> bool {
        self.confirm_calls.fetch_add(1, Ordering::SeqCst);
        !self.decline.load(Ordering::SeqCst)
    }

    fn clear_local_storage(&self) -> Result<(), PlatformError> {
        self.local_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear_session_storage(&self) -> Result<(), PlatformError> {
        self.session_clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn cache_names(&self) -> Result<Vec<String>, PlatformError> {
        if self.fail_caches.load(Ordering::SeqCst) {
            return Err(PlatformError::Cache("cache storage unavailable".to_string()));
        }
        Ok(self.caches())
    }

    async fn delete_cache(&self, name: &str) -> Result<(), PlatformError> {
        self.caches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|n| n != name);
        Ok(())
    }

    async fn worker_registrations(&self) -> Result<Vec<String>, PlatformError> {
        Ok(self.workers())
    }

    async fn unregister_worker(&self, id: &str) -> Result<(), PlatformError> {
        self.workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|w| w != id);
        Ok(())
    }
}

/// Auth context with a fixed answer and a count of `clear_user` calls.
pub struct FakeAuth {
    authenticated: AtomicBool,
    clears: AtomicUsize,
}

impl FakeAuth {
    pub fn signed_in() -> Self {
        Self {
            authenticated: AtomicBool::new(true),
            clears: AtomicUsize::new(0),
        }
    }

    pub fn signed_out() -> Self {
        Self {
            authenticated: AtomicBool::new(false),
            clears: AtomicUsize::new(0),
        }
    }

    pub fn clear_calls(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl AuthContext for FakeAuth {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn clear_user(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.authenticated.store(false, Ordering::SeqCst);
    }
}
