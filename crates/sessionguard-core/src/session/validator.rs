//! The validation protocol: local expiry check, refresh if needed,
//! server-side session lookup, liveness and expiry reconciliation.
//!
//! Each run walks `Idle -> Checking -> Refreshing -> Reconciling ->
//! Done | Invalid`. Runs never overlap: a second caller finds the busy flag
//! set and gets a "Validation in progress" result without touching the
//! network. Failures are encoded in the result; nothing here returns `Err`.
//! A result marked `invalidated` asks the caller to clear the credential.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::{ApiError, AuthGateway};
use crate::auth::{token, RefreshCoordinator, TokenStore};
use crate::config::LifecycleConfig;
use crate::error::SessionError;

use super::types::ValidationResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationPhase {
    Idle,
    Checking,
    Refreshing,
    Reconciling,
    Done,
    Invalid,
}

impl ValidationPhase {
    fn is_running(self) -> bool {
        matches!(
            self,
            ValidationPhase::Checking | ValidationPhase::Refreshing | ValidationPhase::Reconciling
        )
    }
}

/// Proof that the caller owns the busy flag. Dropping it releases the flag,
/// also when the run is cancelled mid-flight.
pub struct ValidationGuard<'a> {
    busy: &'a AtomicBool,
    phase: &'a Mutex<ValidationPhase>,
}

impl Drop for ValidationGuard<'_> {
    fn drop(&mut self) {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if phase.is_running() {
            *phase = ValidationPhase::Idle;
        }
        self.busy.store(false, Ordering::Release);
    }
}

pub struct SessionValidator {
    store: Arc<dyn TokenStore>,
    gateway: Arc<dyn AuthGateway>,
    refresher: Arc<RefreshCoordinator>,
    busy: AtomicBool,
    phase: Mutex<ValidationPhase>,
}

impl SessionValidator {
    pub fn new(
        store: Arc<dyn TokenStore>,
        gateway: Arc<dyn AuthGateway>,
        refresher: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            store,
            gateway,
            refresher,
            busy: AtomicBool::new(false),
            phase: Mutex::new(ValidationPhase::Idle),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> ValidationPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claim the busy flag, or `None` if a run is already in progress.
    pub fn begin(&self) -> Option<ValidationGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        self.set_phase(ValidationPhase::Checking);
        Some(ValidationGuard {
            busy: &self.busy,
            phase: &self.phase,
        })
    }

    /// Run the full protocol. Returns immediately when busy.
    pub async fn validate(&self, is_authenticated: bool, config: &LifecycleConfig) -> ValidationResult {
        match self.begin() {
            Some(guard) => self.run(guard, is_authenticated, config).await,
            None => {
                debug!("Session validation already in progress");
                ValidationResult::busy()
            }
        }
    }

    /// Run the protocol under a guard obtained from [`begin`](Self::begin).
    pub async fn run(
        &self,
        guard: ValidationGuard<'_>,
        is_authenticated: bool,
        config: &LifecycleConfig,
    ) -> ValidationResult {
        let result = self.check(is_authenticated, config).await;
        self.set_phase(if result.is_valid() {
            ValidationPhase::Done
        } else {
            ValidationPhase::Invalid
        });
        drop(guard);
        result
    }

    async fn check(&self, is_authenticated: bool, config: &LifecycleConfig) -> ValidationResult {
        if !is_authenticated {
            debug!("User not authenticated");
            return Self::fail(SessionError::NotAuthenticated, config);
        }

        let Some(credential) = self.store.get() else {
            info!("Missing authentication tokens");
            return Self::fail(SessionError::MissingCredential, config);
        };

        if token::expires_within(&credential.access_token, config.refresh_lookahead, Utc::now()) {
            self.set_phase(ValidationPhase::Refreshing);
            debug!("Access token expiring, attempting refresh");
            if let Err(e) = self.refresher.refresh().await {
                warn!(error = ?e.detail(), "Token refresh failed");
                return Self::fail(e, config);
            }
        }

        self.set_phase(ValidationPhase::Reconciling);
        let sessions = match self.gateway.list_sessions().await {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Server validation failed");
                let error = match e {
                    ApiError::InvalidResponse(detail) => SessionError::InvalidResponse(detail),
                    other => SessionError::NetworkError(other.to_string()),
                };
                return Self::fail(error, config);
            }
        };

        let Some(session) = sessions.into_iter().find(|s| s.id == credential.session_id) else {
            info!(session_id = %credential.session_id, "Current session not found on server");
            return Self::fail(SessionError::SessionNotFound, config);
        };

        if !session.is_active {
            info!(session_id = %session.id, "Current session is inactive");
            return Self::fail(SessionError::SessionInactive, config);
        }

        let remaining = session.time_until_expiry(Utc::now());
        if remaining <= chrono::Duration::zero() {
            // Marked active but past expiry: stale record or clock skew
            info!(session_id = %session.id, "Session has expired");
            return Self::fail(SessionError::SessionExpired, config);
        }

        let warning = chrono::Duration::from_std(config.warning_time_before_expiry)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let expiring_soon = config.show_expiry_warning && remaining <= warning;
        if expiring_soon {
            info!(minutes_left = remaining.num_minutes(), "Session expiring soon");
        }

        debug!(session_id = %session.id, "Session validation successful");
        ValidationResult::valid(session, expiring_soon)
    }

    /// Classify a failure and decide whether it calls for remediation.
    ///
    /// Nothing is cleared here. The caller clears the credential once it
    /// knows the result still applies.
    fn fail(error: SessionError, config: &LifecycleConfig) -> ValidationResult {
        let invalidate = match &error {
            SessionError::NetworkError(_) => config.auto_logout_on_network_error,
            SessionError::SessionExpired => config.auto_logout_on_expiry,
            // The coordinator has already cleared the credential
            SessionError::TokenRefreshFailed(_) => true,
            other => other.is_fatal() && config.auto_logout_on_invalid_session,
        };
        match error {
            SessionError::SessionExpired | SessionError::TokenRefreshFailed(_) => {
                ValidationResult::expired(error, invalidate)
            }
            _ => ValidationResult::invalid(error, invalidate),
        }
    }

    fn set_phase(&self, phase: ValidationPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::session::ValidationStatus;
    use crate::testing::{credential_expiring_in, server_session, FakeGateway};
    use chrono::Duration as ChronoDuration;
    use std::time::Duration;

    struct Fixture {
        gateway: Arc<FakeGateway>,
        store: Arc<MemoryTokenStore>,
        validator: SessionValidator,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(FakeGateway::new());
        let store = Arc::new(MemoryTokenStore::new());
        let refresher = Arc::new(RefreshCoordinator::new(store.clone(), gateway.clone()));
        let validator = SessionValidator::new(store.clone(), gateway.clone(), refresher);
        Fixture {
            gateway,
            store,
            validator,
        }
    }

    fn with_live_session(f: &Fixture, id: &str) {
        f.store
            .set(&credential_expiring_in(id, ChronoDuration::hours(1)))
            .unwrap();
        f.gateway
            .set_sessions(vec![server_session(id, true, ChronoDuration::hours(8))]);
    }

    #[tokio::test]
    async fn test_valid_session() {
        let f = fixture();
        with_live_session(&f, "sess-1");

        let result = f.validator.validate(true, &LifecycleConfig::default()).await;

        assert!(result.is_valid());
        assert_eq!(result.session().map(|s| s.id.as_str()), Some("sess-1"));
        assert!(!result.is_expiring_soon());
        assert!(!result.invalidated());
        assert_eq!(f.gateway.refresh_calls(), 0);
        assert_eq!(f.validator.phase(), ValidationPhase::Done);
        assert!(f.store.is_present());
    }

    #[tokio::test]
    async fn test_not_authenticated_has_no_side_effect() {
        let f = fixture();
        with_live_session(&f, "sess-1");

        let result = f.validator.validate(false, &LifecycleConfig::default()).await;

        assert!(result.is_invalid());
        assert_eq!(result.reason().as_deref(), Some("Not authenticated"));
        assert!(!result.invalidated());
        assert!(f.store.is_present());
        assert_eq!(f.gateway.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_tokens() {
        let f = fixture();

        let result = f.validator.validate(true, &LifecycleConfig::default()).await;

        assert!(result.is_invalid());
        assert_eq!(result.reason().as_deref(), Some("Missing tokens"));
        assert!(result.invalidated());
        assert_eq!(f.gateway.list_calls(), 0);
        assert_eq!(f.validator.phase(), ValidationPhase::Invalid);
    }

    #[tokio::test]
    async fn test_expiring_token_triggers_exactly_one_refresh() {
        let f = fixture();
        f.store
            .set(&credential_expiring_in("sess-1", ChronoDuration::seconds(60)))
            .unwrap();
        f.gateway
            .set_sessions(vec![server_session("sess-1", true, ChronoDuration::hours(8))]);
        f.gateway.set_refresh_token("at-refreshed");
        let config = LifecycleConfig {
            refresh_lookahead: Duration::from_secs(5 * 60),
            ..Default::default()
        };

        let result = f.validator.validate(true, &config).await;

        assert!(result.is_valid());
        assert_eq!(f.gateway.refresh_calls(), 1);
        assert_eq!(f.gateway.list_calls(), 1);
        assert_eq!(f.store.get().unwrap().access_token, "at-refreshed");
    }

    #[tokio::test]
    async fn test_refresh_failure_is_expired_and_clears() {
        let f = fixture();
        f.store
            .set(&credential_expiring_in("sess-1", ChronoDuration::seconds(30)))
            .unwrap();
        f.gateway.fail_refresh();

        let result = f.validator.validate(true, &LifecycleConfig::default()).await;

        assert_eq!(result.status(), ValidationStatus::Expired);
        assert_eq!(result.reason().as_deref(), Some("Token refresh failed"));
        assert!(result.invalidated());
        assert!(f.store.get().is_none());
        assert_eq!(f.gateway.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_session_forces_logout() {
        let f = fixture();
        f.store
            .set(&credential_expiring_in("sess-42", ChronoDuration::hours(1)))
            .unwrap();
        f.gateway
            .set_sessions(vec![server_session("sess-7", true, ChronoDuration::hours(8))]);

        let result = f.validator.validate(true, &LifecycleConfig::default()).await;

        assert!(!result.is_valid());
        assert!(result.is_invalid());
        assert_eq!(result.reason().as_deref(), Some("Session not found"));
        assert!(result.invalidated());
        assert!(f.store.is_present(), "clearing is left to the caller");
    }

    #[tokio::test]
    async fn test_inactive_session() {
        let f = fixture();
        f.store
            .set(&credential_expiring_in("sess-1", ChronoDuration::hours(1)))
            .unwrap();
        f.gateway
            .set_sessions(vec![server_session("sess-1", false, ChronoDuration::hours(8))]);

        let result = f.validator.validate(true, &LifecycleConfig::default()).await;

        assert!(result.is_invalid());
        assert_eq!(result.reason().as_deref(), Some("Session inactive"));
        assert!(result.invalidated());
        assert!(f.store.is_present());
    }

    #[tokio::test]
    async fn test_active_but_past_expiry_is_expired() {
        let f = fixture();
        f.store
            .set(&credential_expiring_in("sess-1", ChronoDuration::hours(1)))
            .unwrap();
        f.gateway
            .set_sessions(vec![server_session("sess-1", true, ChronoDuration::seconds(-5))]);

        let result = f.validator.validate(true, &LifecycleConfig::default()).await;

        assert!(result.is_expired());
        assert_eq!(result.reason().as_deref(), Some("Session expired"));
        assert!(result.invalidated());

        let lenient = LifecycleConfig {
            auto_logout_on_expiry: false,
            ..Default::default()
        };
        let result = f.validator.validate(true, &lenient).await;
        assert!(result.is_expired());
        assert!(!result.invalidated());
    }

    #[tokio::test]
    async fn test_expiring_soon_flag() {
        let f = fixture();
        f.store
            .set(&credential_expiring_in("sess-1", ChronoDuration::hours(1)))
            .unwrap();
        f.gateway
            .set_sessions(vec![server_session("sess-1", true, ChronoDuration::minutes(3))]);

        let result = f.validator.validate(true, &LifecycleConfig::default()).await;
        assert!(result.is_valid());
        assert!(result.is_expiring_soon());

        let quiet = LifecycleConfig {
            show_expiry_warning: false,
            ..Default::default()
        };
        let result = f.validator.validate(true, &quiet).await;
        assert!(result.is_valid());
        assert!(!result.is_expiring_soon());
    }

    #[tokio::test]
    async fn test_network_error_respects_policy() {
        let f = fixture();
        f.store
            .set(&credential_expiring_in("sess-1", ChronoDuration::hours(1)))
            .unwrap();
        f.gateway.fail_sessions();

        let lenient = LifecycleConfig {
            auto_logout_on_network_error: false,
            ..Default::default()
        };
        let result = f.validator.validate(true, &lenient).await;
        assert!(result.is_invalid());
        assert_eq!(result.reason().as_deref(), Some("Network error"));
        assert!(!result.invalidated());

        let result = f.validator.validate(true, &LifecycleConfig::default()).await;
        assert_eq!(result.reason().as_deref(), Some("Network error"));
        assert!(result.invalidated());
        assert!(f.store.is_present());
    }

    #[tokio::test]
    async fn test_undecodable_list_is_not_a_logout() {
        let f = fixture();
        f.store
            .set(&credential_expiring_in("sess-1", ChronoDuration::hours(1)))
            .unwrap();
        f.gateway.garble_sessions();

        let result = f.validator.validate(true, &LifecycleConfig::default()).await;

        assert!(result.is_invalid());
        assert_eq!(result.reason().as_deref(), Some("Invalid server response"));
        assert!(!result.invalidated());
        assert!(f.store.is_present());
    }

    #[tokio::test]
    async fn test_invalid_session_policy_off_reports_only() {
        let f = fixture();
        f.store
            .set(&credential_expiring_in("sess-1", ChronoDuration::hours(1)))
            .unwrap();
        f.gateway.set_sessions(Vec::new());
        let lenient = LifecycleConfig {
            auto_logout_on_invalid_session: false,
            ..Default::default()
        };

        let result = f.validator.validate(true, &lenient).await;
        assert_eq!(result.reason().as_deref(), Some("Session not found"));
        assert!(!result.invalidated());

        f.store.clear().unwrap();
        let result = f.validator.validate(true, &lenient).await;
        assert_eq!(result.reason().as_deref(), Some("Missing tokens"));
        assert!(!result.invalidated());
    }

    #[tokio::test]
    async fn test_busy_validation_short_circuits() {
        let f = fixture();
        with_live_session(&f, "sess-1");

        let guard = f.validator.begin().expect("first caller gets the flag");
        assert!(f.validator.is_busy());

        let result = f.validator.validate(true, &LifecycleConfig::default()).await;
        assert!(result.is_invalid());
        assert_eq!(result.reason().as_deref(), Some("Validation in progress"));
        assert_eq!(f.gateway.list_calls(), 0);

        drop(guard);
        assert!(!f.validator.is_busy());
        assert_eq!(f.validator.phase(), ValidationPhase::Idle);
    }

    #[tokio::test]
    async fn test_overlapping_validations_only_one_runs() {
        let f = fixture();
        with_live_session(&f, "sess-1");
        f.gateway.set_delay(Duration::from_millis(30));
        let config = LifecycleConfig::default();

        let (first, second) = tokio::join!(
            f.validator.validate(true, &config),
            f.validator.validate(true, &config)
        );

        assert!(first.is_valid());
        assert_eq!(second.reason().as_deref(), Some("Validation in progress"));
        assert_eq!(f.gateway.list_calls(), 1);
        assert!(!f.validator.is_busy());
    }

    #[tokio::test]
    async fn test_cancelled_run_releases_busy_flag() {
        let f = fixture();
        with_live_session(&f, "sess-1");
        f.gateway.set_delay(Duration::from_millis(200));
        let config = LifecycleConfig::default();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), f.validator.validate(true, &config)).await;
        assert!(timed_out.is_err());
        assert!(!f.validator.is_busy());
        assert_eq!(f.validator.phase(), ValidationPhase::Idle);
    }
}
