//! Session lifecycle: triggers, state and remediation.
//!
//! `LifecycleManager` runs the validator on page events and on a timer,
//! publishes a `LifecycleState` snapshot through a watch channel, and when a
//! run invalidates the session it clears the user and redirects to login.
//!
//! Background tasks hold only a `Weak` reference, so dropping every manager
//! handle stops them. `destroy` aborts them explicitly.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::AuthGateway;
use crate::auth::{AuthContext, RefreshCoordinator, TokenStore};
use crate::config::{LifecycleConfig, LifecycleConfigPatch};
use crate::platform::{Platform, Route, Router};

use super::types::{Session, ValidationResult};
use super::validator::SessionValidator;

/// Page events buffered before the listener drains them.
const EVENT_CHANNEL_CAPACITY: usize = 32;

const LOGIN_PATH: &str = "/login";
const HOME_PATH: &str = "/";

/// Environmental triggers fed to the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageEvent {
    Focus,
    VisibilityChanged { visible: bool },
    RouteChanged { path: String, full_path: String },
    BeforeUnload,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LifecycleState {
    pub is_initialized: bool,
    pub is_validation_in_progress: bool,
    pub last_validation_time: Option<DateTime<Utc>>,
    pub current_session: Option<Session>,
    pub session_expiry_time: Option<DateTime<Utc>>,
    pub is_session_expiring: bool,
    pub is_session_expired: bool,
}

/// Where to send the user after an automatic logout, or `None` to stay put.
pub fn redirect_destination(config: &LifecycleConfig, current: Option<&Route>) -> Option<String> {
    if config.redirect_to_home_on_logout {
        return Some(HOME_PATH.to_string());
    }
    if !config.redirect_to_login_on_logout {
        return None;
    }
    match current {
        Some(route) if config.preserve_current_route && route.path != HOME_PATH => Some(format!(
            "{}?redirect={}",
            LOGIN_PATH,
            urlencoding::encode(&route.full_path)
        )),
        _ => Some(LOGIN_PATH.to_string()),
    }
}

#[derive(Default)]
struct Tasks {
    listener: Option<JoinHandle<()>>,
    interval: Option<JoinHandle<()>>,
}

struct Inner {
    store: Arc<dyn TokenStore>,
    platform: Arc<dyn Platform>,
    validator: SessionValidator,
    config: RwLock<LifecycleConfig>,
    state: watch::Sender<LifecycleState>,
    initialized: AtomicBool,
    // Advances on destroy and on every remediation. A validation that started
    // under an older epoch must not remediate.
    epoch: AtomicU64,
    router: RwLock<Option<Arc<dyn Router>>>,
    auth: RwLock<Option<Arc<dyn AuthContext>>>,
    events_tx: mpsc::Sender<PageEvent>,
    events_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PageEvent>>>,
    tasks: Mutex<Tasks>,
}

impl Inner {
    fn router(&self) -> Option<Arc<dyn Router>> {
        self.router.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn auth(&self) -> Option<Arc<dyn AuthContext>> {
        self.auth.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, Tasks> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Owns the session lifecycle for one client. Clone is cheap and every clone
/// drives the same manager.
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<Inner>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn TokenStore>,
        gateway: Arc<dyn AuthGateway>,
        platform: Arc<dyn Platform>,
        config: LifecycleConfig,
    ) -> Self {
        let refresher = Arc::new(RefreshCoordinator::new(store.clone(), gateway.clone()));
        let validator = SessionValidator::new(store.clone(), gateway, refresher);
        let (state, _) = watch::channel(LifecycleState::default());
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(Inner {
                store,
                platform,
                validator,
                config: RwLock::new(config),
                state,
                initialized: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                router: RwLock::new(None),
                auth: RwLock::new(None),
                events_tx,
                events_rx: Arc::new(tokio::sync::Mutex::new(events_rx)),
                tasks: Mutex::new(Tasks::default()),
            }),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Start listening for events and the interval timer, then validate once.
    /// A second call while initialized does nothing.
    pub async fn initialize(&self, router: Option<Arc<dyn Router>>, auth: Arc<dyn AuthContext>) {
        if self
            .inner
            .initialized
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Session lifecycle manager already initialized");
            return;
        }

        info!("Initializing session lifecycle manager");
        if let Some(router) = router {
            *self.inner.router.write().unwrap_or_else(|e| e.into_inner()) = Some(router);
        }
        *self.inner.auth.write().unwrap_or_else(|e| e.into_inner()) = Some(auth);
        self.inner.state.send_modify(|s| s.is_initialized = true);

        self.spawn_listener();
        self.restart_interval();

        self.validate_session().await;
    }

    /// Stop all tasks and reset state. Idempotent.
    pub fn destroy(&self) {
        if self
            .inner
            .initialized
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        info!("Destroying session lifecycle manager");
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        {
            let mut tasks = self.inner.tasks();
            if let Some(handle) = tasks.interval.take() {
                handle.abort();
            }
            if let Some(handle) = tasks.listener.take() {
                handle.abort();
            }
        }
        self.inner.state.send_replace(LifecycleState::default());
    }

    pub fn config(&self) -> LifecycleConfig {
        self.inner.config.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Merge `patch` into the configuration. The interval timer is restarted
    /// or stopped when its flag or period changed.
    pub fn update_config(&self, patch: &LifecycleConfigPatch) {
        let (old, new) = {
            let mut config = self.inner.config.write().unwrap_or_else(|e| e.into_inner());
            let old = config.clone();
            *config = patch.apply(&old);
            (old, config.clone())
        };
        debug!(config = ?new, "Configuration updated");

        if old.validate_on_interval != new.validate_on_interval
            || old.validation_interval != new.validation_interval
        {
            self.restart_interval();
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.inner.state.subscribe()
    }

    /// Sender for page events. Events are processed while initialized.
    pub fn events(&self) -> mpsc::Sender<PageEvent> {
        self.inner.events_tx.clone()
    }

    /// Whether the interval timer task is running.
    pub fn is_interval_running(&self) -> bool {
        self.inner
            .tasks()
            .interval
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// React to one page event. Returns the validation result when the event
    /// triggered a run.
    pub async fn handle_event(&self, event: PageEvent) -> Option<ValidationResult> {
        if !self.is_initialized() {
            return None;
        }
        let config = self.config();
        match event {
            PageEvent::Focus if config.validate_on_page_focus => {
                debug!("Page focused, validating session");
            }
            PageEvent::VisibilityChanged { visible: true } => {
                debug!("Page became visible, validating session");
            }
            PageEvent::RouteChanged { ref full_path, .. } if config.validate_on_route_change => {
                debug!(route = %full_path, "Route changed, validating session");
            }
            PageEvent::BeforeUnload => {
                debug!("Page unloading, cleaning up session lifecycle");
                self.destroy();
                return None;
            }
            _ => return None,
        }
        Some(self.validate_session().await)
    }

    /// Run one validation and remediate if it invalidated the session.
    pub async fn validate_session(&self) -> ValidationResult {
        let inner = &self.inner;
        let Some(guard) = inner.validator.begin() else {
            debug!("Session validation already in progress");
            return ValidationResult::busy();
        };

        let epoch = inner.epoch.load(Ordering::Acquire);
        let before = inner.store.get();
        let config = self.config();
        let authenticated = inner.auth().is_some_and(|auth| auth.is_authenticated());
        inner
            .state
            .send_if_modified(|s| !std::mem::replace(&mut s.is_validation_in_progress, true));

        let result = inner.validator.run(guard, authenticated, &config).await;

        // A different login stored mid-run makes the result stale
        let relogged = match (&before, inner.store.get()) {
            (Some(before), Some(now)) => !before.same_login(&now),
            (None, Some(_)) => true,
            _ => false,
        };
        let superseded = !self.is_initialized()
            || inner.epoch.load(Ordering::Acquire) != epoch
            || relogged;
        if superseded {
            debug!("Validation result superseded, skipping remediation");
            inner
                .state
                .send_if_modified(|s| std::mem::replace(&mut s.is_validation_in_progress, false));
            return result;
        }

        inner.state.send_modify(|s| {
            s.is_validation_in_progress = false;
            s.last_validation_time = Some(Utc::now());
            if let Some(session) = result.session() {
                s.current_session = Some(session.clone());
                s.session_expiry_time = Some(session.expires_at);
                s.is_session_expiring = result.is_expiring_soon();
                s.is_session_expired = false;
            }
        });

        if result.invalidated() {
            let reason = result.reason().unwrap_or_default();
            self.remediate(&reason).await;
        }
        result
    }

    /// Clear the session locally and redirect, as an invalidation would.
    pub async fn force_logout(&self, reason: &str) {
        info!(reason, "Force logout triggered");
        self.remediate(reason).await;
    }

    /// Validate now and report whether the session is still good.
    pub async fn refresh_session(&self) -> bool {
        debug!("Manual session refresh requested");
        self.validate_session().await.is_valid()
    }

    async fn remediate(&self, reason: &str) {
        let inner = &self.inner;
        warn!(reason, "Session invalid, logging out");
        inner.epoch.fetch_add(1, Ordering::AcqRel);

        if let Err(e) = inner.store.clear() {
            warn!(error = %e, "Failed to clear credential");
        }
        if let Some(auth) = inner.auth() {
            auth.clear_user();
        }
        inner.state.send_modify(|s| {
            s.current_session = None;
            s.session_expiry_time = None;
            s.is_session_expiring = false;
            s.is_session_expired = true;
        });

        self.redirect_after_logout().await;
    }

    async fn redirect_after_logout(&self) {
        let config = self.config();
        let Some(router) = self.inner.router() else {
            if let Some(path) = redirect_destination(&config, None) {
                debug!(path = %path, "Router not available, using hard redirect");
                self.inner.platform.hard_redirect(&path);
            }
            return;
        };

        let current = router.current_route();
        let Some(path) = redirect_destination(&config, current.as_ref()) else {
            return;
        };
        info!(path = %path, "Redirecting after logout");
        if let Err(e) = router.push(&path).await {
            warn!(error = %e, "Error redirecting after logout, using hard redirect");
            self.inner.platform.hard_redirect(&path);
        }
    }

    fn spawn_listener(&self) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let events = self.inner.events_rx.clone();
        let handle = tokio::spawn(async move {
            let mut events = events.lock().await;
            while let Some(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let manager = LifecycleManager { inner };
                if event == PageEvent::BeforeUnload {
                    manager.handle_event(event).await;
                    break;
                }
                tokio::spawn(async move {
                    manager.handle_event(event).await;
                });
            }
        });
        if let Some(old) = self.inner.tasks().listener.replace(handle) {
            old.abort();
        }
    }

    fn restart_interval(&self) {
        let config = self.config();
        let mut tasks = self.inner.tasks();
        if let Some(handle) = tasks.interval.take() {
            handle.abort();
            debug!("Stopped validation interval");
        }

        if !self.is_initialized() || !config.validate_on_interval {
            return;
        }
        let period = config.validation_interval;
        if period.is_zero() {
            warn!("Validation interval is zero, not starting timer");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, validation interval not started");
            return;
        };

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        tasks.interval = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                debug!("Validation interval triggered");
                LifecycleManager { inner }.validate_session().await;
            }
        }));
        debug!(period_ms = period.as_millis() as u64, "Started validation interval");
    }
}
