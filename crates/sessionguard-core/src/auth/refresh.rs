//! Single-flight access token refresh.
//!
//! Every caller that arrives while a refresh is pending awaits the same
//! shared future, so N overlapping calls cost one `/auth/refresh` request and
//! all observe one outcome. The pending slot empties itself when the
//! refresh settles, inside the shared future, so a caller arriving after
//! settlement always starts a fresh attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::api::AuthGateway;
use crate::error::SessionError;

use super::credentials::{Credential, TokenStore};
use super::token;

type RefreshResult = Result<String, SessionError>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshResult>>;

struct InFlight {
    id: u64,
    future: PendingRefresh,
}

pub struct RefreshCoordinator {
    store: Arc<dyn TokenStore>,
    gateway: Arc<dyn AuthGateway>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    next_id: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(store: Arc<dyn TokenStore>, gateway: Arc<dyn AuthGateway>) -> Self {
        Self {
            store,
            gateway,
            in_flight: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(0),
        }
    }

    /// Whether a refresh is currently pending.
    pub fn is_refreshing(&self) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Obtain a new access token, joining any refresh already in flight.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::TokenRefreshFailed` when no credential is
    /// stored or the remote call fails. The stored credential has been
    /// cleared by the time the error is observed.
    pub async fn refresh(&self) -> RefreshResult {
        let pending = {
            let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(in_flight) => {
                    debug!(refresh_id = in_flight.id, "Joining in-flight token refresh");
                    in_flight.future.clone()
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    let future = Self::settle(
                        id,
                        Arc::clone(&self.store),
                        Arc::clone(&self.gateway),
                        Arc::clone(&self.in_flight),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(InFlight {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        pending.await
    }

    /// An access token good for at least `lookahead`, refreshing first when
    /// the stored one is about to expire. `None` when signed out or the
    /// refresh failed.
    pub async fn ensure_valid_token(&self, lookahead: Duration) -> Option<String> {
        let credential = self.store.get()?;
        if !token::expires_within(&credential.access_token, lookahead, Utc::now()) {
            return Some(credential.access_token);
        }
        match self.refresh().await {
            Ok(access_token) => Some(access_token),
            Err(e) => {
                warn!(error = ?e.detail(), "Could not obtain a valid access token");
                None
            }
        }
    }

    async fn settle(
        id: u64,
        store: Arc<dyn TokenStore>,
        gateway: Arc<dyn AuthGateway>,
        slot: Arc<Mutex<Option<InFlight>>>,
    ) -> RefreshResult {
        debug!(refresh_id = id, "Starting token refresh");
        let result = Self::perform(store.as_ref(), gateway.as_ref()).await;

        let mut slot = slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|f| f.id == id) {
            *slot = None;
        }
        result
    }

    async fn perform(store: &dyn TokenStore, gateway: &dyn AuthGateway) -> RefreshResult {
        let Some(credential) = store.get() else {
            warn!("No refresh token available");
            Self::invalidate(store, None);
            return Err(SessionError::TokenRefreshFailed(
                "No refresh token available".to_string(),
            ));
        };

        let access_token = match gateway.refresh(&credential.refresh_token).await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "Token refresh rejected");
                Self::invalidate(store, Some(&credential));
                return Err(SessionError::TokenRefreshFailed(e.to_string()));
            }
        };

        // The credential may have been cleared or replaced while the request
        // was in flight. Only write back onto the credential we refreshed.
        match store.get() {
            Some(current) if current.same_login(&credential) => {
                if let Err(e) = store.set(&current.with_access_token(access_token.clone())) {
                    warn!(error = %e, "Failed to store refreshed access token");
                    Self::invalidate(store, Some(&credential));
                    return Err(SessionError::TokenRefreshFailed(e.to_string()));
                }
                info!(session_id = %credential.session_id, "Access token refreshed");
                Ok(access_token)
            }
            Some(_) => {
                debug!("Credential replaced during refresh, discarding result");
                Err(SessionError::TokenRefreshFailed(
                    "Credential replaced during refresh".to_string(),
                ))
            }
            None => {
                debug!("Credential cleared during refresh, discarding result");
                Err(SessionError::TokenRefreshFailed(
                    "Credential cleared during refresh".to_string(),
                ))
            }
        }
    }

    /// Clear the store unless a different login has replaced `refreshed`.
    fn invalidate(store: &dyn TokenStore, refreshed: Option<&Credential>) {
        if let (Some(current), Some(refreshed)) = (store.get(), refreshed) {
            if !current.same_login(refreshed) {
                return;
            }
        }
        if let Err(e) = store.clear() {
            warn!(error = %e, "Failed to clear credential after refresh failure");
        }
    }
}
