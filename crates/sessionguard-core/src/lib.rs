//! sessionguard core - keeps a bearer-token session valid for a client app.
//!
//! The pieces, leaves first:
//! - `auth`: credential storage, token claims, single-flight refresh, user context
//! - `api`: the HTTP gateway to the auth endpoints
//! - `session`: server-side reconciliation and the lifecycle manager
//! - `logout`: the four logout modes
//! - `platform`: router and environment access behind traits

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod logout;
pub mod platform;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use api::{ApiClient, ApiError, AuthGateway};
pub use auth::{
    AuthContext, Credential, FileTokenStore, KeyringTokenStore, LoginError, MemoryTokenStore,
    RefreshCoordinator, TokenStore, User, UserContext,
};
pub use config::{AppConfig, LifecycleConfig, LifecycleConfigPatch, TokenBackend};
pub use error::SessionError;
pub use logout::{ConfirmFn, LogoutOptions, LogoutOutcome, LogoutService, SessionInfo};
pub use platform::{HeadlessPlatform, Platform, PlatformError, Route, Router};
pub use session::{
    redirect_destination, LifecycleManager, LifecycleState, PageEvent, Session, SessionValidator,
    ValidationPhase, ValidationResult, ValidationStatus,
};
