//! Authentication module for managing credentials and the signed-in user.
//!
//! This module provides:
//! - `TokenStore`: all-or-nothing storage for the three-part credential,
//!   backed by memory, a JSON file, or the OS keychain
//! - `token`: unsigned expiry-claim decoding for access tokens
//! - `RefreshCoordinator`: single-flight access token refresh
//! - `UserContext`: the signed-in user, login and registration

pub mod context;
pub mod credentials;
pub mod file;
pub mod refresh;
pub mod token;

pub use context::{AuthContext, LoginError, User, UserContext};
pub use credentials::{
    Credential, KeyringTokenStore, MemoryTokenStore, StoreError, TokenStore, ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY, SESSION_ID_KEY,
};
pub use file::FileTokenStore;
pub use refresh::RefreshCoordinator;
