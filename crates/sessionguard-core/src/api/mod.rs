//! REST API client module for the auth service.
//!
//! This module provides the `AuthGateway` boundary the session machinery
//! talks through, and `ApiClient`, its reqwest implementation.
//!
//! The API uses bearer token authentication: the access token for
//! session endpoints, the refresh token for `/auth/refresh`.

pub mod client;
pub mod error;

pub use client::{ApiClient, AuthGateway, AuthResponse, LoginRequest, RegisterRequest};
pub use error::ApiError;
