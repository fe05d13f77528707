//! API client for communicating with the auth REST API.
//!
//! `AuthGateway` is the boundary the refresh, validation and logout paths
//! depend on; `ApiClient` implements it over reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use crate::auth::{Credential, TokenStore, User};
use crate::session::Session;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
/// The core imposes no timeout of its own, so the transport's applies.
const REQUEST_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
}

/// Body returned by login and register.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
    pub session_id: String,
}

impl AuthResponse {
    pub fn credential(&self) -> Credential {
        Credential {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SessionsResponse {
    sessions: Vec<Session>,
}

#[derive(Debug, Serialize)]
struct LogoutBody<'a> {
    session_id: &'a str,
}

// ============================================================================
// Gateway Boundary
// ============================================================================

/// The HTTP boundary of the auth service.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError>;

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError>;

    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> Result<String, ApiError>;

    async fn logout(&self, session_id: &str) -> Result<(), ApiError>;

    async fn logout_all(&self) -> Result<(), ApiError>;

    async fn list_sessions(&self) -> Result<Vec<Session>, ApiError>;

    async fn revoke_session(&self, session_id: &str) -> Result<(), ApiError>;
}

// ============================================================================
// reqwest Implementation
// ============================================================================

/// API client for the auth service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    tokens: Option<Arc<dyn TokenStore>>,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url` (e.g. `http://host/api`)
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens: None,
        })
    }

    /// Read the bearer access token from `store` on every request, so a
    /// refreshed token is picked up without rebuilding the client.
    pub fn with_token_store(&self, store: Arc<dyn TokenStore>) -> Self {
        Self {
            client: self.client.clone(), // Cheap clone, shares connection pool
            base_url: self.base_url.clone(),
            tokens: Some(store),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, ApiError> {
        let mut headers = header::HeaderMap::new();
        let token = self
            .tokens
            .as_ref()
            .and_then(|store| store.get())
            .map(|credential| credential.access_token);
        if let Some(token) = token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidResponse(format!("invalid bearer token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, what: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", what, e)))
    }

    async fn post_public<T: DeserializeOwned, B: Serialize + Sync>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ApiError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        let response = Self::check_response(response).await?;
        Self::parse(response, path).await
    }
}

#[async_trait]
impl AuthGateway for ApiClient {
    async fn login(&self, request: &LoginRequest) -> Result<AuthResponse, ApiError> {
        debug!(email = %request.email, "Sending login request");
        self.post_public("/auth/login", request).await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<AuthResponse, ApiError> {
        debug!(email = %request.email, "Sending register request");
        self.post_public("/auth/register", request).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .post(self.url("/auth/refresh"))
            .bearer_auth(refresh_token)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let parsed: RefreshResponse = Self::parse(response, "refresh response").await?;
        Ok(parsed.access_token)
    }

    async fn logout(&self, session_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/auth/logout"))
            .headers(self.auth_headers()?)
            .json(&LogoutBody { session_id })
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn logout_all(&self) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url("/auth/logout-all"))
            .headers(self.auth_headers()?)
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>, ApiError> {
        let response = self
            .client
            .get(self.url("/auth/sessions"))
            .headers(self.auth_headers()?)
            .send()
            .await?;
        let response = Self::check_response(response).await?;
        let parsed: SessionsResponse = Self::parse(response, "sessions response").await?;
        debug!(count = parsed.sessions.len(), "Fetched server sessions");
        Ok(parsed.sessions)
    }

    async fn revoke_session(&self, session_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .delete(self.url(&format!("/auth/sessions/{}", session_id)))
            .headers(self.auth_headers()?)
            .send()
            .await?;
        Self::check_response(response).await?;
        Ok(())
    }
}
