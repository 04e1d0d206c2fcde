use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use chimera_core::types::UserId;

/// Credentials handed back by the OAuth service.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TokenValidation {
    pub valid: bool,
    pub user_id: Option<UserId>,
}

/// Contract for the external OAuth token service. The exchange front-end
/// (authorization pages, redirects) lives outside this process.
#[async_trait]
pub trait OAuthService: Send + Sync {
    /// URL the user opens to authorize; `state` round-trips for CSRF binding.
    fn authorization_url(&self, state: &str) -> String;

    async fn exchange_code(&self, code: &str, user: &UserId) -> Result<TokenGrant, OAuthError>;

    async fn validate_token(&self, token: &str) -> Result<TokenValidation, OAuthError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenGrant, OAuthError>;

    async fn revoke_token(&self, token: &str) -> Result<(), OAuthError>;
}

#[derive(Debug, Error)]
pub enum OAuthError {
    /// The service rejected the code/token; not retryable.
    #[error("OAuth rejected: {0}")]
    Rejected(String),

    /// Transport-level failure; retryable.
    #[error("OAuth transport error: {0}")]
    Transport(String),
}
