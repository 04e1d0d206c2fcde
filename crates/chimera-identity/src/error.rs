use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("token store unavailable")]
    StoreUnavailable,
}

pub type Result<T> = std::result::Result<T, IdentityError>;
