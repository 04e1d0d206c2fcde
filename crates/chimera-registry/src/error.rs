use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Personality id already exists: {0}")]
    IdExists(String),

    #[error("Personality not found: {0}")]
    NotFound(String),

    #[error("Alias collides with a global alias: {alias}")]
    AliasCollision { alias: String },

    #[error("Not authorized: {reason}")]
    NotAuthorized { reason: String },

    #[error("Persistence error: {0}")]
    Persistence(String),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
