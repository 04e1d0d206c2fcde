use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChimeraError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Platform authentication rejected: {0}")]
    PlatformAuth(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChimeraError {
    /// Short error code string attached to log lines.
    pub fn code(&self) -> &'static str {
        match self {
            ChimeraError::Config(_) => "CONFIG_ERROR",
            ChimeraError::Persistence(_) => "PERSISTENCE_ERROR",
            ChimeraError::PlatformAuth(_) => "PLATFORM_AUTH",
            ChimeraError::Serialization(_) => "SERIALIZATION_ERROR",
            ChimeraError::Io(_) => "IO_ERROR",
            ChimeraError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, ChimeraError>;
