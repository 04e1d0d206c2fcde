use thiserror::Error;

/// Errors surfaced by the chat-platform adapter.
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The requested entity does not exist (deleted message, revoked webhook).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The bot lacks the permission needed for the operation.
    #[error("Missing permission: {0}")]
    MissingPermission(String),

    /// The recipient's DMs are closed.
    #[error("DM blocked for user {0}")]
    DmBlocked(String),

    /// Transient transport or rate-limit failure; retryable.
    #[error("Transient platform error: {0}")]
    Transient(String),

    /// The platform rejected our credentials.
    #[error("Platform authentication rejected: {0}")]
    AuthRejected(String),

    /// An operation exceeded its allowed time budget.
    #[error("Platform operation timed out after {ms}ms")]
    Timeout { ms: u64 },
}

impl PlatformError {
    /// Whether a retry of the same call can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlatformError::Transient(_) | PlatformError::Timeout { .. }
        )
    }
}
