use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    /// Emission failed after retries; no reply binding was written for the
    /// failed chunk.
    #[error("send failed after retries: {reason}")]
    Failed { reason: String },
}
