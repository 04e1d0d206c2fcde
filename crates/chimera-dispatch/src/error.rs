use thiserror::Error;

/// Everything that can stop a dispatch.
///
/// Components raise these through the pipeline; the dispatcher is the single
/// place where one becomes a user-visible message. `Replay` and `Cancelled`
/// are the only silent outcomes.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The deduplicator rejected the event. Dropped silently.
    #[error("replayed event")]
    Replay,

    /// The dispatch was cancelled (shutdown or duplicate completion).
    #[error("dispatch cancelled")]
    Cancelled,

    /// No credentials for the message's real author.
    #[error("not authenticated")]
    NotAuthenticated,

    /// An auth-privileged command arrived through a proxy system.
    #[error("auth command via proxy system")]
    AuthForbiddenForProxy,

    /// NSFW gate or missing permission.
    #[error("policy blocked: {reason}")]
    PolicyBlocked { reason: String },

    /// An explicit mention that resolves to nothing.
    #[error("personality not found: {query}")]
    PersonalityNotFound { query: String },

    /// 5xx / 429 / network from the inference endpoint.
    #[error("LLM transient failure: {message}")]
    LlmTransient {
        message: String,
        /// The personality's bespoke fallback text, when it has one.
        custom_message: Option<String>,
    },

    /// Terminal 4xx from the inference endpoint.
    #[error("LLM permanent failure: {message}")]
    LlmPermanent {
        message: String,
        custom_message: Option<String>,
    },

    /// Webhook emission failed after retries.
    #[error("send failed: {reason}")]
    SendFailed { reason: String },

    #[error("internal error: {message}")]
    Internal { message: String },
}

impl DispatchError {
    /// Short code for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Replay => "REPLAY",
            DispatchError::Cancelled => "CANCELLED",
            DispatchError::NotAuthenticated => "NOT_AUTHENTICATED",
            DispatchError::AuthForbiddenForProxy => "AUTH_FORBIDDEN_FOR_PROXY",
            DispatchError::PolicyBlocked { .. } => "POLICY_BLOCKED",
            DispatchError::PersonalityNotFound { .. } => "PERSONALITY_NOT_FOUND",
            DispatchError::LlmTransient { .. } => "LLM_TRANSIENT",
            DispatchError::LlmPermanent { .. } => "LLM_PERMANENT",
            DispatchError::SendFailed { .. } => "SEND_FAILED",
            DispatchError::Internal { .. } => "INTERNAL",
        }
    }

    /// The text shown to the user, or `None` for silent outcomes.
    /// `prefix` is the command prefix, for guidance strings.
    pub fn user_message(&self, prefix: &str) -> Option<String> {
        match self {
            DispatchError::Replay | DispatchError::Cancelled => None,
            DispatchError::NotAuthenticated => Some(format!(
                "You need to connect your account before talking to a personality. \
                 Run `{prefix} auth start` and follow the link I send you."
            )),
            DispatchError::AuthForbiddenForProxy => Some(
                "Authentication commands can't be run through a proxy system. \
                 Please send this command from your own account."
                    .to_string(),
            ),
            DispatchError::PolicyBlocked { reason } => Some(reason.clone()),
            DispatchError::PersonalityNotFound { query } => Some(format!(
                "I don't know a personality called \"{query}\" — try `{prefix} list`."
            )),
            DispatchError::LlmTransient { custom_message, .. }
            | DispatchError::LlmPermanent { custom_message, .. } => Some(
                custom_message
                    .clone()
                    .unwrap_or_else(|| "Something went wrong generating a reply. Please try again in a moment.".to_string()),
            ),
            DispatchError::SendFailed { .. } => {
                Some("I couldn't deliver the reply to this channel.".to_string())
            }
            DispatchError::Internal { .. } => {
                Some("Something went wrong on my side. Please try again.".to_string())
            }
        }
    }
}
