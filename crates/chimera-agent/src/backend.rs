//! The LLM inference endpoint client.
//!
//! Wire contract: JSON POST with a per-user bearer token, response body
//! `{ "choices": [{ "message": { "content": … } }] }`. Status mapping:
//! 429 is retriable after Retry-After, other 4xx are terminal, 5xx and
//! transport failures are retriable.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chimera_core::types::MediaRef;

/// One turn of the outbound conversation payload.
#[derive(Debug, Clone, Serialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: String,
    /// Multimodal payload attached to the final user turn only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<MediaRef>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize)]
pub struct WirePayload {
    pub model: String,
    pub messages: Vec<WireMessage>,
}

/// Seam for the inference endpoint — the HTTP client in production, a
/// scripted stub in tests.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    async fn complete(&self, token: &str, payload: &WirePayload) -> Result<String, LlmError>;
}

pub struct HttpLlmClient {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpLlmClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl LlmBackend for HttpLlmClient {
    async fn complete(&self, token: &str, payload: &WirePayload) -> Result<String, LlmError> {
        debug!(model = %payload.model, turns = payload.messages.len(), "sending LLM request");

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(token)
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000)
                .unwrap_or(5000);
            return Err(LlmError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "LLM API error");
            return Err(LlmError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| LlmError::Parse(e.to_string()))?;

        let content = api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        if content.is_empty() {
            return Err(LlmError::Parse("empty completion".to_string()));
        }
        Ok(content)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
}

impl LlmError {
    /// Retriable above 499, terminal at 4xx except 429.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(_) => true,
            LlmError::RateLimited { .. } => true,
            LlmError::Api { status, .. } => *status > 499,
            LlmError::Parse(_) => false,
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transience_classification() {
        assert!(LlmError::RateLimited { retry_after_ms: 0 }.is_transient());
        assert!(LlmError::Api {
            status: 503,
            message: String::new()
        }
        .is_transient());
        assert!(!LlmError::Api {
            status: 401,
            message: String::new()
        }
        .is_transient());
        assert!(!LlmError::Parse("bad".to_string()).is_transient());
    }

    #[test]
    fn payload_serialises_roles_lowercase() {
        let payload = WirePayload {
            model: "m".to_string(),
            messages: vec![WireMessage {
                role: Role::Assistant,
                content: "hello".to_string(),
                media: None,
            }],
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
        // media must be absent when None
        assert!(!json.contains("media"));
    }
}
