use chimera_core::types::{ChannelId, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message event received from the chat platform.
///
/// This is the only message shape the dispatch core ever sees; concrete SDK
/// events are mapped into it by the platform adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub guild_id: Option<String>,
    /// Platform author id. For webhook messages this names the webhook, not
    /// a real account — identity classification resolves the real author.
    pub author_id: UserId,
    pub author_display_name: String,
    pub content: String,
    /// Set when the message was emitted through a webhook.
    pub webhook_id: Option<String>,
    /// Application that emitted the message, when the platform reports one.
    pub application_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    /// Direct reply reference, when this message replies to another.
    pub reference: Option<MessageId>,
    pub timestamp: DateTime<Utc>,
    pub is_dm: bool,
}

/// A file attached to a platform message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub content_type: Option<String>,
    pub filename: String,
}

/// The subset of an embed the core cares about: media URLs and the footer
/// text (proxy systems sign their embeds there).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Embed {
    pub image_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub video_url: Option<String>,
    pub footer_text: Option<String>,
}

/// Handle to a channel webhook. Cheap to clone; safe for concurrent sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookHandle {
    pub id: String,
    pub channel_id: ChannelId,
    /// The application that created the webhook.
    pub owner_id: UserId,
}

/// One webhook emission with the per-message identity override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookMessage {
    pub content: String,
    pub username: String,
    pub avatar_url: Option<String>,
}
