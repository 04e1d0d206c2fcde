use async_trait::async_trait;

use chimera_core::types::{ChannelId, MessageId, UserId};

use crate::error::PlatformError;
use crate::types::{InboundMessage, WebhookHandle, WebhookMessage};

/// The abstract chat-platform surface the dispatch core is written against.
///
/// Implementations must be `Send + Sync` so a single adapter can be shared
/// across the per-event Tokio tasks. All methods are idempotent reads except
/// the three send/create operations.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Fetch a single message by id. `Ok(None)` when the message was deleted.
    async fn fetch_message(
        &self,
        channel: &ChannelId,
        id: &MessageId,
    ) -> Result<Option<InboundMessage>, PlatformError>;

    /// Whether the platform flags the channel as age-restricted.
    async fn is_nsfw(&self, channel: &ChannelId) -> Result<bool, PlatformError>;

    /// Send a plain message as the bot user.
    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &str,
    ) -> Result<MessageId, PlatformError>;

    /// Send a direct message. Fails with [`PlatformError::DmBlocked`] when the
    /// user's DMs are closed; callers fall back to the channel.
    async fn send_dm(&self, user: &UserId, content: &str) -> Result<MessageId, PlatformError>;

    /// List the webhooks existing on a channel.
    async fn list_webhooks(
        &self,
        channel: &ChannelId,
    ) -> Result<Vec<WebhookHandle>, PlatformError>;

    /// Create a webhook on the channel. Fails in DMs and without the
    /// manage-webhooks permission.
    async fn create_webhook(
        &self,
        channel: &ChannelId,
        name: &str,
    ) -> Result<WebhookHandle, PlatformError>;

    /// Emit one message through a webhook under the given identity override.
    async fn send_webhook_message(
        &self,
        handle: &WebhookHandle,
        msg: &WebhookMessage,
    ) -> Result<MessageId, PlatformError>;

    /// Moderator check used by the activation commands.
    async fn member_has_manage_messages(
        &self,
        channel: &ChannelId,
        user: &UserId,
    ) -> Result<bool, PlatformError>;
}
