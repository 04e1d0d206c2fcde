//! Webhook-impersonation sender.
//!
//! Caches one webhook handle per channel, reusing an existing webhook we own
//! before creating a new one under the configured sentinel name. Every send
//! overrides username and avatar with the personality's identity. Channels
//! where webhooks are unavailable (DMs, missing permission) fall back to
//! plain bot messages prefixed with the display name. Each emitted chunk is
//! recorded in the reply-binding index, in emission order, so replies to any
//! chunk route back to the producing turn.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, warn};

use chimera_conversation::ConversationState;
use chimera_core::config::{
    MAX_MESSAGE_CHARS, WEBHOOK_BACKOFF_BASE_MS, WEBHOOK_SEND_RETRIES, WEBHOOK_SEND_TIMEOUT_MS,
};
use chimera_core::types::{ChannelId, MessageId, UserId};
use chimera_identity::IdentityTracker;
use chimera_platform::platform::ChatPlatform;
use chimera_platform::types::{WebhookHandle, WebhookMessage};
use chimera_platform::PlatformError;
use chimera_registry::Personality;

use crate::error::SendError;
use crate::split::split_message;

pub struct WebhookSender {
    platform: Arc<dyn ChatPlatform>,
    conversation: Arc<ConversationState>,
    identity: Arc<IdentityTracker>,
    self_bot_id: UserId,
    webhook_name: String,
    handles: DashMap<ChannelId, WebhookHandle>,
}

impl WebhookSender {
    pub fn new(
        platform: Arc<dyn ChatPlatform>,
        conversation: Arc<ConversationState>,
        identity: Arc<IdentityTracker>,
        self_bot_id: UserId,
        webhook_name: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            conversation,
            identity,
            self_bot_id,
            webhook_name: webhook_name.into(),
            handles: DashMap::new(),
        }
    }

    /// Emit `text` into `channel` as `personality`, on behalf of `for_user`.
    ///
    /// Returns the emitted message ids in order. Chunks of a single send go
    /// out strictly in order; binding entries are appended in the same order.
    pub async fn send(
        &self,
        personality: &Personality,
        channel: &ChannelId,
        for_user: &UserId,
        text: &str,
        is_dm: bool,
    ) -> Result<Vec<MessageId>, SendError> {
        let chunks = split_message(text, MAX_MESSAGE_CHARS);

        let handle = if is_dm {
            None
        } else {
            self.ensure_handle(channel).await
        };

        let mut sent = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let id = match &handle {
                Some(h) => self.send_chunk_via_webhook(h, personality, channel, chunk).await?,
                None => self.send_chunk_plain(personality, channel, chunk).await?,
            };
            self.conversation.record_bot_message(
                id.clone(),
                channel.clone(),
                for_user.clone(),
                personality.id.clone(),
            );
            sent.push(id);
        }
        Ok(sent)
    }

    /// Cached handle for the channel, looking up existing webhooks before
    /// creating one. `None` means webhooks are unavailable here and the
    /// plain-message path applies.
    async fn ensure_handle(&self, channel: &ChannelId) -> Option<WebhookHandle> {
        if let Some(handle) = self.handles.get(channel) {
            return Some(handle.clone());
        }

        match self.platform.list_webhooks(channel).await {
            Ok(existing) => {
                if let Some(ours) = existing.into_iter().find(|h| h.owner_id == self.self_bot_id) {
                    self.identity.register_own_webhook(&ours.id);
                    self.handles.insert(channel.clone(), ours.clone());
                    return Some(ours);
                }
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "webhook listing failed");
            }
        }

        match self.platform.create_webhook(channel, &self.webhook_name).await {
            Ok(created) => {
                debug!(channel = %channel, webhook = %created.id, "webhook created");
                self.identity.register_own_webhook(&created.id);
                self.handles.insert(channel.clone(), created.clone());
                Some(created)
            }
            Err(e) => {
                warn!(channel = %channel, error = %e, "webhook creation failed, using plain messages");
                None
            }
        }
    }

    async fn send_chunk_via_webhook(
        &self,
        handle: &WebhookHandle,
        personality: &Personality,
        channel: &ChannelId,
        chunk: &str,
    ) -> Result<MessageId, SendError> {
        let msg = WebhookMessage {
            content: chunk.to_string(),
            username: personality.display_name.clone(),
            avatar_url: personality.avatar_url.clone(),
        };

        let mut handle = handle.clone();
        let mut recreated = false;
        let mut attempt: u32 = 0;
        loop {
            match self.try_webhook_send(&handle, &msg).await {
                Ok(id) => return Ok(id),
                // Stale cache: the webhook was deleted server-side. Evict,
                // recreate once, and retry immediately.
                Err(PlatformError::NotFound(_)) if !recreated => {
                    warn!(channel = %channel, webhook = %handle.id, "cached webhook gone, recreating");
                    self.handles.remove(channel);
                    recreated = true;
                    match self.ensure_handle(channel).await {
                        Some(fresh) => handle = fresh,
                        None => {
                            return self.send_chunk_plain(personality, channel, chunk).await;
                        }
                    }
                }
                Err(e) if e.is_transient() && attempt < WEBHOOK_SEND_RETRIES => {
                    let delay = WEBHOOK_BACKOFF_BASE_MS * 2u64.pow(attempt);
                    debug!(channel = %channel, attempt, delay_ms = delay, error = %e, "webhook send retry");
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(SendError::Failed {
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    async fn try_webhook_send(
        &self,
        handle: &WebhookHandle,
        msg: &WebhookMessage,
    ) -> Result<MessageId, PlatformError> {
        let timeout = Duration::from_millis(WEBHOOK_SEND_TIMEOUT_MS);
        tokio::time::timeout(timeout, self.platform.send_webhook_message(handle, msg))
            .await
            .unwrap_or(Err(PlatformError::Timeout {
                ms: WEBHOOK_SEND_TIMEOUT_MS,
            }))
    }

    /// DM / no-webhook fallback: a plain bot message carrying the display
    /// name, since the platform shows our own identity instead.
    async fn send_chunk_plain(
        &self,
        personality: &Personality,
        channel: &ChannelId,
        chunk: &str,
    ) -> Result<MessageId, SendError> {
        let content = format!("**{}:** {}", personality.display_name, chunk);
        self.platform
            .send_message(channel, &content)
            .await
            .map_err(|e| SendError::Failed {
                reason: e.to_string(),
            })
    }
}
