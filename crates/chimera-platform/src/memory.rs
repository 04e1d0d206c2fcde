//! In-memory [`ChatPlatform`] used by tests and local dry-runs.
//!
//! Every outbound operation is recorded so assertions can inspect exactly
//! what the core emitted; targeted failures (closed DMs, webhook 404s,
//! missing permissions) are injectable per channel/user.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};

use chimera_core::types::{ChannelId, MessageId, UserId};

use crate::error::PlatformError;
use crate::platform::ChatPlatform;
use crate::types::{InboundMessage, WebhookHandle, WebhookMessage};

/// Record of one webhook emission, kept for assertions.
#[derive(Debug, Clone)]
pub struct SentWebhookMessage {
    pub message_id: MessageId,
    pub handle_id: String,
    pub channel_id: ChannelId,
    pub content: String,
    pub username: String,
    pub avatar_url: Option<String>,
}

/// Record of one plain channel message.
#[derive(Debug, Clone)]
pub struct SentChannelMessage {
    pub message_id: MessageId,
    pub channel_id: ChannelId,
    pub content: String,
}

#[derive(Default)]
pub struct InMemoryPlatform {
    seq: AtomicU64,
    messages: DashMap<MessageId, InboundMessage>,
    nsfw_channels: DashSet<ChannelId>,
    webhooks: DashMap<ChannelId, Vec<WebhookHandle>>,
    moderators: DashSet<(ChannelId, UserId)>,
    dm_blocked: DashSet<UserId>,
    /// Channels where webhook creation fails (DMs, missing permission).
    webhook_create_denied: DashSet<ChannelId>,
    /// Webhook handle ids that answer 404 on send (deleted server-side).
    dead_webhooks: DashSet<String>,

    pub sent_webhook_messages: DashMap<u64, SentWebhookMessage>,
    pub sent_channel_messages: DashMap<u64, SentChannelMessage>,
    pub sent_dms: DashMap<u64, (UserId, String)>,
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Seed a message so `fetch_message` can find it.
    pub fn put_message(&self, msg: InboundMessage) {
        self.messages.insert(msg.id.clone(), msg);
    }

    pub fn mark_nsfw(&self, channel: &ChannelId) {
        self.nsfw_channels.insert(channel.clone());
    }

    pub fn grant_manage_messages(&self, channel: &ChannelId, user: &UserId) {
        self.moderators.insert((channel.clone(), user.clone()));
    }

    pub fn block_dms(&self, user: &UserId) {
        self.dm_blocked.insert(user.clone());
    }

    pub fn deny_webhook_creation(&self, channel: &ChannelId) {
        self.webhook_create_denied.insert(channel.clone());
    }

    /// Make an existing webhook 404 on the next send.
    pub fn kill_webhook(&self, handle_id: &str) {
        self.dead_webhooks.insert(handle_id.to_string());
        for mut entry in self.webhooks.iter_mut() {
            entry.value_mut().retain(|h| h.id != handle_id);
        }
    }

    /// All webhook emissions in send order.
    pub fn webhook_sends(&self) -> Vec<SentWebhookMessage> {
        let mut all: Vec<(u64, SentWebhookMessage)> = self
            .sent_webhook_messages
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, m)| m).collect()
    }

    /// All plain channel emissions in send order.
    pub fn channel_sends(&self) -> Vec<SentChannelMessage> {
        let mut all: Vec<(u64, SentChannelMessage)> = self
            .sent_channel_messages
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, m)| m).collect()
    }

    pub fn dm_sends(&self) -> Vec<(UserId, String)> {
        let mut all: Vec<(u64, (UserId, String))> = self
            .sent_dms
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        all.sort_by_key(|(seq, _)| *seq);
        all.into_iter().map(|(_, m)| m).collect()
    }

    pub fn outbound_count(&self) -> usize {
        self.sent_webhook_messages.len() + self.sent_channel_messages.len() + self.sent_dms.len()
    }
}

#[async_trait]
impl ChatPlatform for InMemoryPlatform {
    async fn fetch_message(
        &self,
        _channel: &ChannelId,
        id: &MessageId,
    ) -> Result<Option<InboundMessage>, PlatformError> {
        Ok(self.messages.get(id).map(|m| m.clone()))
    }

    async fn is_nsfw(&self, channel: &ChannelId) -> Result<bool, PlatformError> {
        Ok(self.nsfw_channels.contains(channel))
    }

    async fn send_message(
        &self,
        channel: &ChannelId,
        content: &str,
    ) -> Result<MessageId, PlatformError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = MessageId::from(format!("sent-{seq}"));
        self.sent_channel_messages.insert(
            seq,
            SentChannelMessage {
                message_id: id.clone(),
                channel_id: channel.clone(),
                content: content.to_string(),
            },
        );
        Ok(id)
    }

    async fn send_dm(&self, user: &UserId, content: &str) -> Result<MessageId, PlatformError> {
        if self.dm_blocked.contains(user) {
            return Err(PlatformError::DmBlocked(user.to_string()));
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.sent_dms
            .insert(seq, (user.clone(), content.to_string()));
        Ok(MessageId::from(format!("dm-{seq}")))
    }

    async fn list_webhooks(
        &self,
        channel: &ChannelId,
    ) -> Result<Vec<WebhookHandle>, PlatformError> {
        Ok(self
            .webhooks
            .get(channel)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn create_webhook(
        &self,
        channel: &ChannelId,
        _name: &str,
    ) -> Result<WebhookHandle, PlatformError> {
        if self.webhook_create_denied.contains(channel) {
            return Err(PlatformError::MissingPermission(
                "manage webhooks".to_string(),
            ));
        }
        let handle = WebhookHandle {
            id: self.next_id("wh"),
            channel_id: channel.clone(),
            owner_id: UserId::from("self"),
        };
        self.webhooks
            .entry(channel.clone())
            .or_default()
            .push(handle.clone());
        Ok(handle)
    }

    async fn send_webhook_message(
        &self,
        handle: &WebhookHandle,
        msg: &WebhookMessage,
    ) -> Result<MessageId, PlatformError> {
        if self.dead_webhooks.contains(&handle.id) {
            return Err(PlatformError::NotFound(format!("webhook {}", handle.id)));
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = MessageId::from(format!("wsent-{seq}"));
        self.sent_webhook_messages.insert(
            seq,
            SentWebhookMessage {
                message_id: id.clone(),
                handle_id: handle.id.clone(),
                channel_id: handle.channel_id.clone(),
                content: msg.content.clone(),
                username: msg.username.clone(),
                avatar_url: msg.avatar_url.clone(),
            },
        );
        Ok(id)
    }

    async fn member_has_manage_messages(
        &self,
        channel: &ChannelId,
        user: &UserId,
    ) -> Result<bool, PlatformError> {
        Ok(self.moderators.contains(&(channel.clone(), user.clone())))
    }
}

/// Build a minimal real-user message for tests.
pub fn test_message(id: &str, channel: &str, author: &str, content: &str) -> InboundMessage {
    InboundMessage {
        id: MessageId::from(id),
        channel_id: ChannelId::from(channel),
        guild_id: Some("G".to_string()),
        author_id: UserId::from(author),
        author_display_name: author.to_string(),
        content: content.to_string(),
        webhook_id: None,
        application_id: None,
        attachments: Vec::new(),
        embeds: Vec::new(),
        reference: None,
        timestamp: chrono::Utc::now(),
        is_dm: false,
    }
}
