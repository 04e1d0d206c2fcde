//! Per-channel and per-user conversation state.
//!
//! Three independent in-memory indexes: channel activations (no TTL),
//! reply bindings (30 min), and auto-respond entries (`CONV_TTL`). All are
//! read from the per-event tasks concurrently; entries self-expire on access
//! and a background sweeper bounds memory between touches.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, info};

use chimera_core::config::REPLY_BINDING_TTL_SECS;
use chimera_core::types::{ChannelId, MessageId, PersonalityId, UserId};

use crate::types::{AutoRespondEntry, ChannelActivation, ReplyBinding, UserPrefs};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct ConversationState {
    activations: DashMap<ChannelId, ChannelActivation>,
    bindings: DashMap<MessageId, ReplyBinding>,
    auto_respond: DashMap<(ChannelId, UserId), AutoRespondEntry>,
    prefs: DashMap<UserId, UserPrefs>,
    binding_ttl: Duration,
    conv_ttl: Duration,
}

impl ConversationState {
    pub fn new(conv_ttl: Duration) -> Self {
        Self {
            activations: DashMap::new(),
            bindings: DashMap::new(),
            auto_respond: DashMap::new(),
            prefs: DashMap::new(),
            binding_ttl: Duration::from_secs(REPLY_BINDING_TTL_SECS),
            conv_ttl,
        }
    }

    // ── channel activation ────────────────────────────────────────────────────

    /// Pin a personality to the channel, replacing any prior activation.
    pub fn activate(&self, activation: ChannelActivation) -> Option<ChannelActivation> {
        info!(
            channel = %activation.channel_id,
            personality = %activation.personality_id,
            by = %activation.activated_by,
            "channel activated"
        );
        self.activations
            .insert(activation.channel_id.clone(), activation)
    }

    pub fn deactivate(&self, channel: &ChannelId) -> Option<ChannelActivation> {
        let removed = self.activations.remove(channel).map(|(_, a)| a);
        if removed.is_some() {
            info!(channel = %channel, "channel deactivated");
        }
        removed
    }

    pub fn activation(&self, channel: &ChannelId) -> Option<ChannelActivation> {
        self.activations.get(channel).map(|a| a.clone())
    }

    // ── reply bindings ────────────────────────────────────────────────────────

    /// Record one bot emission so replies to it route back to this turn.
    /// Called once per outbound chunk, in emission order.
    pub fn record_bot_message(
        &self,
        message_id: MessageId,
        channel: ChannelId,
        user: UserId,
        personality: PersonalityId,
    ) {
        self.bindings.insert(
            message_id,
            ReplyBinding {
                channel_id: channel,
                user_id: user,
                personality_id: personality,
                emitted_at: Instant::now(),
            },
        );
    }

    /// The turn that produced a bot message, if the binding is still live.
    pub fn binding(&self, message_id: &MessageId) -> Option<ReplyBinding> {
        let expired = match self.bindings.get(message_id) {
            Some(b) => b.emitted_at.elapsed() >= self.binding_ttl,
            None => return None,
        };
        if expired {
            self.bindings.remove(message_id);
            return None;
        }
        self.bindings.get(message_id).map(|b| b.clone())
    }

    // ── auto-respond ──────────────────────────────────────────────────────────

    /// Refresh the live dialog on (channel, user). Inserting overwrites any
    /// prior entry — switching personality ends the previous conversation.
    pub fn refresh_auto_respond(
        &self,
        channel: &ChannelId,
        user: &UserId,
        personality: &PersonalityId,
    ) {
        self.auto_respond.insert(
            (channel.clone(), user.clone()),
            AutoRespondEntry {
                personality_id: personality.clone(),
                last_activity: Instant::now(),
            },
        );
    }

    /// The personality that should continue this user's conversation, if the
    /// user opted in and the dialog is still warm.
    pub fn auto_respond_target(
        &self,
        channel: &ChannelId,
        user: &UserId,
    ) -> Option<PersonalityId> {
        if !self.auto_respond_pref(user) {
            return None;
        }
        let key = (channel.clone(), user.clone());
        let expired = match self.auto_respond.get(&key) {
            Some(e) => e.last_activity.elapsed() >= self.conv_ttl,
            None => return None,
        };
        if expired {
            self.auto_respond.remove(&key);
            return None;
        }
        self.auto_respond.get(&key).map(|e| e.personality_id.clone())
    }

    /// Explicit reset: end the caller's dialog in this channel.
    pub fn reset(&self, channel: &ChannelId, user: &UserId) -> bool {
        self.auto_respond
            .remove(&(channel.clone(), user.clone()))
            .is_some()
    }

    pub fn set_auto_respond_pref(&self, user: &UserId, enabled: bool) {
        self.prefs.entry(user.clone()).or_default().auto_respond = enabled;
    }

    pub fn auto_respond_pref(&self, user: &UserId) -> bool {
        self.prefs
            .get(user)
            .map(|p| p.auto_respond)
            .unwrap_or_default()
    }

    pub fn set_age_verified(&self, user: &UserId, verified: bool) {
        self.prefs.entry(user.clone()).or_default().age_verified = verified;
    }

    pub fn age_verified(&self, user: &UserId) -> bool {
        self.prefs
            .get(user)
            .map(|p| p.age_verified)
            .unwrap_or_default()
    }

    // ── maintenance ───────────────────────────────────────────────────────────

    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let state = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let before = state.bindings.len() + state.auto_respond.len();
                let binding_ttl = state.binding_ttl;
                state
                    .bindings
                    .retain(|_, b| b.emitted_at.elapsed() < binding_ttl);
                let conv_ttl = state.conv_ttl;
                state
                    .auto_respond
                    .retain(|_, e| e.last_activity.elapsed() < conv_ttl);
                let after = state.bindings.len() + state.auto_respond.len();
                if before > after {
                    debug!(evicted = before - after, "conversation sweep");
                }
            }
        })
    }
}
