//! Replay and duplicate rejection.
//!
//! The platform re-delivers events and fires duplicate webhooks; users
//! double-tap commands; racing handlers emit the same informational embed.
//! Five independent TTL scopes catch each failure mode. Checking and marking
//! are atomic per key, so two copies of the same event arriving concurrently
//! get exactly one `true`.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::debug;

use chimera_core::config::{
    COMPLETED_ADD_TTL_SECS, MESSAGE_ID_TTL_SECS, OUTBOUND_EMBED_TTL_SECS, RECENT_COMMAND_TTL_SECS,
};
use chimera_core::types::{ChannelId, MessageId, UserId};

use crate::ttl::TtlSet;

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct Deduplicator {
    /// Platform re-delivery of the same event.
    message_ids: TtlSet<MessageId>,
    /// Duplicate webhooks: same author, channel, and content within the
    /// dedup window, under distinct message ids.
    content: TtlSet<(ChannelId, UserId, String)>,
    /// Double-tap on the same command.
    recent_commands: TtlSet<(UserId, String)>,
    /// Racing handlers emitting the same help/list/info embed.
    outbound_embeds: TtlSet<(MessageId, String)>,
    /// A retried inbound event must not re-run a successful add.
    completed_adds: TtlSet<(UserId, String)>,
}

impl Deduplicator {
    pub fn new(dedup_window: Duration) -> Self {
        Self {
            message_ids: TtlSet::new(Duration::from_secs(MESSAGE_ID_TTL_SECS)),
            content: TtlSet::new(dedup_window),
            recent_commands: TtlSet::new(Duration::from_secs(RECENT_COMMAND_TTL_SECS)),
            outbound_embeds: TtlSet::new(Duration::from_secs(OUTBOUND_EMBED_TTL_SECS)),
            completed_adds: TtlSet::new(Duration::from_secs(COMPLETED_ADD_TTL_SECS)),
        }
    }

    /// Gate one inbound event. Marks and returns `true` exactly once per
    /// message id, and — for non-command traffic — once per
    /// (channel, author, content) within the dedup window.
    ///
    /// Commands skip the content scope: the recent-command scope owns their
    /// double-tap window, which is deliberately shorter.
    pub fn should_process(
        &self,
        message_id: &MessageId,
        channel: &ChannelId,
        author: &UserId,
        content: &str,
        is_command: bool,
    ) -> bool {
        if !self.message_ids.insert_if_absent(message_id.clone()) {
            debug!(message_id = %message_id, "replayed message id dropped");
            return false;
        }
        if is_command {
            return true;
        }
        let key = (channel.clone(), author.clone(), content_hash(content));
        if !self.content.insert_if_absent(key) {
            debug!(message_id = %message_id, "duplicate content dropped");
            return false;
        }
        true
    }

    /// Gate a command invocation: `true` iff this (user, command, args)
    /// tuple was not run in the last few seconds.
    pub fn mark_command(&self, user: &UserId, command: &str, args: &[&str]) -> bool {
        let key = (user.clone(), format!("{} {}", command, args.join(" ")));
        self.recent_commands.insert_if_absent(key)
    }

    /// Gate an informational embed keyed by the message it answers.
    pub fn mark_embed(&self, reply_to: &MessageId, purpose: &str) -> bool {
        self.outbound_embeds
            .insert_if_absent((reply_to.clone(), purpose.to_string()))
    }

    /// Record a successful add so a replay of the same inbound event cannot
    /// re-run it. Keyed by the folded personality name.
    pub fn mark_completed_add(&self, user: &UserId, folded_name: &str) -> bool {
        self.completed_adds
            .insert_if_absent((user.clone(), folded_name.to_string()))
    }

    /// A remove clears the add guard so the personality can be re-added.
    pub fn clear_completed_add(&self, user: &UserId, folded_name: &str) {
        self.completed_adds
            .remove(&(user.clone(), folded_name.to_string()));
    }

    /// Background reaper for all scopes. Entries also self-expire on access;
    /// the sweep only bounds memory between touches.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let dedup = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let evicted = dedup.message_ids.sweep()
                    + dedup.content.sweep()
                    + dedup.recent_commands.sweep()
                    + dedup.outbound_embeds.sweep()
                    + dedup.completed_adds.sweep();
                if evicted > 0 {
                    debug!(evicted, "dedup sweep");
                }
            }
        })
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}
