use std::time::Instant;

use chimera_core::types::{ChannelId, PersonalityId, UserId};
use chrono::{DateTime, Utc};

/// A personality pinned to answer every non-command message in a channel.
/// Moderator action; at most one per channel; survives until deactivation.
#[derive(Debug, Clone)]
pub struct ChannelActivation {
    pub channel_id: ChannelId,
    pub personality_id: PersonalityId,
    pub activated_by: UserId,
    pub activated_at: DateTime<Utc>,
}

/// Maps a bot-emitted message id back to the turn that produced it, so a
/// reply to that message routes to the same personality under the same user.
///
/// The bound personality may have been removed since; lookups tolerate that
/// by letting the dispatcher treat a registry miss as "no binding".
#[derive(Debug, Clone)]
pub struct ReplyBinding {
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub personality_id: PersonalityId,
    pub emitted_at: Instant,
}

/// One live dialog on a (channel, user): the personality that answers the
/// user's next non-mention message while the conversation stays warm.
#[derive(Debug, Clone)]
pub struct AutoRespondEntry {
    pub personality_id: PersonalityId,
    pub last_activity: Instant,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UserPrefs {
    /// Opt-in: nobody gets unprompted replies until they ask for them.
    pub auto_respond: bool,
    /// Explicit age verification, the alternative to an NSFW-flagged channel.
    pub age_verified: bool,
}
