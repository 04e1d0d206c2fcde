use std::fmt;

use sha2::{Digest, Sha256};

use chimera_core::config::FINGERPRINT_SLOT_SECS;
use chimera_core::types::{ChannelId, PersonalityId, UserId};

/// Stable hash identifying one logical request for single-flight purposes.
///
/// The hash covers (personality, channel, user, content) plus a coarse time
/// slot, so near-simultaneous identical requests collide while the same
/// request half a minute later does not.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    pub fn compute(
        personality: &PersonalityId,
        channel: &ChannelId,
        user: &UserId,
        content: &str,
        now_unix_secs: i64,
    ) -> Self {
        let slot = now_unix_secs.div_euclid(FINGERPRINT_SLOT_SECS as i64);
        let mut hasher = Sha256::new();
        hasher.update(personality.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(channel.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(user.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(content.as_bytes());
        hasher.update([0]);
        hasher.update(slot.to_le_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
