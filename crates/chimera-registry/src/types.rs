use chimera_core::types::{PersonalityId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The unit a user "talks to": a named persona the system impersonates when
/// replying. Hard-deleted on remove; the id is never reused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Personality {
    pub id: PersonalityId,
    pub display_name: String,
    pub avatar_url: Option<String>,
    /// Bespoke fallback text shown when the LLM call for this personality fails.
    pub error_message: Option<String>,
    /// Who added it — list/remove authorization anchors here.
    pub owner_user_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl Personality {
    pub fn new(display_name: impl Into<String>, owner: UserId) -> Self {
        Self {
            id: PersonalityId::generate(),
            display_name: display_name.into(),
            avatar_url: None,
            error_message: None,
            owner_user_id: owner,
            created_at: Utc::now(),
        }
    }
}

/// Case-fold an alias or lookup key. One definition so the registry, the
/// store, and the command layer can never disagree on folding.
pub fn fold(s: &str) -> String {
    s.trim().to_lowercase()
}
