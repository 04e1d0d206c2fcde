use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Platform channel id. Opaque string — the platform picks the format.
    ChannelId
);
string_id!(
    /// Platform user id. For webhook-authored messages this is the webhook's
    /// synthetic author, never assume it names a real account.
    UserId
);
string_id!(
    /// Platform message id. Doubles as the correlation id on dispatch logs.
    MessageId
);
string_id!(
    /// Canonical personality id, unique within the registry, never reused.
    PersonalityId
);

impl PersonalityId {
    /// Generate a fresh id (UUIDv7 — time-sortable for easier log correlation).
    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }
}

/// Classification of an extracted media item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    File,
}

impl MediaKind {
    /// Rank used when a request can carry at most `max_media` items.
    /// Lower ranks ship first: audio > image > video > file.
    pub fn priority(self) -> u8 {
        match self {
            MediaKind::Audio => 0,
            MediaKind::Image => 1,
            MediaKind::Video => 2,
            MediaKind::File => 3,
        }
    }

    /// Map a MIME content type to a media kind.
    pub fn from_content_type(ct: &str) -> Self {
        if ct.starts_with("image/") {
            MediaKind::Image
        } else if ct.starts_with("audio/") {
            MediaKind::Audio
        } else if ct.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::File
        }
    }
}

/// A media item extracted from a message (attachment, embed, or in-band marker).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
}
