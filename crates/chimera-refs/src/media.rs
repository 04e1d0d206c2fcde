//! Media extraction from platform messages.
//!
//! Three sources per message: direct attachments (classified by MIME type),
//! embed image/thumbnail/video URLs, and in-band `[Image: url]` /
//! `[Audio: url]` markers — a prior bot run may have textualized media, and
//! those markers are how it comes back.

use std::sync::OnceLock;

use regex::Regex;

use chimera_core::types::{MediaKind, MediaRef};
use chimera_platform::types::InboundMessage;

fn image_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Image:\s*(\S+?)\]").unwrap())
}

fn audio_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[Audio:\s*(\S+?)\]").unwrap())
}

/// Everything shippable found in one message, attachments first.
pub fn extract_media(msg: &InboundMessage) -> Vec<MediaRef> {
    let mut media = Vec::new();

    for att in &msg.attachments {
        let kind = att
            .content_type
            .as_deref()
            .map(MediaKind::from_content_type)
            .unwrap_or(MediaKind::File);
        media.push(MediaRef {
            kind,
            url: att.url.clone(),
        });
    }

    for embed in &msg.embeds {
        if let Some(url) = &embed.image_url {
            media.push(MediaRef {
                kind: MediaKind::Image,
                url: url.clone(),
            });
        }
        if let Some(url) = &embed.thumbnail_url {
            media.push(MediaRef {
                kind: MediaKind::Image,
                url: url.clone(),
            });
        }
        if let Some(url) = &embed.video_url {
            media.push(MediaRef {
                kind: MediaKind::Video,
                url: url.clone(),
            });
        }
    }

    for cap in image_marker().captures_iter(&msg.content) {
        media.push(MediaRef {
            kind: MediaKind::Image,
            url: cap[1].to_string(),
        });
    }
    for cap in audio_marker().captures_iter(&msg.content) {
        media.push(MediaRef {
            kind: MediaKind::Audio,
            url: cap[1].to_string(),
        });
    }

    media
}

/// Keep at most `max` items, audio > image > video > file. The input is
/// ordered most-recent-first; the sort is stable, so recency breaks ties
/// within a kind.
pub fn prioritize(mut media: Vec<MediaRef>, max: usize) -> Vec<MediaRef> {
    media.sort_by_key(|m| m.kind.priority());
    media.truncate(max);
    media
}
