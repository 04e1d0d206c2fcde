//! Converts a reference chain plus the live user message into the LLM wire
//! payload.
//!
//! Role assignment is the correctness-critical part: a chain node written by
//! the personality currently answering must come back as `assistant`, framed
//! first-person, or the model sees its own prior reply labelled as user
//! input and parrots it (the "echo" pathology). Nodes by other personalities
//! and by humans are `user` turns with third-person framing.

use chimera_core::types::MediaRef;
use chimera_refs::media::prioritize;
use chimera_refs::types::{ChainAuthor, ReferenceChain};

use crate::backend::{Role, WireMessage, WirePayload};

pub struct MessageFormatter {
    model: String,
    max_media: usize,
}

impl MessageFormatter {
    pub fn new(model: impl Into<String>, max_media: usize) -> Self {
        Self {
            model: model.into(),
            max_media,
        }
    }

    /// Build the payload for one turn.
    ///
    /// `media` is the recency-ordered list gathered by the resolver; at most
    /// `max_media` items survive, attached to the final user turn. Overflow
    /// is dropped, not spilled into extra turns.
    pub fn build(
        &self,
        resolving_display_name: &str,
        chain: &ReferenceChain,
        author_handle: &str,
        content: &str,
        media: Vec<MediaRef>,
    ) -> WirePayload {
        let mut messages = Vec::with_capacity(chain.len() + 1);

        for node in &chain.nodes {
            let (role, framed) = match node.author {
                ChainAuthor::OwnPersonality => (
                    Role::Assistant,
                    format!("As {}, I said: {}", resolving_display_name, node.content),
                ),
                ChainAuthor::OtherPersonality => (
                    Role::User,
                    format!("{} said: {}", node.author_handle, node.content),
                ),
                ChainAuthor::User => (
                    Role::User,
                    format!("{}: {}", node.author_handle, node.content),
                ),
            };
            messages.push(WireMessage {
                role,
                content: framed,
                media: None,
            });
        }

        let picked = prioritize(media, self.max_media);
        messages.push(WireMessage {
            role: Role::User,
            content: format!("{}: {}", author_handle, content),
            media: if picked.is_empty() { None } else { Some(picked) },
        });

        WirePayload {
            model: self.model.clone(),
            messages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_core::types::{MediaKind, MessageId};
    use chimera_refs::types::ChainNode;

    fn node(author: ChainAuthor, handle: &str, content: &str) -> ChainNode {
        ChainNode {
            message_id: MessageId::from("M"),
            author,
            author_handle: handle.to_string(),
            content: content.to_string(),
            media: Vec::new(),
            timestamp: chrono::Utc::now(),
            location_label: "#C".to_string(),
        }
    }

    fn formatter() -> MessageFormatter {
        MessageFormatter::new("test-model", 10)
    }

    #[test]
    fn own_personality_nodes_are_assistant_turns() {
        let chain = ReferenceChain {
            nodes: vec![node(ChainAuthor::OwnPersonality, "Lilith", "the stars burn")],
        };
        let payload = formatter().build("Lilith", &chain, "alice", "and then?", vec![]);

        assert_eq!(payload.messages[0].role, Role::Assistant);
        assert_eq!(
            payload.messages[0].content,
            "As Lilith, I said: the stars burn"
        );
    }

    #[test]
    fn other_personality_nodes_are_user_turns() {
        let chain = ReferenceChain {
            nodes: vec![node(ChainAuthor::OtherPersonality, "Sable", "who goes there")],
        };
        let payload = formatter().build("Lilith", &chain, "alice", "hm", vec![]);

        assert_eq!(payload.messages[0].role, Role::User);
        assert_eq!(payload.messages[0].content, "Sable said: who goes there");
    }

    #[test]
    fn human_nodes_carry_their_handle() {
        let chain = ReferenceChain {
            nodes: vec![node(ChainAuthor::User, "bob", "hello")],
        };
        let payload = formatter().build("Lilith", &chain, "alice", "hi", vec![]);
        assert_eq!(payload.messages[0].role, Role::User);
        assert_eq!(payload.messages[0].content, "bob: hello");
    }

    #[test]
    fn final_turn_is_the_live_message_with_media() {
        let media = vec![
            MediaRef {
                kind: MediaKind::Image,
                url: "http://x/i.png".to_string(),
            },
            MediaRef {
                kind: MediaKind::Audio,
                url: "http://x/a.ogg".to_string(),
            },
        ];
        let payload =
            formatter().build("Lilith", &ReferenceChain::default(), "alice", "look", media);

        let last = payload.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, "alice: look");
        let attached = last.media.as_ref().unwrap();
        // Priority reorder: audio leads.
        assert_eq!(attached[0].kind, MediaKind::Audio);
        assert_eq!(attached.len(), 2);
    }

    #[test]
    fn media_overflow_is_dropped_at_the_cap() {
        let media: Vec<MediaRef> = (0..15)
            .map(|i| MediaRef {
                kind: MediaKind::Image,
                url: format!("http://x/{i}.png"),
            })
            .collect();
        let formatter = MessageFormatter::new("m", 10);
        let payload = formatter.build("L", &ReferenceChain::default(), "a", "c", media);
        assert_eq!(payload.messages.last().unwrap().media.as_ref().unwrap().len(), 10);
    }
}
