//! Reference-chain walker.
//!
//! BFS from an inbound message over two edge kinds: the direct platform
//! reply reference and platform message links embedded in content. Depth is
//! bounded and the walk is cycle-free via a seen-id set — reply chains on a
//! platform that lets users link messages freely do contain loops.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use chimera_core::config::PLATFORM_CALL_TIMEOUT_MS;
use chimera_core::types::{ChannelId, MediaRef, MessageId, PersonalityId};
use chimera_platform::platform::ChatPlatform;
use chimera_platform::types::InboundMessage;

use crate::media::extract_media;
use crate::types::{ChainAuthor, ChainNode, ReferenceChain};

fn message_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/channels/([A-Za-z0-9_-]+)/([A-Za-z0-9_-]+)/([A-Za-z0-9_-]+)").unwrap()
    })
}

pub struct ReferenceResolver {
    platform: Arc<dyn ChatPlatform>,
    max_depth: usize,
}

impl ReferenceResolver {
    pub fn new(platform: Arc<dyn ChatPlatform>, max_depth: usize) -> Self {
        Self {
            platform,
            max_depth,
        }
    }

    /// Walk the references of `msg` and gather shippable media.
    ///
    /// The chain is returned root-first (oldest node leading) and never
    /// contains `msg` itself. The media list is ordered most-recent-first —
    /// `msg`'s own media leading — ready for [`crate::media::prioritize`].
    ///
    /// `name_owners` maps active display names to personality ids;
    /// `resolving` is the personality currently answering. Together they
    /// decide each node's [`ChainAuthor`].
    pub async fn resolve(
        &self,
        msg: &InboundMessage,
        resolving: &PersonalityId,
        name_owners: &HashMap<String, PersonalityId>,
    ) -> (ReferenceChain, Vec<MediaRef>) {
        let mut seen: HashSet<MessageId> = HashSet::new();
        seen.insert(msg.id.clone());

        let mut queue: VecDeque<(ChannelId, MessageId, usize)> = VecDeque::new();
        for (channel, id) in references_of(msg) {
            queue.push_back((channel, id, 1));
        }

        let mut nodes: Vec<ChainNode> = Vec::new();
        while let Some((channel, id, depth)) = queue.pop_front() {
            if nodes.len() >= self.max_depth {
                break;
            }
            if !seen.insert(id.clone()) {
                continue;
            }

            let fetched = match self.fetch(&channel, &id).await {
                Some(m) => m,
                None => {
                    debug!(message_id = %id, "referenced message unavailable");
                    continue;
                }
            };

            if depth < self.max_depth {
                for (ref_channel, ref_id) in references_of(&fetched) {
                    queue.push_back((ref_channel, ref_id, depth + 1));
                }
            }

            nodes.push(to_node(&fetched, resolving, name_owners));
        }

        // Root-first: the oldest referenced message leads.
        nodes.sort_by_key(|n| n.timestamp);

        let mut media = extract_media(msg);
        for node in nodes.iter().rev() {
            media.extend(node.media.iter().cloned());
        }

        (ReferenceChain { nodes }, media)
    }

    /// Platform fetch with the per-call timeout and one retry — the read is
    /// idempotent.
    async fn fetch(&self, channel: &ChannelId, id: &MessageId) -> Option<InboundMessage> {
        let timeout = Duration::from_millis(PLATFORM_CALL_TIMEOUT_MS);
        for attempt in 0..2 {
            match tokio::time::timeout(timeout, self.platform.fetch_message(channel, id)).await {
                Ok(Ok(found)) => return found,
                Ok(Err(e)) if e.is_transient() && attempt == 0 => {
                    warn!(message_id = %id, error = %e, "message fetch failed, retrying");
                }
                Ok(Err(e)) => {
                    warn!(message_id = %id, error = %e, "message fetch failed");
                    return None;
                }
                Err(_) if attempt == 0 => {
                    warn!(message_id = %id, "message fetch timed out, retrying");
                }
                Err(_) => {
                    warn!(message_id = %id, "message fetch timed out");
                    return None;
                }
            }
        }
        None
    }
}

/// The outgoing reference edges of one message: its direct reply parent and
/// every platform message link in its content.
fn references_of(msg: &InboundMessage) -> Vec<(ChannelId, MessageId)> {
    let mut refs = Vec::new();
    if let Some(parent) = &msg.reference {
        refs.push((msg.channel_id.clone(), parent.clone()));
    }
    for cap in message_link().captures_iter(&msg.content) {
        refs.push((
            ChannelId::from(&cap[2]),
            MessageId::from(&cap[3]),
        ));
    }
    refs
}

fn to_node(
    msg: &InboundMessage,
    resolving: &PersonalityId,
    name_owners: &HashMap<String, PersonalityId>,
) -> ChainNode {
    let author = if msg.webhook_id.is_some() {
        match name_owners.get(&msg.author_display_name) {
            Some(pid) if pid == resolving => ChainAuthor::OwnPersonality,
            Some(_) => ChainAuthor::OtherPersonality,
            None => ChainAuthor::User,
        }
    } else {
        ChainAuthor::User
    };

    ChainNode {
        message_id: msg.id.clone(),
        author,
        author_handle: msg.author_display_name.clone(),
        content: msg.content.clone(),
        media: extract_media(msg),
        timestamp: msg.timestamp,
        location_label: if msg.is_dm {
            "DM".to_string()
        } else {
            format!("#{}", msg.channel_id)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chimera_platform::memory::{test_message, InMemoryPlatform};
    use chrono::{Duration as ChronoDuration, Utc};

    fn owners() -> HashMap<String, PersonalityId> {
        let mut map = HashMap::new();
        map.insert("Lilith".to_string(), PersonalityId::from("p1"));
        map.insert("Sable".to_string(), PersonalityId::from("p2"));
        map
    }

    fn resolver(platform: Arc<InMemoryPlatform>, depth: usize) -> ReferenceResolver {
        ReferenceResolver::new(platform, depth)
    }

    #[tokio::test]
    async fn walks_a_reply_chain_root_first() {
        let platform = Arc::new(InMemoryPlatform::new());
        let base = Utc::now();

        let mut root = test_message("M1", "C", "alice", "first");
        root.timestamp = base - ChronoDuration::seconds(30);
        platform.put_message(root);

        let mut mid = test_message("M2", "C", "bob", "second");
        mid.reference = Some(MessageId::from("M1"));
        mid.timestamp = base - ChronoDuration::seconds(20);
        platform.put_message(mid);

        let mut tip = test_message("M3", "C", "carol", "third");
        tip.reference = Some(MessageId::from("M2"));
        tip.timestamp = base;

        let (chain, _) = resolver(platform, 10)
            .resolve(&tip, &PersonalityId::from("p1"), &owners())
            .await;

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.nodes[0].message_id, MessageId::from("M1"));
        assert_eq!(chain.nodes[1].message_id, MessageId::from("M2"));
    }

    #[tokio::test]
    async fn depth_bound_and_no_duplicate_ids() {
        let platform = Arc::new(InMemoryPlatform::new());
        let base = Utc::now();

        // A 15-message reply chain; only MAX_REF_DEPTH=10 may come back.
        for i in 1..=15 {
            let mut m = test_message(&format!("M{i}"), "C", "alice", "msg");
            if i > 1 {
                m.reference = Some(MessageId::from(format!("M{}", i - 1).as_str()));
            }
            m.timestamp = base - ChronoDuration::seconds(100 - i);
            platform.put_message(m);
        }
        let mut tip = test_message("M16", "C", "alice", "tip");
        tip.reference = Some(MessageId::from("M15"));

        let (chain, _) = resolver(platform, 10)
            .resolve(&tip, &PersonalityId::from("p1"), &owners())
            .await;

        assert_eq!(chain.len(), 10);
        let mut ids: Vec<_> = chain.nodes.iter().map(|n| n.message_id.clone()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn cycles_terminate() {
        let platform = Arc::new(InMemoryPlatform::new());

        let mut a = test_message("A", "C", "alice", "a");
        a.reference = Some(MessageId::from("B"));
        platform.put_message(a);
        let mut b = test_message("B", "C", "bob", "b");
        b.reference = Some(MessageId::from("A"));
        platform.put_message(b);

        let mut tip = test_message("T", "C", "carol", "t");
        tip.reference = Some(MessageId::from("A"));

        let (chain, _) = resolver(platform, 10)
            .resolve(&tip, &PersonalityId::from("p1"), &owners())
            .await;

        // A and B each appear exactly once.
        assert_eq!(chain.len(), 2);
    }

    #[tokio::test]
    async fn message_links_in_content_are_followed() {
        let platform = Arc::new(InMemoryPlatform::new());
        platform.put_message(test_message("M9", "C2", "alice", "linked content"));

        let tip = test_message(
            "T",
            "C",
            "bob",
            "see https://chat.example/channels/G1/C2/M9 for context",
        );

        let (chain, _) = resolver(platform, 10)
            .resolve(&tip, &PersonalityId::from("p1"), &owners())
            .await;

        assert_eq!(chain.len(), 1);
        assert_eq!(chain.nodes[0].content, "linked content");
    }

    #[tokio::test]
    async fn author_kinds_follow_the_resolving_personality() {
        let platform = Arc::new(InMemoryPlatform::new());
        let base = Utc::now();

        let mut own = test_message("M1", "C", "W1", "as lilith");
        own.webhook_id = Some("W1".to_string());
        own.author_display_name = "Lilith".to_string();
        own.timestamp = base - ChronoDuration::seconds(30);
        platform.put_message(own);

        let mut other = test_message("M2", "C", "W1", "as sable");
        other.webhook_id = Some("W1".to_string());
        other.author_display_name = "Sable".to_string();
        other.reference = Some(MessageId::from("M1"));
        other.timestamp = base - ChronoDuration::seconds(20);
        platform.put_message(other);

        let mut plain = test_message("M3", "C", "dave", "just me");
        plain.reference = Some(MessageId::from("M2"));
        plain.timestamp = base - ChronoDuration::seconds(10);
        platform.put_message(plain);

        let mut tip = test_message("T", "C", "erin", "tip");
        tip.reference = Some(MessageId::from("M3"));

        let (chain, _) = resolver(platform, 10)
            .resolve(&tip, &PersonalityId::from("p1"), &owners())
            .await;

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.nodes[0].author, ChainAuthor::OwnPersonality);
        assert_eq!(chain.nodes[1].author, ChainAuthor::OtherPersonality);
        assert_eq!(chain.nodes[2].author, ChainAuthor::User);
    }

    #[tokio::test]
    async fn media_is_ordered_most_recent_first() {
        let platform = Arc::new(InMemoryPlatform::new());
        let base = Utc::now();

        let mut old = test_message("M1", "C", "alice", "[Image: http://x/old.png]");
        old.timestamp = base - ChronoDuration::seconds(30);
        platform.put_message(old);

        let mut tip = test_message("T", "C", "bob", "[Image: http://x/new.png]");
        tip.reference = Some(MessageId::from("M1"));
        tip.timestamp = base;

        let (_, media) = resolver(platform, 10)
            .resolve(&tip, &PersonalityId::from("p1"), &owners())
            .await;

        assert_eq!(media.len(), 2);
        assert_eq!(media[0].url, "http://x/new.png");
        assert_eq!(media[1].url, "http://x/old.png");
    }
}
