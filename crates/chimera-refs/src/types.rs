use chimera_core::types::{MediaRef, MessageId};
use chrono::{DateTime, Utc};

/// Who authored a chain node, judged against the personality currently
/// answering. The distinction drives role assignment in the LLM payload:
/// a node by the resolving personality is the model's own prior output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainAuthor {
    User,
    /// Emitted by our webhook under the resolving personality's name.
    OwnPersonality,
    /// Emitted by our webhook under a different personality's name.
    OtherPersonality,
}

#[derive(Debug, Clone)]
pub struct ChainNode {
    pub message_id: MessageId,
    pub author: ChainAuthor,
    pub author_handle: String,
    pub content: String,
    pub media: Vec<MediaRef>,
    pub timestamp: DateTime<Utc>,
    /// Where the node lives, for the LLM's benefit (channel id or "DM").
    pub location_label: String,
}

/// Ordered root-first; bounded length; no duplicate message ids.
#[derive(Debug, Clone, Default)]
pub struct ReferenceChain {
    pub nodes: Vec<ChainNode>,
}

impl ReferenceChain {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}
