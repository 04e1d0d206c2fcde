pub mod chain;
pub mod media;
pub mod types;

pub use chain::ReferenceResolver;
pub use media::{extract_media, prioritize};
pub use types::{ChainAuthor, ChainNode, ReferenceChain};
