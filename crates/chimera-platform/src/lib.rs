pub mod error;
pub mod memory;
pub mod platform;
pub mod types;

pub use error::PlatformError;
pub use memory::InMemoryPlatform;
pub use platform::ChatPlatform;
pub use types::{
    Attachment, Embed, InboundMessage, WebhookHandle, WebhookMessage,
};
