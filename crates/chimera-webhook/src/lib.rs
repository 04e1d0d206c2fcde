pub mod error;
pub mod sender;
pub mod split;

pub use error::SendError;
pub use sender::WebhookSender;
pub use split::split_message;
