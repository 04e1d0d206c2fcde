pub mod backend;
pub mod coalesce;
pub mod fingerprint;
pub mod format;

pub use backend::{HttpLlmClient, LlmBackend, LlmError, Role, WireMessage, WirePayload};
pub use coalesce::{CoalesceError, RequestCoalescer};
pub use fingerprint::RequestFingerprint;
pub use format::MessageFormatter;
