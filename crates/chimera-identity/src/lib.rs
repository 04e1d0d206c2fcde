pub mod error;
pub mod oauth;
pub mod tokens;
pub mod tracker;

pub use error::IdentityError;
pub use oauth::{OAuthError, OAuthService, TokenGrant, TokenValidation};
pub use tokens::{AuthRecord, TokenStore};
pub use tracker::{Classification, IdentityTracker, MessageOrigin};
