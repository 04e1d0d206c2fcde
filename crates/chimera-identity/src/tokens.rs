//! Per-user credential store.
//!
//! All state lives inside a dedicated actor task; callers talk to it through
//! a command channel, so no mutable credential state is ever shared across
//! tasks. The argument to every lookup is the *real* user id produced by the
//! identity tracker — a webhook's synthetic author id must never reach here,
//! or a reply to an impersonated message would borrow someone else's token.
//! Token values never appear in log output.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use chimera_core::types::UserId;

use crate::error::{IdentityError, Result};
use crate::oauth::OAuthService;

/// One user's credentials.
#[derive(Debug, Clone)]
pub struct AuthRecord {
    pub token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthRecord {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

enum TokenCommand {
    Get {
        user: UserId,
        reply: oneshot::Sender<Option<String>>,
    },
    Set {
        user: UserId,
        record: AuthRecord,
        reply: oneshot::Sender<()>,
    },
    Revoke {
        user: UserId,
        reply: oneshot::Sender<bool>,
    },
}

/// Cheap-to-clone handle to the token actor.
#[derive(Clone)]
pub struct TokenStore {
    tx: mpsc::Sender<TokenCommand>,
}

impl TokenStore {
    /// Spawn the actor. The OAuth service is used for expiry refresh only;
    /// code exchange and revocation flow through the command layer.
    pub fn spawn(oauth: Arc<dyn OAuthService>) -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run_actor(rx, oauth));
        Self { tx }
    }

    /// Token for the given *real* user. Expired records are refreshed in
    /// place when a refresh token exists, otherwise they behave as absent.
    pub async fn get_token(&self, real_user: &UserId) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TokenCommand::Get {
                user: real_user.clone(),
                reply,
            })
            .await
            .map_err(|_| IdentityError::StoreUnavailable)?;
        rx.await.map_err(|_| IdentityError::StoreUnavailable)
    }

    pub async fn set_token(&self, user: &UserId, record: AuthRecord) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TokenCommand::Set {
                user: user.clone(),
                record,
                reply,
            })
            .await
            .map_err(|_| IdentityError::StoreUnavailable)?;
        rx.await.map_err(|_| IdentityError::StoreUnavailable)
    }

    /// Returns whether a record existed.
    pub async fn revoke_token(&self, user: &UserId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(TokenCommand::Revoke {
                user: user.clone(),
                reply,
            })
            .await
            .map_err(|_| IdentityError::StoreUnavailable)?;
        rx.await.map_err(|_| IdentityError::StoreUnavailable)
    }
}

async fn run_actor(mut rx: mpsc::Receiver<TokenCommand>, oauth: Arc<dyn OAuthService>) {
    let mut records: HashMap<UserId, AuthRecord> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            TokenCommand::Get { user, reply } => {
                let token = resolve_token(&mut records, &user, oauth.as_ref()).await;
                let _ = reply.send(token);
            }
            TokenCommand::Set {
                user,
                record,
                reply,
            } => {
                info!(user = %user, "credentials stored");
                records.insert(user, record);
                let _ = reply.send(());
            }
            TokenCommand::Revoke { user, reply } => {
                let existed = records.remove(&user).is_some();
                if existed {
                    info!(user = %user, "credentials revoked");
                }
                let _ = reply.send(existed);
            }
        }
    }
}

/// Fetch a live token, refreshing through the OAuth service when the stored
/// record has expired. The refresh awaits inside the actor loop — token
/// operations are rare enough that serializing them is the point, not a cost.
async fn resolve_token(
    records: &mut HashMap<UserId, AuthRecord>,
    user: &UserId,
    oauth: &dyn OAuthService,
) -> Option<String> {
    let record = records.get(user)?;
    if !record.is_expired(Utc::now()) {
        return Some(record.token.clone());
    }

    let Some(refresh) = record.refresh_token.clone() else {
        debug!(user = %user, "token expired with no refresh token");
        records.remove(user);
        return None;
    };

    match oauth.refresh_token(&refresh).await {
        Ok(grant) => {
            let refreshed = AuthRecord {
                token: grant.token.clone(),
                refresh_token: grant.refresh_token.or(Some(refresh)),
                expires_at: grant.expires_at,
            };
            records.insert(user.clone(), refreshed);
            debug!(user = %user, "token refreshed");
            Some(grant.token)
        }
        Err(e) => {
            warn!(user = %user, error = %e, "token refresh failed");
            records.remove(user);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{OAuthError, TokenGrant, TokenValidation};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeOAuth {
        refreshes: AtomicUsize,
        refresh_ok: bool,
    }

    #[async_trait]
    impl OAuthService for FakeOAuth {
        fn authorization_url(&self, state: &str) -> String {
            format!("https://auth.example/authorize?state={state}")
        }

        async fn exchange_code(
            &self,
            _code: &str,
            _user: &UserId,
        ) -> std::result::Result<TokenGrant, OAuthError> {
            Ok(TokenGrant {
                token: "exchanged".to_string(),
                refresh_token: None,
                expires_at: None,
            })
        }

        async fn validate_token(
            &self,
            _token: &str,
        ) -> std::result::Result<TokenValidation, OAuthError> {
            Ok(TokenValidation {
                valid: true,
                user_id: None,
            })
        }

        async fn refresh_token(
            &self,
            _refresh: &str,
        ) -> std::result::Result<TokenGrant, OAuthError> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.refresh_ok {
                Ok(TokenGrant {
                    token: "refreshed".to_string(),
                    refresh_token: None,
                    expires_at: None,
                })
            } else {
                Err(OAuthError::Rejected("refresh denied".to_string()))
            }
        }

        async fn revoke_token(&self, _token: &str) -> std::result::Result<(), OAuthError> {
            Ok(())
        }
    }

    fn fake(refresh_ok: bool) -> Arc<FakeOAuth> {
        Arc::new(FakeOAuth {
            refreshes: AtomicUsize::new(0),
            refresh_ok,
        })
    }

    #[tokio::test]
    async fn set_then_get_returns_token() {
        let store = TokenStore::spawn(fake(true));
        let user = UserId::from("U1");
        store
            .set_token(
                &user,
                AuthRecord {
                    token: "T1".to_string(),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(store.get_token(&user).await.unwrap(), Some("T1".to_string()));
    }

    #[tokio::test]
    async fn missing_user_is_absent() {
        let store = TokenStore::spawn(fake(true));
        assert_eq!(store.get_token(&UserId::from("nobody")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_token_refreshes_in_place() {
        let oauth = fake(true);
        let store = TokenStore::spawn(oauth.clone());
        let user = UserId::from("U1");
        store
            .set_token(
                &user,
                AuthRecord {
                    token: "stale".to_string(),
                    refresh_token: Some("R1".to_string()),
                    expires_at: Some(Utc::now() - chrono::Duration::seconds(5)),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            store.get_token(&user).await.unwrap(),
            Some("refreshed".to_string())
        );
        assert_eq!(oauth.refreshes.load(Ordering::SeqCst), 1);
        // The refreshed record is live; no second refresh.
        assert_eq!(
            store.get_token(&user).await.unwrap(),
            Some("refreshed".to_string())
        );
        assert_eq!(oauth.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_without_refresh_behaves_as_absent() {
        let store = TokenStore::spawn(fake(true));
        let user = UserId::from("U1");
        store
            .set_token(
                &user,
                AuthRecord {
                    token: "stale".to_string(),
                    refresh_token: None,
                    expires_at: Some(Utc::now() - chrono::Duration::seconds(5)),
                },
            )
            .await
            .unwrap();
        assert_eq!(store.get_token(&user).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_refresh_drops_the_record() {
        let oauth = fake(false);
        let store = TokenStore::spawn(oauth.clone());
        let user = UserId::from("U1");
        store
            .set_token(
                &user,
                AuthRecord {
                    token: "stale".to_string(),
                    refresh_token: Some("R1".to_string()),
                    expires_at: Some(Utc::now() - chrono::Duration::seconds(5)),
                },
            )
            .await
            .unwrap();

        assert_eq!(store.get_token(&user).await.unwrap(), None);
        // Record was dropped; the next get does not re-attempt.
        assert_eq!(store.get_token(&user).await.unwrap(), None);
        assert_eq!(oauth.refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn revoke_removes_the_record() {
        let store = TokenStore::spawn(fake(true));
        let user = UserId::from("U1");
        store
            .set_token(
                &user,
                AuthRecord {
                    token: "T1".to_string(),
                    refresh_token: None,
                    expires_at: None,
                },
            )
            .await
            .unwrap();
        assert!(store.revoke_token(&user).await.unwrap());
        assert!(!store.revoke_token(&user).await.unwrap());
        assert_eq!(store.get_token(&user).await.unwrap(), None);
    }
}
