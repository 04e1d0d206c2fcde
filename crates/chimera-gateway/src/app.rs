//! Application wiring: configuration → persistence → dispatcher, plus the
//! inbound event loop. One lightweight task per event; shutdown cancels the
//! loop and drains in-flight dispatches.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use chimera_agent::LlmBackend;
use chimera_core::config::ChimeraConfig;
use chimera_core::error::ChimeraError;
use chimera_dispatch::Dispatcher;
use chimera_identity::OAuthService;
use chimera_platform::platform::ChatPlatform;
use chimera_platform::types::InboundMessage;
use chimera_registry::store::PersonalityStore;
use chimera_registry::PersonalityRegistry;

/// Consecutive platform auth rejections that mean the credentials are gone
/// for good, not hiccuping.
const AUTH_CASCADE_THRESHOLD: u32 = 5;

#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    Clean,
    AuthCascade,
}

pub struct App {
    pub dispatcher: Arc<Dispatcher>,
    auth_rejections: AtomicU32,
}

impl App {
    /// Build everything that can fail before the event loop starts. Errors
    /// here are bootstrap failures (exit code 1).
    pub fn bootstrap(
        config: ChimeraConfig,
        platform: Arc<dyn ChatPlatform>,
        oauth: Arc<dyn OAuthService>,
        llm: Arc<dyn LlmBackend>,
    ) -> Result<Self, ChimeraError> {
        let store = PersonalityStore::new(&config.storage.data_dir);
        let registry = PersonalityRegistry::with_store(store)
            .map_err(|e| ChimeraError::Persistence(e.to_string()))?;

        let dispatcher = Arc::new(Dispatcher::new(
            config,
            platform,
            oauth,
            llm,
            Arc::new(registry),
        ));
        dispatcher.spawn_maintenance();

        Ok(Self {
            dispatcher,
            auth_rejections: AtomicU32::new(0),
        })
    }

    /// Adapters report platform auth rejections here; a run of them in a row
    /// is irrecoverable (exit code 2). Any success resets the streak.
    /// The stdin loopback never calls this; real adapters do.
    #[allow(dead_code)]
    pub fn note_platform_auth(&self, rejected: bool) -> bool {
        if !rejected {
            self.auth_rejections.store(0, Ordering::Relaxed);
            return false;
        }
        let streak = self.auth_rejections.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(streak, "platform auth rejection");
        streak >= AUTH_CASCADE_THRESHOLD
    }

    /// Drive the dispatcher from an inbound event stream until the stream
    /// ends or `shutdown` fires. In-flight dispatches are drained on exit.
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<InboundMessage>,
        shutdown: CancellationToken,
    ) -> RunOutcome {
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, draining in-flight dispatches");
                    break;
                }
                event = events.recv() => {
                    let Some(msg) = event else {
                        info!("event stream closed");
                        break;
                    };
                    let dispatcher = Arc::clone(&self.dispatcher);
                    in_flight.spawn(async move {
                        dispatcher.handle_message(msg).await;
                    });
                    // Opportunistically reap finished dispatches.
                    while in_flight.try_join_next().is_some() {}
                }
            }

            if self.auth_rejections.load(Ordering::Relaxed) >= AUTH_CASCADE_THRESHOLD {
                warn!("cascading platform auth rejection, giving up");
                in_flight.abort_all();
                return RunOutcome::AuthCascade;
            }
        }

        while in_flight.join_next().await.is_some() {}
        RunOutcome::Clean
    }
}

/// Placeholder OAuth service for deployments that have not wired the real
/// exchange front-end. Every flow is politely refused.
pub struct DisabledOAuth;

#[async_trait::async_trait]
impl OAuthService for DisabledOAuth {
    fn authorization_url(&self, _state: &str) -> String {
        "https://example.invalid/oauth-not-configured".to_string()
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _user: &chimera_core::types::UserId,
    ) -> Result<chimera_identity::TokenGrant, chimera_identity::OAuthError> {
        Err(chimera_identity::OAuthError::Rejected(
            "OAuth front-end not configured".to_string(),
        ))
    }

    async fn validate_token(
        &self,
        _token: &str,
    ) -> Result<chimera_identity::TokenValidation, chimera_identity::OAuthError> {
        Ok(chimera_identity::TokenValidation {
            valid: false,
            user_id: None,
        })
    }

    async fn refresh_token(
        &self,
        _refresh: &str,
    ) -> Result<chimera_identity::TokenGrant, chimera_identity::OAuthError> {
        Err(chimera_identity::OAuthError::Rejected(
            "OAuth front-end not configured".to_string(),
        ))
    }

    async fn revoke_token(&self, _token: &str) -> Result<(), chimera_identity::OAuthError> {
        Ok(())
    }
}
