//! Top-level event handler.
//!
//! One linear pass per inbound event: classify origin → dedup → command
//! short-circuit → pick the responding personality → policy gate → fetch the
//! real author's credentials → build the reference chain → coalesced LLM
//! call → impersonated emission → refresh conversation state. Every log line
//! in the pass carries the platform message id as correlation id, and this
//! is the only place an error turns into a user-visible message.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, info_span, warn, Instrument};

use chimera_agent::{
    CoalesceError, LlmBackend, MessageFormatter, RequestCoalescer, RequestFingerprint,
};
use chimera_conversation::ConversationState;
use chimera_core::config::ChimeraConfig;
use chimera_core::types::UserId;
use chimera_dedup::Deduplicator;
use chimera_identity::{Classification, IdentityTracker, OAuthService, TokenStore};
use chimera_platform::platform::ChatPlatform;
use chimera_platform::types::InboundMessage;
use chimera_refs::ReferenceResolver;
use chimera_registry::{Personality, PersonalityRegistry};
use chimera_webhook::WebhookSender;

use crate::error::DispatchError;
use crate::mention::extract_mention;

pub struct Dispatcher {
    pub(crate) config: ChimeraConfig,
    pub(crate) platform: Arc<dyn ChatPlatform>,
    pub(crate) identity: Arc<IdentityTracker>,
    pub(crate) dedup: Arc<Deduplicator>,
    pub(crate) registry: Arc<PersonalityRegistry>,
    pub(crate) tokens: TokenStore,
    pub(crate) oauth: Arc<dyn OAuthService>,
    pub(crate) conversation: Arc<ConversationState>,
    resolver: ReferenceResolver,
    coalescer: RequestCoalescer,
    llm: Arc<dyn LlmBackend>,
    formatter: MessageFormatter,
    sender: WebhookSender,
}

impl Dispatcher {
    pub fn new(
        config: ChimeraConfig,
        platform: Arc<dyn ChatPlatform>,
        oauth: Arc<dyn OAuthService>,
        llm: Arc<dyn LlmBackend>,
        registry: Arc<PersonalityRegistry>,
    ) -> Self {
        let limits = &config.limits;
        let identity = Arc::new(IdentityTracker::new(
            config.platform.self_bot_id.clone(),
            config.identity.clone(),
        ));
        let conversation = Arc::new(ConversationState::new(std::time::Duration::from_millis(
            limits.conv_ttl_ms,
        )));
        let dedup = Arc::new(Deduplicator::new(std::time::Duration::from_millis(
            limits.dedup_window_ms,
        )));
        let resolver = ReferenceResolver::new(Arc::clone(&platform), limits.max_ref_depth);
        let coalescer = RequestCoalescer::new(std::time::Duration::from_millis(
            limits.request_timeout_ms,
        ));
        let formatter = MessageFormatter::new(config.llm.model.clone(), limits.max_media_per_request);
        let sender = WebhookSender::new(
            Arc::clone(&platform),
            Arc::clone(&conversation),
            Arc::clone(&identity),
            UserId::from(config.platform.self_bot_id.as_str()),
            config.platform.webhook_name.clone(),
        );
        let tokens = TokenStore::spawn(Arc::clone(&oauth));

        Self {
            config,
            platform,
            identity,
            dedup,
            registry,
            tokens,
            oauth,
            conversation,
            resolver,
            coalescer,
            llm,
            formatter,
            sender,
        }
    }

    /// Start the background sweepers. Call once after construction.
    pub fn spawn_maintenance(&self) {
        self.dedup.spawn_sweeper();
        self.conversation.spawn_sweeper();
    }

    // Shared-state accessors for the command layer, the gateway, and tests.
    pub fn registry(&self) -> &Arc<PersonalityRegistry> {
        &self.registry
    }
    pub fn conversation(&self) -> &Arc<ConversationState> {
        &self.conversation
    }
    pub fn identity(&self) -> &Arc<IdentityTracker> {
        &self.identity
    }
    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Handle one inbound event end to end, including error delivery.
    pub async fn handle_message(&self, msg: InboundMessage) {
        let span = info_span!("dispatch", message_id = %msg.id);
        async {
            match self.process(&msg).await {
                Ok(()) => {}
                Err(e) => self.deliver_error(&msg, e).await,
            }
        }
        .instrument(span)
        .await;
    }

    async fn process(&self, msg: &InboundMessage) -> Result<(), DispatchError> {
        // 1. Origin classification; our own webhook traffic is dropped before
        //    anything else runs.
        let names = self.registry.display_names();
        let classification = self.identity.classify(msg, &names);
        if classification.should_ignore() {
            info!("ignored own webhook");
            return Ok(());
        }

        let prefix = self.config.platform.command_prefix.clone();
        let is_command = msg.content.trim_start().starts_with(prefix.as_str());

        // 2. Replay/duplicate rejection.
        if !self.dedup.should_process(
            &msg.id,
            &msg.channel_id,
            &msg.author_id,
            &msg.content,
            is_command,
        ) {
            return Err(DispatchError::Replay);
        }

        // 3. Commands never reach the LLM pipeline.
        if is_command {
            return self.handle_command(msg, &classification).await;
        }

        // 4. Which personality answers, and with what content.
        let real_user = classification.real_user_id.clone();
        let Some((personality, content)) = self.resolve_target(msg, real_user.as_ref())? else {
            return Ok(());
        };
        debug!(personality = %personality.id, "target personality resolved");

        // 5. Age gate. Webhook-origin traffic already passed it upstream.
        if !classification.may_bypass_age_gate(false) {
            self.check_age_gate(msg, real_user.as_ref()).await?;
        }

        // 6. Credentials belong to the real author — never to the webhook
        //    identity a reply happens to reference.
        let real_user = real_user.ok_or(DispatchError::NotAuthenticated)?;
        let token = self
            .tokens
            .get_token(&real_user)
            .await
            .map_err(|e| DispatchError::Internal {
                message: e.to_string(),
            })?
            .ok_or(DispatchError::NotAuthenticated)?;

        // 7. Context: reply chain, linked messages, media.
        let owners = self.registry.display_name_owners();
        let (chain, media) = self.resolver.resolve(msg, &personality.id, &owners).await;
        debug!(chain_len = chain.len(), media = media.len(), "reference chain built");

        // 8. Single-flighted LLM call.
        let payload = self.formatter.build(
            &personality.display_name,
            &chain,
            &msg.author_display_name,
            &content,
            media,
        );
        let fingerprint = RequestFingerprint::compute(
            &personality.id,
            &msg.channel_id,
            &real_user,
            &content,
            Utc::now().timestamp(),
        );
        let backend = Arc::clone(&self.llm);
        let reply = self
            .coalescer
            .dispatch(&fingerprint, async move {
                backend
                    .complete(&token, &payload)
                    .await
                    .map_err(CoalesceError::from)
            })
            .await
            .map_err(|e| llm_error(e, &personality))?;

        // 9. Emit as the personality; the sender records reply bindings for
        //    every chunk it gets out.
        self.sender
            .send(&personality, &msg.channel_id, &real_user, &reply, msg.is_dm)
            .await
            .map_err(|e| DispatchError::SendFailed {
                reason: e.to_string(),
            })?;

        // 10. Keep the conversation warm for auto-respond.
        self.conversation
            .refresh_auto_respond(&msg.channel_id, &real_user, &personality.id);
        info!(personality = %personality.id, "dispatch complete");
        Ok(())
    }

    /// Target resolution precedence: reply binding → explicit mention →
    /// channel activation → warm auto-respond dialog. Returns the personality
    /// and the content destined for the LLM (mention markers removed).
    fn resolve_target(
        &self,
        msg: &InboundMessage,
        real_user: Option<&UserId>,
    ) -> Result<Option<(Personality, String)>, DispatchError> {
        if let Some(parent) = &msg.reference {
            if let Some(binding) = self.conversation.binding(parent) {
                // A binding to a removed personality is "no binding".
                if let Some(p) = self.registry.get(&binding.personality_id) {
                    debug!(parent = %parent, "resolved via reply binding");
                    return Ok(Some((p, msg.content.clone())));
                }
            }
        }

        if let Some((mention, rest)) = extract_mention(&msg.content) {
            let lookup_user = real_user.cloned().unwrap_or_else(|| msg.author_id.clone());
            return match self.registry.lookup(&mention, &lookup_user) {
                Some(p) => Ok(Some((p, rest))),
                None => Err(DispatchError::PersonalityNotFound { query: mention }),
            };
        }

        if let Some(activation) = self.conversation.activation(&msg.channel_id) {
            if let Some(p) = self.registry.get(&activation.personality_id) {
                debug!("resolved via channel activation");
                return Ok(Some((p, msg.content.clone())));
            }
        }

        if let Some(user) = real_user {
            if let Some(pid) = self.conversation.auto_respond_target(&msg.channel_id, user) {
                if let Some(p) = self.registry.get(&pid) {
                    debug!("resolved via auto-respond");
                    return Ok(Some((p, msg.content.clone())));
                }
            }
        }

        Ok(None)
    }

    /// Real users talk to personalities in age-restricted channels, or after
    /// explicit verification.
    async fn check_age_gate(
        &self,
        msg: &InboundMessage,
        real_user: Option<&UserId>,
    ) -> Result<(), DispatchError> {
        let nsfw = self
            .platform
            .is_nsfw(&msg.channel_id)
            .await
            .unwrap_or(false);
        if nsfw {
            return Ok(());
        }
        if let Some(user) = real_user {
            if self.conversation.age_verified(user) {
                return Ok(());
            }
        }
        Err(DispatchError::PolicyBlocked {
            reason: "Personalities can only talk in age-restricted channels, or after your \
                     account is verified."
                .to_string(),
        })
    }

    /// Single error→user mapping point. Silent kinds log and stop; the rest
    /// become channel messages, except auth guidance which prefers a DM.
    async fn deliver_error(&self, msg: &InboundMessage, err: DispatchError) {
        if matches!(err, DispatchError::Replay | DispatchError::Cancelled) {
            debug!(code = err.code(), "dispatch dropped");
            return;
        }
        warn!(code = err.code(), error = %err, "dispatch failed");

        let prefix = &self.config.platform.command_prefix;
        let Some(text) = err.user_message(prefix) else {
            return;
        };

        if matches!(err, DispatchError::NotAuthenticated) {
            let names = self.registry.display_names();
            let real = self
                .identity
                .classify(msg, &names)
                .real_user_id
                .unwrap_or_else(|| msg.author_id.clone());
            if self.platform.send_dm(&real, &text).await.is_ok() {
                return;
            }
            debug!(user = %real, "auth guidance DM blocked, falling back to channel");
        }

        if let Err(e) = self.platform.send_message(&msg.channel_id, &text).await {
            warn!(error = %e, "error delivery failed");
        }
    }

    pub(crate) async fn reply(&self, msg: &InboundMessage, text: &str) {
        if let Err(e) = self.platform.send_message(&msg.channel_id, text).await {
            warn!(error = %e, "command reply failed");
        }
    }
}

fn llm_error(e: CoalesceError, personality: &Personality) -> DispatchError {
    let custom = personality.error_message.clone();
    match e {
        CoalesceError::Cancelled => DispatchError::Cancelled,
        CoalesceError::Timeout => DispatchError::LlmTransient {
            message: "request timed out".to_string(),
            custom_message: custom,
        },
        CoalesceError::Upstream {
            transient: true,
            message,
            ..
        } => DispatchError::LlmTransient {
            message,
            custom_message: custom,
        },
        CoalesceError::Upstream { message, .. } => DispatchError::LlmPermanent {
            message,
            custom_message: custom,
        },
        CoalesceError::Internal(message) => DispatchError::Internal { message },
    }
}
