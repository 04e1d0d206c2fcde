//! Classifies each inbound message's true origin.
//!
//! Three answers are possible: the message came from our own impersonation
//! webhook, from a third-party proxy system (a bot that deletes a user's
//! message and re-sends it under a different identity), or from a real user.
//! Everything downstream — the drop decision, age-gate bypass, and most
//! importantly which credentials a request inherits — hangs off this call.

use dashmap::DashMap;
use tracing::debug;

use chimera_core::config::IdentityConfig;
use chimera_core::types::UserId;
use chimera_platform::types::InboundMessage;

/// Closed set of message origins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOrigin {
    /// Emitted by this system's own webhook. The only unconditional drop.
    OwnWebhook,
    /// Emitted by a recognised third-party impersonation webhook.
    ProxySystem,
    RealUser,
}

/// Result of classifying one inbound message.
#[derive(Debug, Clone)]
pub struct Classification {
    pub origin: MessageOrigin,
    /// The account whose credentials this message may use. `None` for our own
    /// webhooks and for proxy messages whose real author is unknown — callers
    /// treat that as "cannot authenticate".
    pub real_user_id: Option<UserId>,
    /// Proxy-system messages may never execute auth-privileged commands,
    /// whoever is behind them.
    pub auth_commands_allowed: bool,
}

impl Classification {
    /// True iff the message must be dropped without further processing.
    pub fn should_ignore(&self) -> bool {
        self.origin == MessageOrigin::OwnWebhook
    }

    /// Webhook-origin traffic bypasses the age gate — the gate was already
    /// applied to whatever produced it — except when the content is an
    /// auth-privileged command, which re-anchors to the real user.
    pub fn may_bypass_age_gate(&self, is_auth_command: bool) -> bool {
        match self.origin {
            MessageOrigin::OwnWebhook => true,
            MessageOrigin::ProxySystem => !is_auth_command,
            MessageOrigin::RealUser => false,
        }
    }
}

pub struct IdentityTracker {
    self_bot_id: String,
    config: IdentityConfig,
    /// Webhook ids we created ourselves. Populated by the sender.
    own_webhooks: DashMap<String, ()>,
    /// Proxy webhook ids seen before, with the real user when one was linked.
    proxy_webhooks: DashMap<String, Option<UserId>>,
}

impl IdentityTracker {
    pub fn new(self_bot_id: impl Into<String>, config: IdentityConfig) -> Self {
        Self {
            self_bot_id: self_bot_id.into(),
            config,
            own_webhooks: DashMap::new(),
            proxy_webhooks: DashMap::new(),
        }
    }

    /// Record a webhook we created so its messages classify in O(1).
    pub fn register_own_webhook(&self, webhook_id: &str) {
        self.own_webhooks.insert(webhook_id.to_string(), ());
    }

    /// Bind a proxy webhook to the real account behind it, when known.
    pub fn link_proxy_webhook(&self, webhook_id: &str, real_user: UserId) {
        self.proxy_webhooks
            .insert(webhook_id.to_string(), Some(real_user));
    }

    /// Classify one inbound message. Infallible: anything that is neither
    /// provably ours nor a recognised proxy is a real user — the safe
    /// fallback, since it never inherits someone else's credentials.
    ///
    /// `active_display_names` is the registry's current display-name set;
    /// a webhook message authored under one of those names is ours even on
    /// platforms that strip application metadata.
    pub fn classify(
        &self,
        msg: &InboundMessage,
        active_display_names: &[String],
    ) -> Classification {
        if self.is_own_webhook(msg, active_display_names) {
            return Classification {
                origin: MessageOrigin::OwnWebhook,
                real_user_id: None,
                auth_commands_allowed: false,
            };
        }

        if let Some(real_user) = self.proxy_real_user(msg) {
            return Classification {
                origin: MessageOrigin::ProxySystem,
                real_user_id: real_user,
                auth_commands_allowed: false,
            };
        }

        Classification {
            origin: MessageOrigin::RealUser,
            real_user_id: Some(msg.author_id.clone()),
            auth_commands_allowed: true,
        }
    }

    /// Own-webhook recognition. Any one signal is sufficient:
    /// (a) the message's author is our own bot id;
    /// (b) the emitting application is us;
    /// (c) the webhook id is in the process-local "own webhook" cache;
    /// (d) a webhook-authored message carries an active personality's
    ///     display name — the fallback for platforms that strip (a)/(b).
    fn is_own_webhook(&self, msg: &InboundMessage, active_display_names: &[String]) -> bool {
        if msg.author_id.as_str() == self.self_bot_id {
            return true;
        }
        if msg.application_id.as_deref() == Some(self.self_bot_id.as_str()) {
            return true;
        }
        let Some(webhook_id) = msg.webhook_id.as_deref() else {
            // Not webhook-authored; signal (d) must not apply, or a real user
            // who renamed themselves after a personality would go silent.
            return false;
        };
        if self.own_webhooks.contains_key(webhook_id) {
            return true;
        }
        active_display_names
            .iter()
            .any(|name| name == &msg.author_display_name)
    }

    /// Proxy-system recognition: allow-listed application id, a known
    /// username tag, or a signed embed footer. Recognised webhook ids are
    /// cached so later messages classify without re-scanning.
    fn proxy_real_user(&self, msg: &InboundMessage) -> Option<Option<UserId>> {
        let webhook_id = msg.webhook_id.as_deref()?;

        if let Some(known) = self.proxy_webhooks.get(webhook_id) {
            return Some(known.value().clone());
        }

        let by_app_id = msg
            .application_id
            .as_deref()
            .map(|app| self.config.known_proxy_app_ids.iter().any(|k| k == app))
            .unwrap_or(false);

        let by_username_tag = self
            .config
            .proxy_username_tags
            .iter()
            .any(|tag| msg.author_display_name.contains(tag.as_str()));

        let by_footer = msg.embeds.iter().any(|e| {
            e.footer_text.as_deref().is_some_and(|footer| {
                self.config
                    .proxy_footer_signatures
                    .iter()
                    .any(|sig| footer.contains(sig.as_str()))
            })
        });

        if by_app_id || by_username_tag || by_footer {
            debug!(webhook_id, by_app_id, by_username_tag, by_footer, "proxy system recognised");
            self.proxy_webhooks.insert(webhook_id.to_string(), None);
            return Some(None);
        }

        None
    }
}
