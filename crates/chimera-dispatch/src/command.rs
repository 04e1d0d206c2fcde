//! Prefix commands.
//!
//! Everything a user manages without talking to a personality: the registry
//! (add/alias/remove/list/info), channel activation, the auto-respond
//! preference, conversation reset, and the OAuth flow. Command traffic never
//! reaches the LLM pipeline. The recent-command scope collapses double-taps
//! and the completed-add scope keeps event replays from re-running an add.

use chimera_core::types::UserId;
use chimera_identity::{AuthRecord, Classification};
use chimera_platform::types::InboundMessage;
use chimera_registry::error::RegistryError;
use chimera_registry::types::fold;
use chimera_registry::Personality;
use chimera_conversation::ChannelActivation;
use tracing::{debug, info};

use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;

impl Dispatcher {
    pub(crate) async fn handle_command(
        &self,
        msg: &InboundMessage,
        cls: &Classification,
    ) -> Result<(), DispatchError> {
        let prefix = self.config.platform.command_prefix.clone();
        let rest = msg
            .content
            .trim_start()
            .strip_prefix(prefix.as_str())
            .unwrap_or("")
            .trim();
        let mut parts = rest.split_whitespace();
        let verb = parts.next().unwrap_or("help").to_lowercase();
        let args: Vec<&str> = parts.collect();

        // Auth isolation: a proxy system may never execute auth commands,
        // whoever is behind it.
        if verb == "auth" && !cls.auth_commands_allowed {
            return Err(DispatchError::AuthForbiddenForProxy);
        }

        let user = match cls.real_user_id.clone() {
            Some(u) => u,
            None => {
                // Unknown real author behind a proxy: read-only commands are
                // fine under the synthetic id; mutations are not.
                if matches!(verb.as_str(), "list" | "info" | "help") {
                    msg.author_id.clone()
                } else {
                    self.reply(
                        msg,
                        "I can't verify who you are through a proxy system, so this \
                         command isn't available here.",
                    )
                    .await;
                    return Ok(());
                }
            }
        };

        // Double-tap guard.
        if !self.dedup.mark_command(&user, &verb, &args) {
            return Err(DispatchError::Replay);
        }
        debug!(verb = %verb, "command accepted");

        match verb.as_str() {
            "add" => self.cmd_add(msg, &user, &args).await,
            "alias" => self.cmd_alias(msg, &user, &args).await,
            "remove" => self.cmd_remove(msg, &user, &args).await,
            "list" => self.cmd_list(msg, &user).await,
            "info" => self.cmd_info(msg, &user, &args).await,
            "activate" => self.cmd_activate(msg, &user, &args).await,
            "deactivate" => self.cmd_deactivate(msg, &user).await,
            "auto" => self.cmd_auto(msg, &user, &args).await,
            "reset" => self.cmd_reset(msg, &user).await,
            "auth" => self.cmd_auth(msg, &user, &args).await,
            _ => self.cmd_help(msg, &prefix).await,
        }
    }

    async fn cmd_add(
        &self,
        msg: &InboundMessage,
        user: &UserId,
        args: &[&str],
    ) -> Result<(), DispatchError> {
        let Some(name) = args.first() else {
            self.reply(msg, "Usage: add <name> [avatar-url]").await;
            return Ok(());
        };

        // A platform replay of the add event must not create a twin.
        if !self.dedup.mark_completed_add(user, &fold(name)) {
            return Err(DispatchError::Replay);
        }

        let mut personality = Personality::new(*name, user.clone());
        personality.avatar_url = args.get(1).map(|s| s.to_string());

        match self.registry.add(personality) {
            Ok(()) => {
                info!(name = %name, "personality added");
                self.reply(
                    msg,
                    &format!("Added **{name}**. Mention @{} to talk to them.", fold(name)),
                )
                .await;
            }
            Err(e) => {
                self.dedup.clear_completed_add(user, &fold(name));
                self.reply(msg, &format!("Couldn't add {name}: {e}")).await;
            }
        }
        Ok(())
    }

    async fn cmd_alias(
        &self,
        msg: &InboundMessage,
        user: &UserId,
        args: &[&str],
    ) -> Result<(), DispatchError> {
        let (Some(alias), Some(target)) = (args.first(), args.get(1)) else {
            self.reply(msg, "Usage: alias <alias> <name>").await;
            return Ok(());
        };
        let Some(personality) = self.registry.lookup(target, user) else {
            return Err(DispatchError::PersonalityNotFound {
                query: target.to_string(),
            });
        };
        match self.registry.add_user_alias(user, alias, &personality.id) {
            Ok(()) => {
                self.reply(
                    msg,
                    &format!("**{alias}** now points at {} (for you).", personality.display_name),
                )
                .await
            }
            Err(RegistryError::AliasCollision { alias }) => {
                self.reply(
                    msg,
                    &format!("\"{alias}\" already names a different personality for everyone."),
                )
                .await
            }
            Err(e) => self.reply(msg, &format!("Couldn't create alias: {e}")).await,
        }
        Ok(())
    }

    async fn cmd_remove(
        &self,
        msg: &InboundMessage,
        user: &UserId,
        args: &[&str],
    ) -> Result<(), DispatchError> {
        if args.is_empty() {
            self.reply(msg, "Usage: remove <name>").await;
            return Ok(());
        }
        let query = args.join(" ");
        let Some(personality) = self.registry.lookup(&query, user) else {
            return Err(DispatchError::PersonalityNotFound { query });
        };

        let is_admin = self
            .platform
            .member_has_manage_messages(&msg.channel_id, user)
            .await
            .unwrap_or(false);

        match self.registry.remove(&personality.id, user, is_admin) {
            Ok(removed) => {
                self.dedup
                    .clear_completed_add(&removed.owner_user_id, &fold(&removed.display_name));
                self.reply(msg, &format!("Removed **{}**.", removed.display_name))
                    .await;
                Ok(())
            }
            Err(RegistryError::NotAuthorized { reason }) => {
                Err(DispatchError::PolicyBlocked { reason })
            }
            Err(e) => {
                self.reply(msg, &format!("Couldn't remove: {e}")).await;
                Ok(())
            }
        }
    }

    async fn cmd_list(&self, msg: &InboundMessage, user: &UserId) -> Result<(), DispatchError> {
        // Racing handlers would double-post the same listing.
        if !self.dedup.mark_embed(&msg.id, "list") {
            return Err(DispatchError::Replay);
        }
        let personalities = self.registry.list();
        if personalities.is_empty() {
            self.reply(msg, "No personalities yet. Start with `add <name>`.")
                .await;
            return Ok(());
        }
        let mut lines = vec![format!("{} personalities:", personalities.len())];
        for p in personalities {
            let yours = if &p.owner_user_id == user { " (yours)" } else { "" };
            lines.push(format!("• **{}**{yours}", p.display_name));
        }
        self.reply(msg, &lines.join("\n")).await;
        Ok(())
    }

    async fn cmd_info(
        &self,
        msg: &InboundMessage,
        user: &UserId,
        args: &[&str],
    ) -> Result<(), DispatchError> {
        if !self.dedup.mark_embed(&msg.id, "info") {
            return Err(DispatchError::Replay);
        }
        let query = args.join(" ");
        let Some(p) = self.registry.lookup(&query, user) else {
            return Err(DispatchError::PersonalityNotFound { query });
        };
        let avatar = p.avatar_url.as_deref().unwrap_or("none");
        self.reply(
            msg,
            &format!(
                "**{}**\nid: {}\nowner: {}\navatar: {}\nadded: {}",
                p.display_name,
                p.id,
                p.owner_user_id,
                avatar,
                p.created_at.format("%Y-%m-%d %H:%M UTC"),
            ),
        )
        .await;
        Ok(())
    }

    async fn cmd_activate(
        &self,
        msg: &InboundMessage,
        user: &UserId,
        args: &[&str],
    ) -> Result<(), DispatchError> {
        if msg.is_dm {
            return Err(DispatchError::PolicyBlocked {
                reason: "Activation only works in server channels.".to_string(),
            });
        }
        let can_manage = self
            .platform
            .member_has_manage_messages(&msg.channel_id, user)
            .await
            .unwrap_or(false);
        if !can_manage {
            return Err(DispatchError::PolicyBlocked {
                reason: "You need the manage-messages permission to activate a personality."
                    .to_string(),
            });
        }
        let nsfw = self
            .platform
            .is_nsfw(&msg.channel_id)
            .await
            .unwrap_or(false);
        if !nsfw {
            return Err(DispatchError::PolicyBlocked {
                reason: "Activation is only allowed in age-restricted channels.".to_string(),
            });
        }

        let query = args.join(" ");
        let Some(p) = self.registry.lookup(&query, user) else {
            return Err(DispatchError::PersonalityNotFound { query });
        };
        self.conversation.activate(ChannelActivation {
            channel_id: msg.channel_id.clone(),
            personality_id: p.id.clone(),
            activated_by: user.clone(),
            activated_at: chrono::Utc::now(),
        });
        self.reply(
            msg,
            &format!("**{}** now answers every message in this channel.", p.display_name),
        )
        .await;
        Ok(())
    }

    async fn cmd_deactivate(&self, msg: &InboundMessage, user: &UserId) -> Result<(), DispatchError> {
        let can_manage = self
            .platform
            .member_has_manage_messages(&msg.channel_id, user)
            .await
            .unwrap_or(false);
        if !can_manage {
            return Err(DispatchError::PolicyBlocked {
                reason: "You need the manage-messages permission to deactivate.".to_string(),
            });
        }
        match self.conversation.deactivate(&msg.channel_id) {
            Some(prior) => {
                let name = self
                    .registry
                    .get(&prior.personality_id)
                    .map(|p| p.display_name)
                    .unwrap_or_else(|| prior.personality_id.to_string());
                self.reply(msg, &format!("**{name}** no longer answers here.")).await;
            }
            None => self.reply(msg, "Nothing is activated in this channel.").await,
        }
        Ok(())
    }

    async fn cmd_auto(
        &self,
        msg: &InboundMessage,
        user: &UserId,
        args: &[&str],
    ) -> Result<(), DispatchError> {
        match args.first().copied() {
            Some("on") => {
                self.conversation.set_auto_respond_pref(user, true);
                self.reply(msg, "Auto-respond on: personalities keep talking to you without re-mentioning.").await;
            }
            Some("off") => {
                self.conversation.set_auto_respond_pref(user, false);
                self.reply(msg, "Auto-respond off.").await;
            }
            _ => self.reply(msg, "Usage: auto on|off").await,
        }
        Ok(())
    }

    async fn cmd_reset(&self, msg: &InboundMessage, user: &UserId) -> Result<(), DispatchError> {
        if self.conversation.reset(&msg.channel_id, user) {
            self.reply(msg, "Conversation reset.").await;
        } else {
            self.reply(msg, "No active conversation here.").await;
        }
        Ok(())
    }

    async fn cmd_auth(
        &self,
        msg: &InboundMessage,
        user: &UserId,
        args: &[&str],
    ) -> Result<(), DispatchError> {
        match args.first().copied().unwrap_or("start") {
            "start" => {
                let url = self.oauth.authorization_url(user.as_str());
                let guidance = format!("Authorize here, then run `auth code <code>`:\n{url}");
                // The link is personal; prefer DMs, fall back to the channel.
                if self.platform.send_dm(user, &guidance).await.is_ok() {
                    if !msg.is_dm {
                        self.reply(msg, "Check your DMs for the authorization link.").await;
                    }
                } else {
                    self.reply(msg, &guidance).await;
                }
            }
            "code" => {
                let Some(code) = args.get(1) else {
                    self.reply(msg, "Usage: auth code <code>").await;
                    return Ok(());
                };
                match self.oauth.exchange_code(code, user).await {
                    Ok(grant) => {
                        self.tokens
                            .set_token(
                                user,
                                AuthRecord {
                                    token: grant.token,
                                    refresh_token: grant.refresh_token,
                                    expires_at: grant.expires_at,
                                },
                            )
                            .await
                            .map_err(|e| DispatchError::Internal {
                                message: e.to_string(),
                            })?;
                        self.reply(msg, "Authenticated. You can talk to personalities now.")
                            .await;
                    }
                    Err(e) => {
                        self.reply(msg, &format!("Authorization failed: {e}")).await;
                    }
                }
            }
            "revoke" => {
                let existed = self
                    .tokens
                    .revoke_token(user)
                    .await
                    .map_err(|e| DispatchError::Internal {
                        message: e.to_string(),
                    })?;
                if existed {
                    self.reply(msg, "Credentials revoked.").await;
                } else {
                    self.reply(msg, "You weren't authenticated.").await;
                }
            }
            _ => self.reply(msg, "Usage: auth start|code <code>|revoke").await,
        }
        Ok(())
    }

    async fn cmd_help(&self, msg: &InboundMessage, prefix: &str) -> Result<(), DispatchError> {
        if !self.dedup.mark_embed(&msg.id, "help") {
            return Err(DispatchError::Replay);
        }
        self.reply(
            msg,
            &format!(
                "Commands (prefix `{prefix}`):\n\
                 • add <name> [avatar-url] — register a personality\n\
                 • alias <alias> <name> — personal shortcut\n\
                 • remove <name> — delete (owner or moderator)\n\
                 • list / info <name>\n\
                 • activate <name> / deactivate — pin to this channel (moderators)\n\
                 • auto on|off — continue conversations without mentions\n\
                 • reset — end the current conversation\n\
                 • auth start|code <code>|revoke — connect your account"
            ),
        )
        .await;
        Ok(())
    }
}
