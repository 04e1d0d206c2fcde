// End-to-end dispatch scenarios against the in-memory platform and a
// scripted LLM backend: own-webhook suppression, reply binding, proxy auth
// isolation, duplicate-delivery single-flight, cross-user credential
// isolation, and long-output splitting.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use chimera_agent::{LlmBackend, LlmError, Role, WirePayload};
use chimera_core::config::{
    ChimeraConfig, IdentityConfig, LimitsConfig, LlmConfig, PlatformConfig, StorageConfig,
};
use chimera_core::types::{ChannelId, MessageId, UserId};
use chimera_dispatch::Dispatcher;
use chimera_identity::{AuthRecord, OAuthError, OAuthService, TokenGrant, TokenValidation};
use chimera_platform::memory::{test_message, InMemoryPlatform};
use chimera_platform::platform::ChatPlatform;
use chimera_registry::{Personality, PersonalityRegistry};

struct ScriptedLlm {
    reply: Mutex<String>,
    calls: Mutex<Vec<(String, WirePayload)>>,
}

impl ScriptedLlm {
    fn new(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: Mutex::new(reply.to_string()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn set_reply(&self, reply: &str) {
        *self.reply.lock().unwrap() = reply.to_string();
    }

    fn calls(&self) -> Vec<(String, WirePayload)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn complete(&self, token: &str, payload: &WirePayload) -> Result<String, LlmError> {
        self.calls
            .lock()
            .unwrap()
            .push((token.to_string(), payload.clone()));
        Ok(self.reply.lock().unwrap().clone())
    }
}

struct FakeOAuth;

#[async_trait]
impl OAuthService for FakeOAuth {
    fn authorization_url(&self, state: &str) -> String {
        format!("https://auth.example/authorize?state={state}")
    }

    async fn exchange_code(&self, code: &str, _user: &UserId) -> Result<TokenGrant, OAuthError> {
        Ok(TokenGrant {
            token: format!("granted-{code}"),
            refresh_token: None,
            expires_at: None,
        })
    }

    async fn validate_token(&self, _token: &str) -> Result<TokenValidation, OAuthError> {
        Ok(TokenValidation {
            valid: true,
            user_id: None,
        })
    }

    async fn refresh_token(&self, _refresh: &str) -> Result<TokenGrant, OAuthError> {
        Err(OAuthError::Rejected("no refresh in tests".to_string()))
    }

    async fn revoke_token(&self, _token: &str) -> Result<(), OAuthError> {
        Ok(())
    }
}

struct App {
    platform: Arc<InMemoryPlatform>,
    llm: Arc<ScriptedLlm>,
    dispatcher: Dispatcher,
}

fn config() -> ChimeraConfig {
    ChimeraConfig {
        platform: PlatformConfig {
            self_bot_id: "self".to_string(),
            command_prefix: "!ch".to_string(),
            webhook_name: "chimera".to_string(),
        },
        llm: LlmConfig::default(),
        identity: IdentityConfig {
            known_proxy_app_ids: vec!["PROXYAPP".to_string()],
            ..Default::default()
        },
        limits: LimitsConfig::default(),
        storage: StorageConfig::default(),
    }
}

fn app() -> App {
    let platform = Arc::new(InMemoryPlatform::new());
    let llm = ScriptedLlm::new("a reply");
    let dispatcher = Dispatcher::new(
        config(),
        Arc::clone(&platform) as Arc<dyn ChatPlatform>,
        Arc::new(FakeOAuth),
        Arc::clone(&llm) as Arc<dyn LlmBackend>,
        Arc::new(PersonalityRegistry::new()),
    );
    App {
        platform,
        llm,
        dispatcher,
    }
}

fn add_personality(app: &App, name: &str, owner: &str) -> Personality {
    let p = Personality::new(name, UserId::from(owner));
    app.dispatcher.registry().add(p.clone()).unwrap();
    p
}

async fn authenticate(app: &App, user: &str, token: &str) {
    app.dispatcher
        .tokens()
        .set_token(
            &UserId::from(user),
            AuthRecord {
                token: token.to_string(),
                refresh_token: None,
                expires_at: None,
            },
        )
        .await
        .unwrap();
}

// S1 — a message from our own webhook produces no outbound traffic.
#[tokio::test]
async fn own_webhook_echo_is_suppressed() {
    let app = app();
    add_personality(&app, "Lilith", "U1");

    let mut echo = test_message("A1", "C", "W", "hi");
    echo.webhook_id = Some("W".to_string());
    echo.author_display_name = "Lilith".to_string();

    app.dispatcher.handle_message(echo).await;

    assert!(app.llm.calls().is_empty());
    assert_eq!(app.platform.outbound_count(), 0);
}

// S2 — a reply to a bound bot message resolves the personality without a
// mention, and the quoted turn comes back as a first-person assistant turn.
#[tokio::test]
async fn reply_binds_to_personality() {
    let app = app();
    let p = add_personality(&app, "Lilith", "U1");
    let channel = ChannelId::from("C");
    app.platform.mark_nsfw(&channel);
    authenticate(&app, "U", "T").await;

    // The earlier bot emission, retrievable by the reference resolver.
    let mut bot_msg = test_message("B2", "C", "W1", "the stars burn tonight");
    bot_msg.webhook_id = Some("W1".to_string());
    bot_msg.author_display_name = "Lilith".to_string();
    app.platform.put_message(bot_msg);
    app.dispatcher.conversation().record_bot_message(
        MessageId::from("B2"),
        channel.clone(),
        UserId::from("U"),
        p.id.clone(),
    );

    let mut reply = test_message("M3", "C", "U", "and then?");
    reply.reference = Some(MessageId::from("B2"));
    app.dispatcher.handle_message(reply).await;

    let calls = app.llm.calls();
    assert_eq!(calls.len(), 1);
    let payload = &calls[0].1;
    let quoted = payload
        .messages
        .iter()
        .find(|m| m.content.contains("the stars burn tonight"))
        .expect("quoted turn present");
    assert_eq!(quoted.role, Role::Assistant);
    assert!(quoted.content.starts_with("As Lilith, I said:"));

    let sends = app.platform.webhook_sends();
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].username, "Lilith");
}

// S3 — proxy systems cannot run auth commands and inherit no credentials.
#[tokio::test]
async fn proxy_system_cannot_authenticate() {
    let app = app();

    let mut msg = test_message("P1", "C", "PKWH", "!ch auth start");
    msg.webhook_id = Some("PKWH".to_string());
    msg.application_id = Some("PROXYAPP".to_string());

    app.dispatcher.handle_message(msg).await;

    let channel_msgs = app.platform.channel_sends();
    assert_eq!(channel_msgs.len(), 1);
    assert!(channel_msgs[0].content.contains("proxy"));
    assert!(app.platform.dm_sends().is_empty());
    // No credentials appeared for anyone involved.
    assert_eq!(
        app.dispatcher
            .tokens()
            .get_token(&UserId::from("PKWH"))
            .await
            .unwrap(),
        None
    );
}

// S4 — duplicate delivery under distinct message ids: one LLM call, one
// outbound reply.
#[tokio::test]
async fn duplicate_delivery_is_single_flighted() {
    let app = app();
    add_personality(&app, "Lilith", "U1");
    let channel = ChannelId::from("C");
    app.platform.mark_nsfw(&channel);
    authenticate(&app, "U", "T").await;

    let first = test_message("M4a", "C", "U", "@lilith same question");
    let second = test_message("M4b", "C", "U", "@lilith same question");

    app.dispatcher.handle_message(first).await;
    app.dispatcher.handle_message(second).await;

    assert_eq!(app.llm.calls().len(), 1);
    assert_eq!(app.platform.webhook_sends().len(), 1);
}

// S5 — a reply from user B to a turn produced for user A uses B's token.
#[tokio::test]
async fn cross_user_reply_does_not_borrow_credentials() {
    let app = app();
    let p = add_personality(&app, "Lilith", "U1");
    let channel = ChannelId::from("C");
    app.platform.mark_nsfw(&channel);
    authenticate(&app, "U1", "T1").await;
    authenticate(&app, "U2", "T2").await;

    let mut bot_msg = test_message("B5", "C", "W1", "as you wish");
    bot_msg.webhook_id = Some("W1".to_string());
    bot_msg.author_display_name = "Lilith".to_string();
    app.platform.put_message(bot_msg);
    app.dispatcher.conversation().record_bot_message(
        MessageId::from("B5"),
        channel.clone(),
        UserId::from("U1"),
        p.id.clone(),
    );

    let mut reply = test_message("M5", "C", "U2", "go on");
    reply.reference = Some(MessageId::from("B5"));
    app.dispatcher.handle_message(reply).await;

    let calls = app.llm.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "T2");
}

// S6 — a long reply splits into fence-balanced chunks, all bound.
#[tokio::test]
async fn long_output_splits_and_binds_every_chunk() {
    let app = app();
    add_personality(&app, "Lilith", "U1");
    let channel = ChannelId::from("C");
    app.platform.mark_nsfw(&channel);
    authenticate(&app, "U", "T").await;

    let mut long_reply = String::from("Here is the script.\n\n```python\n");
    for i in 0..100 {
        long_reply.push_str(&format!("print('line {i:03} of the example')\n\n"));
    }
    long_reply.push_str("```\nDone.");
    assert!(long_reply.len() > 2_000 && long_reply.len() < 4_000);
    app.llm.set_reply(&long_reply);

    let msg = test_message("M6", "C", "U", "@lilith show me");
    app.dispatcher.handle_message(msg).await;

    let sends = app.platform.webhook_sends();
    assert_eq!(sends.len(), 2);
    for s in &sends {
        assert!(s.content.len() <= 2_000);
        assert_eq!(s.content.matches("```").count() % 2, 0, "unbalanced fence");
        // Every chunk is bound for reply routing.
        assert!(app
            .dispatcher
            .conversation()
            .binding(&s.message_id)
            .is_some());
    }
}

// Unauthenticated users get DM guidance; a closed DM falls back to the channel.
#[tokio::test]
async fn auth_guidance_prefers_dm_with_channel_fallback() {
    let app = app();
    add_personality(&app, "Lilith", "U1");
    let channel = ChannelId::from("C");
    app.platform.mark_nsfw(&channel);

    let msg = test_message("M7", "C", "U", "@lilith hello");
    app.dispatcher.handle_message(msg).await;

    let dms = app.platform.dm_sends();
    assert_eq!(dms.len(), 1);
    assert_eq!(dms[0].0, UserId::from("U"));
    assert!(dms[0].1.contains("auth start"));
    assert!(app.platform.channel_sends().is_empty());

    // Same story with DMs closed: the guidance lands in the channel.
    app.platform.block_dms(&UserId::from("U"));
    let msg = test_message("M8", "C", "U", "@lilith hello again");
    app.dispatcher.handle_message(msg).await;
    assert_eq!(app.platform.channel_sends().len(), 1);
}

// The NSFW gate blocks real users outside age-restricted channels.
#[tokio::test]
async fn age_gate_blocks_unverified_users_in_sfw_channels() {
    let app = app();
    add_personality(&app, "Lilith", "U1");
    authenticate(&app, "U", "T").await;

    let msg = test_message("M9", "C-sfw", "U", "@lilith hi");
    app.dispatcher.handle_message(msg).await;

    assert!(app.llm.calls().is_empty());
    let sends = app.platform.channel_sends();
    assert_eq!(sends.len(), 1);
    assert!(sends[0].content.contains("age-restricted"));

    // Verified users pass in the same channel.
    app.dispatcher
        .conversation()
        .set_age_verified(&UserId::from("U"), true);
    let msg = test_message("M10", "C-sfw", "U", "@lilith hi once more");
    app.dispatcher.handle_message(msg).await;
    assert_eq!(app.llm.calls().len(), 1);
}

// Channel activation answers unaddressed messages; a removed personality
// deactivates the route instead of erroring.
#[tokio::test]
async fn activation_routes_unaddressed_messages() {
    let app = app();
    let p = add_personality(&app, "Lilith", "U1");
    let channel = ChannelId::from("C");
    let moderator = UserId::from("mod");
    app.platform.mark_nsfw(&channel);
    app.platform.grant_manage_messages(&channel, &moderator);
    authenticate(&app, "U", "T").await;

    let activate = test_message("A1", "C", "mod", "!ch activate lilith");
    app.dispatcher.handle_message(activate).await;

    let msg = test_message("M11", "C", "U", "anyone here?");
    app.dispatcher.handle_message(msg).await;
    assert_eq!(app.llm.calls().len(), 1);
    assert_eq!(app.platform.webhook_sends().len(), 1);

    // Removing the personality silently disables the activation route.
    app.dispatcher
        .registry()
        .remove(&p.id, &UserId::from("U1"), false)
        .unwrap();
    let msg = test_message("M12", "C", "U", "still here?");
    app.dispatcher.handle_message(msg).await;
    assert_eq!(app.llm.calls().len(), 1);
}

// An unknown mention is answered with lookup guidance.
#[tokio::test]
async fn unknown_mention_reports_not_found() {
    let app = app();
    let channel = ChannelId::from("C");
    app.platform.mark_nsfw(&channel);

    let msg = test_message("M13", "C", "U", "@nobody hello");
    app.dispatcher.handle_message(msg).await;

    let sends = app.platform.channel_sends();
    assert_eq!(sends.len(), 1);
    assert!(sends[0].content.contains("nobody"));
    assert!(sends[0].content.contains("list"));
}

// Auto-respond continues a conversation without mentions, strictly opt-in.
#[tokio::test]
async fn auto_respond_continues_after_opt_in() {
    let app = app();
    add_personality(&app, "Lilith", "U1");
    let channel = ChannelId::from("C");
    app.platform.mark_nsfw(&channel);
    authenticate(&app, "U", "T").await;

    let opt_in = test_message("C1", "C", "U", "!ch auto on");
    app.dispatcher.handle_message(opt_in).await;

    let first = test_message("M14", "C", "U", "@lilith hello");
    app.dispatcher.handle_message(first).await;
    assert_eq!(app.llm.calls().len(), 1);

    // No mention this time; the warm dialog routes it.
    let followup = test_message("M15", "C", "U", "tell me more");
    app.dispatcher.handle_message(followup).await;
    assert_eq!(app.llm.calls().len(), 2);
}

// The auth code flow lands credentials in the token store.
#[tokio::test]
async fn auth_code_flow_stores_credentials() {
    let app = app();
    let user = UserId::from("U");

    let start = test_message("C2", "C", "U", "!ch auth start");
    app.dispatcher.handle_message(start).await;
    assert_eq!(app.platform.dm_sends().len(), 1);

    let code = test_message("C3", "C", "U", "!ch auth code abc123");
    app.dispatcher.handle_message(code).await;

    assert_eq!(
        app.dispatcher.tokens().get_token(&user).await.unwrap(),
        Some("granted-abc123".to_string())
    );
}
