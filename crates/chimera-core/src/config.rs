use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

// Platform constants — fixed by the chat platform, not tunable.
pub const MAX_MESSAGE_CHARS: usize = 2_000; // hard cap per outbound message
pub const PLATFORM_CALL_TIMEOUT_MS: u64 = 10_000; // per-HTTP-call on platform ops
pub const WEBHOOK_SEND_TIMEOUT_MS: u64 = 10_000;
pub const WEBHOOK_SEND_RETRIES: u32 = 3;
pub const WEBHOOK_BACKOFF_BASE_MS: u64 = 100; // 100ms × 2ⁿ

// Dedup scope TTLs.
pub const MESSAGE_ID_TTL_SECS: u64 = 30;
pub const RECENT_COMMAND_TTL_SECS: u64 = 3;
pub const OUTBOUND_EMBED_TTL_SECS: u64 = 5;
pub const COMPLETED_ADD_TTL_SECS: u64 = 30 * 60;

// Coalescer windows.
pub const POST_CACHE_SECS: u64 = 10;
pub const COOLDOWN_SECS: u64 = 30;
pub const FINGERPRINT_SLOT_SECS: u64 = 10;

// Reply bindings outlive the auto-respond window so late replies still route.
pub const REPLY_BINDING_TTL_SECS: u64 = 30 * 60;

/// Top-level config (chimera.toml + CHIMERA_* env overrides, then the
/// documented bare env variables applied on top).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChimeraConfig {
    pub platform: PlatformConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// The application/bot id this process runs under. Own-webhook detection
    /// compares against this id.
    pub self_bot_id: String,
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Name used when the sender creates a channel webhook.
    #[serde(default = "default_webhook_name")]
    pub webhook_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            model: default_llm_model(),
        }
    }
}

/// Proxy-system recognition is data, not code: every signal list is
/// configurable and extendable without a rebuild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Application ids of known third-party proxy systems.
    #[serde(default)]
    pub known_proxy_app_ids: Vec<String>,
    /// Username tags appended by proxy systems, e.g. "[PK]".
    #[serde(default = "default_proxy_tags")]
    pub proxy_username_tags: Vec<String>,
    /// Embed footer substrings that identify a proxy system.
    #[serde(default = "default_proxy_footers")]
    pub proxy_footer_signatures: Vec<String>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            known_proxy_app_ids: Vec::new(),
            proxy_username_tags: default_proxy_tags(),
            proxy_footer_signatures: default_proxy_footers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_ref_depth")]
    pub max_ref_depth: usize,
    #[serde(default = "default_max_media")]
    pub max_media_per_request: usize,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    #[serde(default = "default_conv_ttl_ms")]
    pub conv_ttl_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ref_depth: default_max_ref_depth(),
            max_media_per_request: default_max_media(),
            request_timeout_ms: default_request_timeout_ms(),
            dedup_window_ms: default_dedup_window_ms(),
            conv_ttl_ms: default_conv_ttl_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_command_prefix() -> String {
    "!ch".to_string()
}
fn default_webhook_name() -> String {
    "chimera".to_string()
}
fn default_llm_endpoint() -> String {
    "http://localhost:8080/v1/chat/completions".to_string()
}
fn default_llm_model() -> String {
    "default".to_string()
}
fn default_proxy_tags() -> Vec<String> {
    vec![
        "[PK]".to_string(),
        "[TP]".to_string(),
        "(PluralKit)".to_string(),
    ]
}
fn default_proxy_footers() -> Vec<String> {
    vec!["PluralKit".to_string(), "Tupperbox".to_string()]
}
fn default_max_ref_depth() -> usize {
    10
}
fn default_max_media() -> usize {
    10
}
fn default_request_timeout_ms() -> u64 {
    60_000
}
fn default_dedup_window_ms() -> u64 {
    10_000
}
fn default_conv_ttl_ms() -> u64 {
    15 * 60 * 1000
}
fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chimera", home)
}

impl ChimeraConfig {
    /// Load config from a TOML file with CHIMERA_* env var overrides, then
    /// apply the documented bare env variables (SELF_BOT_ID, LLM_ENDPOINT, …).
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.chimera/chimera.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: ChimeraConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHIMERA_").split("__"))
            .extract()
            .map_err(|e| crate::error::ChimeraError::Config(e.to_string()))?;

        config.apply_env_overrides();
        Ok(config)
    }

    /// The exhaustive set of bare env variables recognised by the core.
    /// Applied after the figment merge so they always win.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("SELF_BOT_ID") {
            self.platform.self_bot_id = v;
        }
        if let Ok(v) = std::env::var("COMMAND_PREFIX") {
            self.platform.command_prefix = v;
        }
        if let Ok(v) = std::env::var("LLM_ENDPOINT") {
            self.llm.endpoint = v;
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Ok(v) = std::env::var("DATA_DIR") {
            self.storage.data_dir = v;
        }
        if let Ok(v) = std::env::var("KNOWN_PROXY_APP_IDS") {
            self.identity.known_proxy_app_ids = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = parse_env("MAX_REF_DEPTH") {
            self.limits.max_ref_depth = v;
        }
        if let Some(v) = parse_env("MAX_MEDIA_PER_REQUEST") {
            self.limits.max_media_per_request = v;
        }
        if let Some(v) = parse_env("REQUEST_TIMEOUT_MS") {
            self.limits.request_timeout_ms = v;
        }
        if let Some(v) = parse_env("DEDUP_WINDOW_MS") {
            self.limits.dedup_window_ms = v;
        }
        if let Some(v) = parse_env("CONV_TTL_MS") {
            self.limits.conv_ttl_ms = v;
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "unparseable env override ignored");
                None
            }
        },
        Err(_) => None,
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chimera/chimera.toml", home)
}
