use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

// ── Top-level config ──────────────────────────────────────────────

/// Typed configuration for the whole service.
///
/// Loaded once at startup and passed explicitly into every component
/// constructor; components never read settings ambiently.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub appearance: AppearanceConfig,

    #[serde(default)]
    pub experimental: ExperimentalConfig,

    #[serde(default)]
    pub mail: MailConfig,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

impl Config {
    /// Load from a TOML file, falling back to defaults when the file is
    /// absent. A present-but-unparsable file is an error, not a silent
    /// default.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default().validated());
        }
        let raw = fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&raw).map_err(|error| ConfigError::Load(error.to_string()))?;
        Ok(config.validated())
    }

    /// Apply boundary sanitization (colors, trimmed text fields).
    pub fn validated(mut self) -> Self {
        self.appearance.sanitize();
        self
    }
}

// ── AI completion ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// OpenAI API key. Unset means AI mode answers with a config error.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Override the API base URL (testing, proxies).
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Per-request timeout for the completion call.
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    /// Knowledge-base document appended to the persona. Re-read on every
    /// request so edits take effect immediately.
    #[serde(default = "default_knowledge_base_path")]
    pub knowledge_base_path: String,
    /// Fixed system persona prefix.
    #[serde(default = "default_persona")]
    pub persona: String,
}

fn default_model() -> String {
    "gpt-3.5-turbo".into()
}

fn default_max_tokens() -> u32 {
    200
}

fn default_completion_timeout_secs() -> u64 {
    30
}

fn default_knowledge_base_path() -> String {
    "knowledge-base.txt".into()
}

fn default_persona() -> String {
    "You are this site's virtual support expert. Speak warmly, confidently, \
     and informatively about our services. Answer in short, helpful responses \
     tailored to customer concerns. Use the following knowledge base for \
     context:"
        .into()
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_completion_timeout_secs(),
            knowledge_base_path: default_knowledge_base_path(),
            persona: default_persona(),
        }
    }
}

// ── Telegram relay ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Bot token from @BotFather. Unset disables the hand-off path.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Operator chat id the notifications are posted to.
    #[serde(default)]
    pub channel_id: Option<String>,
    /// Override the Telegram API base URL (testing).
    #[serde(default)]
    pub base_url: Option<String>,
    /// How long an undelivered operator reply is held before silent expiry.
    #[serde(default = "default_pending_ttl_secs")]
    pub pending_ttl_secs: u64,
    /// Widget poll cadence while in live-agent mode.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_pending_ttl_secs() -> u64 {
    3600
}

fn default_poll_interval_secs() -> u64 {
    5
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            channel_id: None,
            base_url: None,
            pending_ttl_secs: default_pending_ttl_secs(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

// ── Widget appearance ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppearanceConfig {
    #[serde(default = "default_primary_color")]
    pub primary_color: String,
    #[serde(default = "default_secondary_color")]
    pub secondary_color: String,
    #[serde(default = "default_bot_message_color")]
    pub bot_message_color: String,
    #[serde(default = "default_user_message_color")]
    pub user_message_color: String,
    #[serde(default = "default_header_bg_color")]
    pub header_bg_color: String,
    #[serde(default = "default_header_text")]
    pub header_text: String,
    #[serde(default = "default_welcome_message")]
    pub welcome_message: String,
}

fn default_primary_color() -> String {
    "#0073aa".into()
}

fn default_secondary_color() -> String {
    "#e5e5e5".into()
}

fn default_bot_message_color() -> String {
    "#cd9d4b".into()
}

fn default_user_message_color() -> String {
    "#567c48".into()
}

fn default_header_bg_color() -> String {
    "#567c48".into()
}

fn default_header_text() -> String {
    "Live Chat".into()
}

fn default_welcome_message() -> String {
    "Hello, %userName%! How can I help you today?".into()
}

impl Default for AppearanceConfig {
    fn default() -> Self {
        Self {
            primary_color: default_primary_color(),
            secondary_color: default_secondary_color(),
            bot_message_color: default_bot_message_color(),
            user_message_color: default_user_message_color(),
            header_bg_color: default_header_bg_color(),
            header_text: default_header_text(),
            welcome_message: default_welcome_message(),
        }
    }
}

impl AppearanceConfig {
    /// Constrain colors to `#rrggbb`, falling back to the defaults, and trim
    /// text fields.
    pub fn sanitize(&mut self) {
        sanitize_color(&mut self.primary_color, default_primary_color);
        sanitize_color(&mut self.secondary_color, default_secondary_color);
        sanitize_color(&mut self.bot_message_color, default_bot_message_color);
        sanitize_color(&mut self.user_message_color, default_user_message_color);
        sanitize_color(&mut self.header_bg_color, default_header_bg_color);
        self.header_text = self.header_text.trim().to_string();
        self.welcome_message = self.welcome_message.trim().to_string();
    }
}

fn sanitize_color(value: &mut String, fallback: fn() -> String) {
    let trimmed = value.trim();
    if is_hex_color(trimmed) {
        *value = trimmed.to_ascii_lowercase();
    } else {
        *value = fallback();
    }
}

fn is_hex_color(value: &str) -> bool {
    let Some(hex) = value.strip_prefix('#') else {
        return false;
    };
    hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit())
}

// ── Experimental toggles ──────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentalConfig {
    /// Show the live-agent toggle and accept hand-off requests.
    #[serde(default)]
    pub live_agent_enabled: bool,
}

// ── Transcript mail ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailConfig {
    /// Destination address for transcripts. Unset means the end-chat flow
    /// fails closed with a config error.
    #[serde(default)]
    pub transcript_to: Option<String>,
    #[serde(default = "default_mail_from")]
    pub from: String,
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_user: Option<String>,
    #[serde(default)]
    pub smtp_pass: Option<String>,
    /// Display name for the site, used in the transcript subject/body.
    #[serde(default = "default_site_name")]
    pub site_name: String,
}

fn default_mail_from() -> String {
    "chat@localhost".into()
}

fn default_smtp_host() -> String {
    "localhost".into()
}

fn default_smtp_port() -> u16 {
    587
}

fn default_site_name() -> String {
    "tidechat".into()
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            transcript_to: None,
            from: default_mail_from(),
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            smtp_user: None,
            smtp_pass: None,
            site_name: default_site_name(),
        }
    }
}

// ── Gateway ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Shared anti-forgery token the widget sends on every call
    /// (`X-Widget-Token`). Unset disables the check.
    #[serde(default)]
    pub widget_token: Option<String>,
}

fn default_gateway_host() -> String {
    "127.0.0.1".into()
}

fn default_gateway_port() -> u16 {
    3000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            widget_token: None,
        }
    }
}

// ── Storage ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Sqlite database holding the chat log, the pending-response queue and
    /// the relay cursor.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "tidechat.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
