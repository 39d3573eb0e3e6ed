use thiserror::Error;

// ─── Top-level error hierarchy ───────────────────────────────────────────────

/// Structured error hierarchy for `tidechat`.
///
/// Each subsystem defines its own error variant. The gateway matches on these
/// at the boundary to build the success/failure envelope; nothing below the
/// boundary is allowed to escape as an unhandled fault.
#[derive(Debug, Error)]
pub enum ChatError {
    // ── Config ───────────────────────────────────────────────────────────
    #[error("config: {0}")]
    Config(#[from] ConfigError),

    // ── AI completion ───────────────────────────────────────────────────
    #[error("completion: {0}")]
    Completion(#[from] CompletionError),

    // ── Telegram relay ──────────────────────────────────────────────────
    #[error("relay: {0}")]
    Relay(#[from] RelayError),

    // ── Chat log / pending store ────────────────────────────────────────
    #[error("store: {0}")]
    Store(#[from] StoreError),

    // ── Transcript mail ─────────────────────────────────────────────────
    #[error("mail: {0}")]
    Mail(#[from] MailError),

    // ── Input validation ────────────────────────────────────────────────
    #[error("validation: {0}")]
    Validation(#[from] ValidationError),

    // ── Generic fallthrough (wraps anyhow for interop) ──────────────────
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ChatError {
    /// Message safe to echo to the end user.
    ///
    /// Config and validation problems are actionable and stated plainly;
    /// transport and upstream causes stay in server-side diagnostics and the
    /// user gets a generic retry message.
    pub fn user_message(&self) -> String {
        match self {
            Self::Completion(CompletionError::MissingApiKey) => {
                "OpenAI API key is not configured.".into()
            }
            Self::Relay(RelayError::NotConfigured) => {
                "Live agent support is not available right now.".into()
            }
            Self::Validation(err) => err.to_string(),
            Self::Mail(MailError::InvalidRecipient(_)) => {
                "Transcript destination address is not valid.".into()
            }
            Self::Mail(_) => "Failed to send the transcript email.".into(),
            Self::Completion(CompletionError::Malformed(_)) => "Invalid response from AI.".into(),
            _ => "Something went wrong. Please try again.".into(),
        }
    }
}

// ─── Config errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load config: {0}")]
    Load(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

// ─── Completion client errors ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("API key not set")]
    MissingApiKey,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

// ─── Relay errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("bot token or channel id not configured")]
    NotConfigured,

    #[error("request failed: {0}")]
    Transport(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

// ─── Store errors ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("lock poisoned: {0}")]
    Lock(String),
}

// ─── Mail errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("failed to build message: {0}")]
    Build(String),

    #[error("smtp transport: {0}")]
    Transport(String),
}

// ─── Validation errors ──────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No message received.")]
    EmptyMessage,

    #[error("No conversation data received.")]
    EmptyConversation,

    #[error("Missing session id.")]
    MissingSessionId,
}

// ─── Convenience re-exports ─────────────────────────────────────────────────

/// Shorthand result type for the crate.
pub type Result<T> = std::result::Result<T, ChatError>;
