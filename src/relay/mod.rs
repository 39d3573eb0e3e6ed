//! Live-agent relay over Telegram.
//!
//! Outbound: hand-off notifications posted to a fixed operator chat.
//! Inbound: operator replies arriving either through the webhook push path
//! or through cursor-based polling, buffered in a shared pending queue until
//! the owning session's widget poll drains them.

mod pending;
mod telegram;

pub use pending::{PendingResponse, PendingStore, SqlitePendingStore};
pub use telegram::{InboundRelayMessage, RelayReceipt, TelegramRelay, extract_session_token};
