//! Per-session routing between the AI completion path and the live-agent
//! hand-off path.

mod router;

pub use router::{InboundChat, RouterReply, SessionRouter};

use serde::{Deserialize, Serialize};

/// Which path serves a session's messages. Exactly one holds at a time;
/// switching never alters history, only the routing of subsequent messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    #[default]
    Ai,
    LiveAgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
    Agent,
}

/// A single chat message as exchanged with the widget. `text` is untrusted
/// and must be neutralized before HTML rendering or relay formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub name: String,
    pub text: String,
    /// ISO-8601 as supplied by the client; display-only, never used for
    /// server-side ordering.
    pub timestamp: String,
}
