//! Durable chat log and the end-of-chat transcript email.

mod mailer;
mod store;

pub use mailer::TranscriptMailer;
pub use store::{LogEntry, SqliteTranscriptStore, TranscriptStore};

/// Default page size for the log listing.
pub const DEFAULT_PAGE_SIZE: u32 = 20;
