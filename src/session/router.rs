use super::{Message, Sender, SessionMode};
use crate::completion::CompletionClient;
use crate::error::{ChatError, ValidationError};
use crate::relay::{PendingStore, TelegramRelay, extract_session_token};
use crate::transcript::TranscriptStore;
use crate::util::truncate_with_ellipsis;
use serde_json::Value;
use std::sync::Arc;

/// Canned acknowledgment for a queued hand-off message.
const HANDOFF_ACK: &str = "Live support is connecting. Your position in queue: 1\n\
                           A representative will be with you shortly.";
/// Prefix tagging log entries that record a hand-off, not a real answer.
const HANDOFF_LOG_TAG: &str = "[LIVE_AGENT_REQUEST] ";

const AGENT_DISPLAY_NAME: &str = "Support Agent";

/// One inbound widget call. The coordinator is stateless across requests:
/// everything needed to route the message travels with it.
#[derive(Debug, Clone)]
pub struct InboundChat {
    pub session_id: String,
    pub user_name: String,
    pub message: String,
    pub mode: SessionMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterReply {
    /// A completed AI answer, returned synchronously.
    Answer(String),
    /// Hand-off acknowledgment; the real reply arrives later via polling.
    Queued(String),
}

impl RouterReply {
    pub fn text(&self) -> &str {
        match self {
            Self::Answer(text) | Self::Queued(text) => text,
        }
    }
}

/// Routes each inbound message to the completion client or the relay,
/// persists the exchange, and reconciles asynchronous operator replies back
/// to their sessions.
pub struct SessionRouter {
    completion: CompletionClient,
    relay: TelegramRelay,
    pending: Arc<dyn PendingStore>,
    log: Arc<dyn TranscriptStore>,
}

impl SessionRouter {
    pub fn new(
        completion: CompletionClient,
        relay: TelegramRelay,
        pending: Arc<dyn PendingStore>,
        log: Arc<dyn TranscriptStore>,
    ) -> Self {
        Self {
            completion,
            relay,
            pending,
            log,
        }
    }

    /// Dispatch one message according to the session's mode.
    pub async fn handle_message(&self, chat: InboundChat) -> Result<RouterReply, ChatError> {
        let message = chat.message.trim();
        if message.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }

        match chat.mode {
            SessionMode::Ai => {
                let reply = self.completion.get_reply(message).await?;
                self.append_log(&chat.user_name, message, &reply);
                Ok(RouterReply::Answer(reply))
            }
            SessionMode::LiveAgent => {
                let receipt = self
                    .relay
                    .notify(&chat.session_id, &chat.user_name, message)
                    .await?;
                if let Err(error) = self.pending.record_notify(&chat.session_id, receipt.message_id)
                {
                    tracing::warn!("failed to record notify for correlation: {error}");
                }
                self.append_log(
                    &chat.user_name,
                    &format!("{HANDOFF_LOG_TAG}{message}"),
                    HANDOFF_ACK,
                );
                Ok(RouterReply::Queued(HANDOFF_ACK.to_string()))
            }
        }
    }

    /// Side effect of the `AI -> LIVE_AGENT` transition. When the relay
    /// notification fails the transition is rejected and the caller keeps
    /// the session in AI mode.
    pub async fn begin_handoff(&self, session_id: &str, user_name: &str) -> Result<(), ChatError> {
        let receipt = self
            .relay
            .notify(session_id, user_name, "User requested a live agent.")
            .await?;
        if let Err(error) = self.pending.record_notify(session_id, receipt.message_id) {
            tracing::warn!("failed to record notify for correlation: {error}");
        }
        tracing::info!(session_id, "hand-off started");
        Ok(())
    }

    /// The `LIVE_AGENT -> AI` transition has no external side effect.
    pub fn end_handoff(&self) -> &'static str {
        "Switching back to AI assistant mode."
    }

    /// Drain queued operator replies for a session.
    ///
    /// Consumption is an atomic read-and-delete in the store, so repeated or
    /// concurrent polls never deliver an entry twice.
    pub fn poll_pending(&self, session_id: &str) -> Result<Vec<Message>, ChatError> {
        if session_id.trim().is_empty() {
            return Err(ValidationError::MissingSessionId.into());
        }
        let responses = self.pending.take_for_session(session_id)?;
        Ok(responses
            .into_iter()
            .map(|response| Message {
                sender: Sender::Agent,
                name: AGENT_DISPLAY_NAME.to_string(),
                text: response.text,
                timestamp: response.created_at,
            })
            .collect())
    }

    /// Ingest one webhook update. Returns whether a pending response was
    /// enqueued (false for duplicates, non-text updates and replies that
    /// could not be correlated to any session).
    pub fn ingest_relay_update(&self, update: &Value) -> Result<bool, ChatError> {
        let Ok(inbound) = TelegramRelay::parse_update(update) else {
            // Status updates and media carry no text; acknowledged upstream,
            // nothing to queue.
            return Ok(false);
        };
        self.correlate_and_enqueue(inbound.message_id, &inbound.text)
    }

    /// Polling-mode alternative to the webhook: fetch updates past the
    /// persisted cursor and queue them. The cursor is stored before the
    /// batch is processed, accepting at-most-once on crash over duplication.
    pub async fn poll_relay_once(&self) -> Result<usize, ChatError> {
        let cursor = self.pending.load_cursor()?;
        let (messages, next_cursor) = self.relay.poll_updates(cursor).await?;
        if next_cursor > cursor {
            self.pending.store_cursor(next_cursor)?;
        }

        let mut enqueued = 0;
        for message in &messages {
            if self.correlate_and_enqueue(message.message_id, &message.text)? {
                enqueued += 1;
            }
        }
        Ok(enqueued)
    }

    /// Best-effort correlation (see DESIGN.md): a `session:<id>` token echoed
    /// anywhere in the reply wins; otherwise the reply goes to the most
    /// recently notified session within the pending TTL.
    fn correlate_and_enqueue(&self, relay_message_id: i64, text: &str) -> Result<bool, ChatError> {
        let session_id = match extract_session_token(text) {
            Some(id) => Some(id),
            None => self.pending.last_notified_session()?,
        };
        let Some(session_id) = session_id else {
            tracing::warn!(
                "dropping uncorrelatable operator reply: {}",
                truncate_with_ellipsis(text, 50)
            );
            return Ok(false);
        };
        let inserted = self.pending.enqueue(relay_message_id, &session_id, text)?;
        if inserted {
            tracing::info!(session_id, relay_message_id, "operator reply queued");
        }
        Ok(inserted)
    }

    /// Log append is best-effort: the response is already determined, so a
    /// store failure degrades observability, not functionality.
    fn append_log(&self, user_name: &str, message: &str, response: &str) {
        if let Err(error) = self.log.append(user_name, message, response) {
            tracing::error!("failed to append chat log: {error}");
        }
    }

    pub fn relay_is_configured(&self) -> bool {
        self.relay.is_configured()
    }

    pub fn handoff_ack() -> &'static str {
        HANDOFF_ACK
    }
}
