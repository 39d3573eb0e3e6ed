//! Client-side contract of the chat widget: typing simulation, local UI
//! state, and the live-agent poll loop.

use crate::config::AppearanceConfig;
use crate::session::SessionMode;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const TYPING_DELAY_FLOOR_MS: u64 = 500;
const TYPING_DELAY_CAP_MS: u64 = 3_000;
/// Simulated typing speed, 25ms per character.
const TYPING_DELAY_PER_CHAR_MS: u64 = 25;

const CONNECT_ANNOUNCEMENT: &str = "Requesting a live support agent...";
const SWITCH_BACK_ANNOUNCEMENT: &str = "Switching back to AI assistant mode.";

/// How long the widget pretends to type before revealing a reply.
///
/// Proportional to reply length with a floor so short replies still feel
/// typed, and a cap so long replies do not stall the conversation.
pub fn typing_delay(reply_len: usize) -> Duration {
    let scaled = (reply_len as u64).saturating_mul(TYPING_DELAY_PER_CHAR_MS);
    Duration::from_millis(scaled.clamp(TYPING_DELAY_FLOOR_MS, TYPING_DELAY_CAP_MS))
}

/// Local widget state. Single-threaded by contract: one widget instance per
/// page, events handled in order.
pub struct WidgetState {
    appearance: AppearanceConfig,
    session_id: String,
    minimized: bool,
    user_name: String,
    mode: SessionMode,
}

impl WidgetState {
    pub fn new(appearance: AppearanceConfig) -> Self {
        Self {
            appearance,
            session_id: uuid::Uuid::new_v4().to_string(),
            minimized: true,
            user_name: "Guest".into(),
            mode: SessionMode::default(),
        }
    }

    /// Generated once per widget instance; sent with every gateway call so
    /// the coordinator can route operator replies back.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_minimized(&self) -> bool {
        self.minimized
    }

    pub fn toggle_minimized(&mut self) -> bool {
        self.minimized = !self.minimized;
        self.minimized
    }

    /// Blank names fall back to the guest default.
    pub fn set_user_name(&mut self, name: &str) {
        let trimmed = name.trim();
        if !trimmed.is_empty() {
            self.user_name = trimmed.to_string();
        }
    }

    pub fn user_name(&self) -> &str {
        &self.user_name
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// Greeting with the `%userName%` placeholder substituted.
    pub fn welcome_message(&self) -> String {
        self.appearance
            .welcome_message
            .replace("%userName%", &self.user_name)
    }

    /// Switch modes, returning the announcement to render. Switching to the
    /// current mode is a no-op with nothing to announce.
    pub fn set_mode(&mut self, mode: SessionMode) -> Option<&'static str> {
        if mode == self.mode {
            return None;
        }
        self.mode = mode;
        Some(match mode {
            SessionMode::LiveAgent => CONNECT_ANNOUNCEMENT,
            SessionMode::Ai => SWITCH_BACK_ANNOUNCEMENT,
        })
    }
}

/// Background poll task driving `GET /chat/poll` while live-agent mode is
/// active.
pub struct PollLoop {
    handle: JoinHandle<()>,
}

impl PollLoop {
    /// Spawn the loop; `poll` runs once per interval until `stop` or drop.
    pub fn start<F, Fut>(interval: Duration, mut poll: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // A slow poll callback must not cause a burst of catch-up ticks.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // interval fires immediately on the first tick; swallow it so
            // the first poll happens one interval after mode switch.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                poll().await;
            }
        });
        Self { handle }
    }

    /// Abort the task immediately. Idempotent.
    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for PollLoop {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
