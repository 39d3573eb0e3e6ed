//! OpenAI chat-completions client.
//!
//! One synchronous request per chat turn: a fixed support persona plus the
//! knowledge-base document as the system message, the user message as the
//! only conversation turn. No multi-turn memory is kept server-side.

mod openai;

pub use openai::CompletionClient;
