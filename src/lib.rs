#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::return_self_not_must_use
)]

pub mod completion;
pub mod config;
pub mod error;
pub mod gateway;
pub mod relay;
pub mod session;
pub mod transcript;
pub mod util;
pub mod widget;

pub use config::Config;
pub use error::{ChatError, Result};
