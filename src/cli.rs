use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// `tidechat` - Support-chat backend with AI completions and live-agent
/// hand-off over Telegram.
#[derive(Parser, Debug)]
#[command(name = "tidechat")]
#[command(version = "0.1.0")]
#[command(about = "Support-chat backend: AI completions with live-agent hand-off.", long_about = None)]
pub struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "tidechat.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP gateway (widget API + relay webhook)
    Serve {
        /// Port to listen on (overrides config; 0 for a random port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,
    },

    /// Poll the relay for operator replies instead of receiving the webhook
    Poll,

    /// Verify the configured OpenAI API key
    Check,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_accepts_port_override() {
        let cli = Cli::parse_from(["tidechat", "serve", "--port", "0"]);
        match cli.command {
            Commands::Serve { port, host } => {
                assert_eq!(port, Some(0));
                assert!(host.is_none());
            }
            other => panic!("expected serve, got {other:?}"),
        }
    }

    #[test]
    fn config_path_has_a_default() {
        let cli = Cli::parse_from(["tidechat", "check"]);
        assert_eq!(cli.config, PathBuf::from("tidechat.toml"));
    }
}
