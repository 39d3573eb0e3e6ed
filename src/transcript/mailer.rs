use crate::config::MailConfig;
use crate::error::MailError;
use crate::session::{Message, Sender};
use crate::util::escape_html;
use chrono::{DateTime, Local};
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message as Email, SmtpTransport, Transport};
use std::time::Duration;

const SMTP_TIMEOUT_SECS: u64 = 15;

/// Builds and sends the end-of-chat transcript email.
///
/// The transcript covers the in-memory conversation the widget submits, not
/// the persisted log. Fails closed: a missing or invalid destination address
/// is reported, never silently dropped.
pub struct TranscriptMailer {
    to: Option<String>,
    from: String,
    smtp_host: String,
    smtp_port: u16,
    credentials: Option<Credentials>,
    site_name: String,
}

impl TranscriptMailer {
    pub fn new(config: &MailConfig) -> Self {
        let credentials = match (&config.smtp_user, &config.smtp_pass) {
            (Some(user), Some(pass)) => Some(Credentials::new(user.clone(), pass.clone())),
            _ => None,
        };
        Self {
            to: config.transcript_to.clone(),
            from: config.from.clone(),
            smtp_host: config.smtp_host.clone(),
            smtp_port: config.smtp_port,
            credentials,
            site_name: config.site_name.clone(),
        }
    }

    /// Send the transcript. Blocking (SMTP); callers in async context wrap
    /// this in `spawn_blocking`.
    pub fn send(&self, user_name: &str, conversation: &[Message]) -> Result<(), MailError> {
        let recipient = self.recipient()?;
        let sender: Mailbox = self
            .from
            .parse()
            .map_err(|_| MailError::Build(format!("invalid from address: {}", self.from)))?;

        let subject = format!("Chat Transcript with {user_name} - {}", self.site_name);
        let body = self.build_html(user_name, conversation);

        let email = Email::builder()
            .from(sender)
            .to(recipient)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body)
            .map_err(|error| MailError::Build(error.to_string()))?;

        let mut builder = SmtpTransport::relay(&self.smtp_host)
            .map_err(|error| MailError::Transport(error.to_string()))?
            .port(self.smtp_port)
            .timeout(Some(Duration::from_secs(SMTP_TIMEOUT_SECS)));
        if let Some(credentials) = &self.credentials {
            builder = builder.credentials(credentials.clone());
        }

        builder
            .build()
            .send(&email)
            .map(|_| ())
            .map_err(|error| MailError::Transport(error.to_string()))
    }

    fn recipient(&self) -> Result<Mailbox, MailError> {
        let address = self
            .to
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .ok_or_else(|| MailError::InvalidRecipient("not configured".into()))?;
        address
            .parse()
            .map_err(|_| MailError::InvalidRecipient(address.to_string()))
    }

    /// Render the conversation as an HTML document. Every user-supplied
    /// field is escaped; newlines in message text become `<br>`.
    pub fn build_html(&self, user_name: &str, conversation: &[Message]) -> String {
        let generated = Local::now().format("%Y-%m-%d %H:%M").to_string();

        let mut body = String::new();
        body.push_str("<h2>Chat Conversation Transcript</h2>");
        body.push_str(&format!(
            "<p><strong>User:</strong> {}</p>",
            escape_html(user_name)
        ));
        body.push_str(&format!(
            "<p><strong>Site:</strong> {}</p>",
            escape_html(&self.site_name)
        ));
        body.push_str(&format!("<p><strong>Date:</strong> {generated}</p><hr>"));
        body.push_str("<h3>Messages:</h3><ul style=\"list-style-type: none; padding-left: 0;\">");

        for message in conversation {
            let sender_name = match message.sender {
                Sender::Bot => "Bot".to_string(),
                _ => escape_html(&message.name),
            };
            let text = escape_html(&message.text).replace('\n', "<br>");
            let time = format_client_timestamp(&message.timestamp);
            body.push_str(&format!(
                "<li style=\"margin-bottom: 10px;\"><strong>[{time}] {sender_name}:</strong> \
                 <div style=\"margin-top: 3px;\">{text}</div></li>"
            ));
        }
        body.push_str("</ul>");
        body
    }
}

fn format_client_timestamp(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }
    DateTime::parse_from_rfc3339(raw).map_or_else(
        |_| "Invalid Date".to_string(),
        |timestamp| {
            timestamp
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MailConfig;

    fn mailer(to: Option<&str>) -> TranscriptMailer {
        TranscriptMailer::new(&MailConfig {
            transcript_to: to.map(ToString::to_string),
            ..MailConfig::default()
        })
    }

    fn message(sender: Sender, name: &str, text: &str, timestamp: &str) -> Message {
        Message {
            sender,
            name: name.into(),
            text: text.into(),
            timestamp: timestamp.into(),
        }
    }

    #[test]
    fn missing_recipient_fails_closed() {
        let result = mailer(None).send("Alice", &[]);
        assert!(matches!(result, Err(MailError::InvalidRecipient(_))));
    }

    #[test]
    fn malformed_recipient_fails_closed() {
        let result = mailer(Some("not-an-address")).send("Alice", &[]);
        assert!(matches!(result, Err(MailError::InvalidRecipient(_))));
    }

    #[test]
    fn html_escapes_user_content() {
        let conversation = vec![message(
            Sender::User,
            "<b>Alice</b>",
            "<script>alert(1)</script>",
            "2024-05-01T10:00:00Z",
        )];
        let html = mailer(Some("admin@example.com")).build_html("<b>Alice</b>", &conversation);

        assert!(html.contains("&lt;b&gt;Alice&lt;/b&gt;"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn newlines_become_breaks() {
        let conversation = vec![message(
            Sender::Agent,
            "Sam",
            "line one\nline two",
            "2024-05-01T10:00:00Z",
        )];
        let html = mailer(Some("admin@example.com")).build_html("Alice", &conversation);
        assert!(html.contains("line one<br>line two"));
    }

    #[test]
    fn bot_messages_are_attributed_to_bot() {
        let conversation = vec![message(
            Sender::Bot,
            "ignored",
            "Hi there!",
            "2024-05-01T10:00:00Z",
        )];
        let html = mailer(Some("admin@example.com")).build_html("Alice", &conversation);
        assert!(html.contains("Bot:"));
        assert!(!html.contains("ignored"));
    }

    #[test]
    fn invalid_timestamp_renders_placeholder() {
        assert_eq!(format_client_timestamp("yesterday-ish"), "Invalid Date");
        assert_eq!(format_client_timestamp(""), "");
    }
}
