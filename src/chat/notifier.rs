use anyhow::Context;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::info;

use crate::config::SmtpConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivery of operator notifications.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()>;
}

/// Logs the notification instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
        info!(
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "chat notification email"
        );
        Ok(())
    }
}

/// Delivers through an SMTP relay: implicit TLS on port 465, STARTTLS otherwise.
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    pub fn new(config: &SmtpConfig) -> anyhow::Result<Self> {
        let builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .with_context(|| format!("smtp relay {}", config.host))?;
        let mut builder = builder.port(config.port);
        if !config.username.is_empty() {
            builder = builder.credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ));
        }
        let from = config
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("invalid SMTP_FROM {:?}", config.from))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &EmailMessage) -> anyhow::Result<()> {
        let email = build_message(&self.from, message)?;
        self.transport
            .send(email)
            .await
            .with_context(|| format!("smtp send to {}", message.to))?;
        info!(to = %message.to, subject = %message.subject, "chat notification email sent");
        Ok(())
    }
}

pub fn build_message(from: &Mailbox, message: &EmailMessage) -> anyhow::Result<Message> {
    let to = message
        .to
        .parse::<Mailbox>()
        .with_context(|| format!("invalid recipient {:?}", message.to))?;
    Message::builder()
        .from(from.clone())
        .to(to)
        .subject(message.subject.clone())
        .header(ContentType::TEXT_PLAIN)
        .body(message.body.clone())
        .context("build email")
}

pub fn unattended_message(operator: &str, sender: &str, content: &str) -> EmailMessage {
    EmailMessage {
        to: operator.to_string(),
        subject: "New Chat Message !!".into(),
        body: format!("New message received from {sender}:\n\n{content}"),
    }
}

#[cfg(test)]
pub use recording::RecordingEmailSender;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalation_mail_is_addressed_to_the_operator() {
        let from: Mailbox = "Webcenter <bot@example.com>".parse().unwrap();
        let email = build_message(&from, &unattended_message("ops@example.com", "bob", "printer on fire"))
            .unwrap();
        let raw = String::from_utf8(email.formatted()).unwrap();
        assert!(raw.contains("To: ops@example.com"));
        assert!(raw.contains("From: Webcenter <bot@example.com>"));
        assert!(raw.contains("Subject: New Chat Message !!"));
        assert!(raw.contains("New message received from bob:"));
        assert!(raw.contains("printer on fire"));
    }

    #[test]
    fn bad_recipient_is_an_error() {
        let from: Mailbox = "bot@example.com".parse().unwrap();
        assert!(build_message(&from, &unattended_message("not an address", "bob", "hi")).is_err());
    }

    #[test]
    fn sender_rejects_malformed_from_address() {
        let config = SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: "bot".into(),
            password: "secret".into(),
            from: "nobody at all".into(),
        };
        assert!(SmtpEmailSender::new(&config).is_err());
    }
}
