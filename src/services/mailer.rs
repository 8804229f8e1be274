//! Email delivery for the daily digest.

use async_trait::async_trait;
use lettre::message::{Mailbox, Message, header};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("invalid email address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("failed to build email message: {0}")]
    Build(String),
    #[error("failed to send email: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, subject: &str, html_body: &str, to: &str) -> Result<(), DeliveryError>;
}

/// SMTP settings. An empty host switches the mailer to no-op mode.
#[derive(Debug, Clone, Default)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub starttls: bool,
    pub from: String,
}

/// Async SMTP mailer (or no-op when no host is configured).
#[derive(Clone)]
pub struct SmtpMailer {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, DeliveryError> {
        let from = parse_mailbox(&settings.from)?;

        let transport = if settings.host.trim().is_empty() {
            warn!("SMTP host not configured; digest emails will only be logged");
            None
        } else {
            let builder = if settings.starttls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
            }
            .map_err(|e| DeliveryError::Transport(format!("configuring SMTP relay: {e}")))?
            .port(settings.port);

            let builder = match (&settings.username, &settings.password) {
                (Some(username), Some(password)) => {
                    builder.credentials(Credentials::new(username.clone(), password.clone()))
                }
                _ => builder,
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self { transport, from })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, subject: &str, html_body: &str, to: &str) -> Result<(), DeliveryError> {
        let recipient = parse_mailbox(to)?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(recipient)
            .subject(subject)
            .header(header::ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| DeliveryError::Build(e.to_string()))?;

        match &self.transport {
            Some(transport) => {
                transport
                    .send(email)
                    .await
                    .map_err(|e| DeliveryError::Transport(e.to_string()))?;
                info!(subject, to, "email sent");
            }
            None => {
                info!(
                    subject,
                    to,
                    bytes = html_body.len(),
                    "mailer in no-op mode; skipping actual send"
                );
            }
        }
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .parse::<Mailbox>()
        .map_err(|e| DeliveryError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
pub mod fake {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct SentEmail {
        pub subject: String,
        pub html_body: String,
        pub to: String,
    }

    /// Records sent messages; can be told to fail every send.
    #[derive(Clone, Default)]
    pub struct RecordingMailer {
        pub sent: Arc<Mutex<Vec<SentEmail>>>,
        pub fail: bool,
    }

    impl RecordingMailer {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub async fn sent(&self) -> Vec<SentEmail> {
            self.sent.lock().await.clone()
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send(
            &self,
            subject: &str,
            html_body: &str,
            to: &str,
        ) -> Result<(), DeliveryError> {
            if self.fail {
                return Err(DeliveryError::Transport("injected delivery failure".into()));
            }
            self.sent.lock().await.push(SentEmail {
                subject: subject.to_string(),
                html_body: html_body.to_string(),
                to: to.to_string(),
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SmtpSettings {
        SmtpSettings {
            from: "digest@example.com".into(),
            ..SmtpSettings::default()
        }
    }

    #[test]
    fn empty_host_means_noop() {
        let mailer = SmtpMailer::new(&settings()).unwrap();
        assert!(!mailer.is_enabled());
    }

    #[test]
    fn invalid_sender_is_rejected() {
        let err = SmtpMailer::new(&SmtpSettings {
            from: "not an address".into(),
            ..SmtpSettings::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, DeliveryError::InvalidAddress { .. }));
    }

    #[tokio::test]
    async fn noop_send_validates_recipient() {
        let mailer = SmtpMailer::new(&settings()).unwrap();

        mailer
            .send("Summary", "<p>hi</p>", "ops@example.com")
            .await
            .unwrap();
        let err = mailer.send("Summary", "<p>hi</p>", "nobody").await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidAddress { .. }));
    }
}
