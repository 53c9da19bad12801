//! Email transports.
//!
//! [`EmailSender`] is the seam between the invite logic and delivery.
//! [`SmtpEmailSender`] delivers through `lettre`; [`LogEmailSender`] only
//! logs, and is used when SMTP is not configured and in tests.

use std::sync::{Arc, Mutex};

use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use super::template::RenderedEmail;
use crate::error::MailError;

/// Delivers a rendered email to one recipient.
#[async_trait::async_trait]
pub trait EmailSender: Send + Sync {
    /// Send `email` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`MailError`] if the address is invalid or delivery fails.
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<(), MailError>;
}

/// SMTP connection settings.
#[derive(Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Plain, unencrypted SMTP (local development only).
    pub insecure: bool,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("insecure", &self.insecure)
            .finish_non_exhaustive()
    }
}

/// Sends email over SMTP.
pub struct SmtpEmailSender {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl std::fmt::Debug for SmtpEmailSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpEmailSender")
            .field("from", &self.from.to_string())
            .finish_non_exhaustive()
    }
}

impl SmtpEmailSender {
    /// Build an SMTP sender.
    ///
    /// # Errors
    ///
    /// Returns [`MailError::Address`] if `from` does not parse, or
    /// [`MailError::Transport`] if the relay cannot be configured or only
    /// one of username/password is given.
    pub fn new(settings: &SmtpSettings, from: &str) -> Result<Self, MailError> {
        let from: Mailbox = from.parse().map_err(|e| MailError::Address {
            address: from.to_owned(),
            reason: format!("{e}"),
        })?;

        let transport = if settings.insecure {
            tracing::warn!(
                host = %settings.host,
                port = settings.port,
                "using unencrypted SMTP transport, development only"
            );
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .port(settings.port)
                .build()
        } else {
            let builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError::Transport {
                    reason: format!("relay {}: {e}", settings.host),
                })?
                .port(settings.port);

            match (settings.username.is_empty(), settings.password.is_empty()) {
                (true, true) => builder.build(),
                (false, false) => builder
                    .credentials(Credentials::new(
                        settings.username.clone(),
                        settings.password.clone(),
                    ))
                    .build(),
                _ => {
                    return Err(MailError::Transport {
                        reason: "SMTP username and password must both be set or both be empty"
                            .to_owned(),
                    });
                }
            }
        };

        Ok(Self { from, transport })
    }
}

#[async_trait::async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<(), MailError> {
        let to_mailbox: Mailbox = to.parse().map_err(|e| MailError::Address {
            address: to.to_owned(),
            reason: format!("{e}"),
        })?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to_mailbox)
            .subject(email.subject.clone())
            .multipart(MultiPart::alternative_plain_html(
                email.text.clone(),
                email.html.clone(),
            ))
            .map_err(|e| MailError::Build {
                reason: e.to_string(),
            })?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::Transport {
                reason: e.to_string(),
            })?;

        tracing::info!(to = %to, subject = %email.subject, "invite email sent");
        Ok(())
    }
}

/// A message captured by [`LogEmailSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub to: String,
    pub email: RenderedEmail,
}

/// Logs emails instead of delivering them and keeps a copy of each.
#[derive(Debug, Clone, Default)]
pub struct LogEmailSender {
    outbox: Arc<Mutex<Vec<SentEmail>>>,
    fail: bool,
}

impl LogEmailSender {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A sender whose every delivery fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Messages "sent" so far.
    #[must_use]
    pub fn outbox(&self) -> Vec<SentEmail> {
        self.outbox
            .lock()
            .map(|o| o.clone())
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, email: &RenderedEmail) -> Result<(), MailError> {
        if self.fail {
            tracing::warn!(to = %to, "log sender simulating delivery failure");
            return Err(MailError::Transport {
                reason: "simulated failure".to_owned(),
            });
        }

        tracing::info!(to = %to, subject = %email.subject, body = %email.text, "invite email (not delivered)");
        if let Ok(mut outbox) = self.outbox.lock() {
            outbox.push(SentEmail {
                to: to.to_owned(),
                email: email.clone(),
            });
        }
        Ok(())
    }
}
