//! Outgoing alert delivery
//!
//! [`SmtpNotifier`] submits one plain-text multipart mail per alert over
//! STARTTLS with authenticated login. [`LogNotifier`] is used when no mail
//! server or no SMTP password is configured and only writes the alert to
//! the log.

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, instrument, warn};

use crate::config::SmtpConfig;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// SMTP transport-level failure (authentication, connection, etc.)
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("email build error: {0}")]
    Build(#[from] lettre::error::Error),

    #[error("none of the {0} recipients is a valid email address")]
    NoValidRecipients(usize),

    #[error("no SMTP password configured for {username}")]
    MissingCredentials { username: String },
}

/// Sends a message to a set of recipients
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, recipients: &[String], subject: &str, body: &str)
    -> Result<(), NotifyError>;
}

pub struct SmtpNotifier {
    from: Mailbox,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    /// Build a transport that always logs in before submitting
    pub fn new(config: &SmtpConfig) -> Result<Self, NotifyError> {
        let credentials = Self::credentials(&config.username, config.password())?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)?
            .port(config.port)
            .credentials(credentials)
            .build();

        Ok(Self {
            from: config.from.parse()?,
            transport,
        })
    }

    fn credentials(username: &str, password: Option<String>) -> Result<Credentials, NotifyError> {
        match password {
            Some(password) if !password.is_empty() => {
                Ok(Credentials::new(username.to_string(), password))
            }
            _ => Err(NotifyError::MissingCredentials {
                username: username.to_string(),
            }),
        }
    }

    /// Assemble the alert mail; all recipients share one `To` header
    ///
    /// Addresses that do not parse are skipped so one bad user entry does
    /// not silence the rest of the group.
    pub fn build_message(
        from: &Mailbox,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<Message, NotifyError> {
        let mut builder = Message::builder().from(from.clone()).subject(subject);
        let mut valid = 0;
        for recipient in recipients {
            match recipient.parse::<Mailbox>() {
                Ok(mailbox) => {
                    builder = builder.to(mailbox);
                    valid += 1;
                }
                Err(e) => warn!("skipping recipient {recipient:?}: {e}"),
            }
        }

        if valid == 0 {
            return Err(NotifyError::NoValidRecipients(recipients.len()));
        }

        let message =
            builder.multipart(MultiPart::mixed().singlepart(SinglePart::plain(body.to_string())))?;
        Ok(message)
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    #[instrument(skip(self, body))]
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        let message = Self::build_message(&self.from, recipients, subject, body)?;
        let delivered = message.envelope().to().len();
        self.transport.send(message).await?;
        info!("alert mail sent to {delivered} recipients");
        Ok(())
    }
}

/// Writes alerts to the log instead of mailing them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        recipients: &[String],
        subject: &str,
        body: &str,
    ) -> Result<(), NotifyError> {
        warn!(
            recipients = %recipients.join(","),
            "{subject} (no mail server configured):\n{body}"
        );
        Ok(())
    }
}
