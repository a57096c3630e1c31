//! Outgoing mail over SMTP.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

/// Port for SMTP submission with STARTTLS.
pub const SUBMISSION_PORT: u16 = 587;

/// Port for SMTP over implicit TLS.
pub const SMTPS_PORT: u16 = 465;

/// Errors from the mail transport.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// Address failed to parse.
    #[error("invalid address '{address}': {reason}")]
    Address {
        /// Offending address.
        address: String,
        /// Parser message.
        reason: String,
    },
    /// Only 465 and 587 are supported.
    #[error("unsupported SMTP port {0}, expected 465 or 587")]
    UnsupportedPort(u16),
    /// Message could not be assembled.
    #[error("building message: {0}")]
    Build(String),
    /// SMTP conversation failed.
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    /// The server accepted the connection but did not answer NOOP.
    #[error("smtp server at {0} did not respond")]
    NoResponse(String),
}

/// Something that can deliver plain-text mail.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Open a connection and authenticate, without sending.
    async fn test_connection(&self) -> Result<(), MailError>;

    /// Deliver one plain-text message to `to`.
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// SMTP connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    /// Login and sender address.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Server host name.
    pub host: String,
    /// [`SUBMISSION_PORT`] or [`SMTPS_PORT`].
    pub port: u16,
}

/// [`Mailer`] backed by an async `lettre` SMTP transport.
pub struct SmtpMailer {
    from: Mailbox,
    host: String,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build a transport for `settings`. No connection is made yet.
    ///
    /// # Errors
    ///
    /// Fails on an unsupported port, an unparsable sender, or a bad host.
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let from = parse_mailbox(&settings.username)?;
        let builder = match settings.port {
            SUBMISSION_PORT => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?,
            SMTPS_PORT => AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?,
            other => return Err(MailError::UnsupportedPort(other)),
        };
        let transport = builder
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build();
        Ok(Self {
            from,
            host: settings.host.clone(),
            transport,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn test_connection(&self) -> Result<(), MailError> {
        debug!(host = %self.host, "testing smtp connection");
        if self.transport.test_connection().await? {
            Ok(())
        } else {
            Err(MailError::NoResponse(self.host.clone()))
        }
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(parse_mailbox(to)?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_owned())
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport.send(message).await?;
        info!(to, subject, "email sent");
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, MailError> {
    address.parse().map_err(|e: lettre::address::AddressError| MailError::Address {
        address: address.to_owned(),
        reason: e.to_string(),
    })
}
