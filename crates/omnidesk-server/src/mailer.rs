//! Outbound email for customer notifications.
//!
//! [`SmtpMailer`] delivers through `lettre` when `SMTP_HOST` is configured;
//! otherwise [`LogMailer`] writes each message to the log and reports success.

use std::future::Future;

use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;

use omnidesk_core::SmtpSettings;

/// Port on which SMTP servers expect implicit TLS instead of STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("could not build message: {0}")]
    Build(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
}

pub trait Mailer: Send + Sync {
    fn send(&self, email: &Email) -> impl Future<Output = Result<(), MailError>> + Send;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// # Errors
    ///
    /// Returns [`MailError::Address`] if `SMTP_FROM` is not a valid mailbox,
    /// or [`MailError::Smtp`] if the relay cannot be configured.
    pub fn new(settings: &SmtpSettings) -> Result<Self, MailError> {
        let builder = if settings.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)?
        };
        let mut builder = builder.port(settings.port);
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: settings.from.parse()?,
        })
    }
}

impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone())?;
        self.transport.send(message).await?;
        Ok(())
    }
}

/// Stand-in used when SMTP is not configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        let _: Mailbox = email.to.parse()?;
        tracing::info!(
            to = %email.to,
            subject = %email.subject,
            "mailer: SMTP not configured; logging message instead of sending"
        );
        Ok(())
    }
}

/// The mailer the server runs with, chosen from configuration.
pub enum AppMailer {
    Smtp(SmtpMailer),
    Log(LogMailer),
}

impl AppMailer {
    /// # Errors
    ///
    /// Propagates [`SmtpMailer::new`] failures.
    pub fn from_settings(settings: Option<&SmtpSettings>) -> Result<Self, MailError> {
        match settings {
            Some(smtp) => {
                tracing::info!(host = %smtp.host, port = smtp.port, "mailer: using SMTP relay");
                Ok(Self::Smtp(SmtpMailer::new(smtp)?))
            }
            None => Ok(Self::Log(LogMailer)),
        }
    }
}

impl Mailer for AppMailer {
    async fn send(&self, email: &Email) -> Result<(), MailError> {
        match self {
            Self::Smtp(mailer) => mailer.send(email).await,
            Self::Log(mailer) => mailer.send(email).await,
        }
    }
}
