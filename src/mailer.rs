//! Email delivery over SMTP.

use crate::config::SmtpConfig;
use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

/// Subject line for the report of `date`.
pub fn subject_for(date: NaiveDate) -> String {
    format!("Daily report - {}", date.format("%Y-%m-%d"))
}

/// Plain-text message with every recipient in `To`.
pub fn build_message(
    sender: &Mailbox,
    recipients: &[String],
    subject: &str,
    body: &str,
) -> Result<Message> {
    if recipients.is_empty() {
        bail!("No recipients given");
    }

    let mut builder = Message::builder()
        .from(sender.clone())
        .subject(subject)
        .header(ContentType::TEXT_PLAIN);

    for recipient in recipients {
        let mailbox: Mailbox = recipient
            .parse()
            .with_context(|| format!("Invalid recipient address: {}", recipient))?;
        builder = builder.to(mailbox);
    }

    builder
        .body(body.to_string())
        .context("Failed to build email message")
}

/// SMTP sender built from the `[smtp]` settings.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    sender: Mailbox,
}

impl Mailer {
    /// Implicit TLS when `use_ssl`, STARTTLS otherwise. User and password
    /// are required.
    pub fn from_config(config: &SmtpConfig) -> Result<Self> {
        let (Some(user), Some(password)) = (config.user.as_deref(), config.password.as_deref())
        else {
            bail!("Missing SMTP configuration: SMTP_USER and SMTP_PASSWORD must be set");
        };

        let sender_address = config.sender.as_deref().unwrap_or(user);
        let sender: Mailbox = sender_address
            .parse()
            .with_context(|| format!("Invalid sender address: {}", sender_address))?;

        let builder = if config.use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.server)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.server)
        }
        .with_context(|| format!("Failed to set up SMTP relay {}", config.server))?;

        let transport = builder
            .port(config.port)
            .credentials(Credentials::new(user.to_string(), password.to_string()))
            .build();

        Ok(Self { transport, sender })
    }

    /// Send `report` as the daily report for `date`.
    pub async fn send_report(
        &self,
        recipients: &[String],
        report: &str,
        date: NaiveDate,
    ) -> Result<()> {
        let message = build_message(&self.sender, recipients, &subject_for(date), report)?;

        self.transport
            .send(message)
            .await
            .context("Failed to send email")?;

        info!("Email sent to {}", recipients.join(", "));
        Ok(())
    }
}
