//! Report notification over SMTP.
//!
//! Sends one `multipart/alternative` message per run with the plain report
//! first and the HTML report second. The connection is upgraded with
//! STARTTLS before authenticating as the sender.
//!
//! # Features
//!
//! This module is only available when the `email` feature is enabled.

use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart, header};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::response::{Category, Code, Severity};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::config::NotificationSettings;
use crate::secret::Secret;
use crate::sink::{RunReport, Sink, SinkError, SinkOutcome};

/// Sends the rendered report to a list of recipients.
pub struct EmailSink {
    host: String,
    port: u16,
    sender: Mailbox,
    sender_login: String,
    password: Secret,
    recipients: Vec<Mailbox>,
    subject: String,
    timeout: Duration,
}

impl EmailSink {
    /// Create a sink from its settings.
    ///
    /// Every address is parsed here so a typo fails before the run starts
    /// delivering.
    pub fn new(settings: &NotificationSettings) -> Result<Self, SinkError> {
        if settings.smtp_host.trim().is_empty() {
            return Err(SinkError::config("notification_sink.smtp_host is not set"));
        }
        if settings.sender.trim().is_empty() {
            return Err(SinkError::config("notification_sink.sender is not set"));
        }
        let password = match &settings.password {
            Some(password) if !password.is_blank() => password.clone(),
            _ => return Err(SinkError::config("notification_sink.password is not set")),
        };
        if settings.recipients.is_empty() {
            return Err(SinkError::config("notification_sink.recipients is empty"));
        }

        let sender = parse_mailbox(&settings.sender)?;
        let recipients = settings
            .recipients
            .iter()
            .map(|address| parse_mailbox(address))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            host: settings.smtp_host.trim().to_string(),
            port: settings.smtp_port,
            sender,
            sender_login: settings.sender.trim().to_string(),
            password,
            recipients,
            subject: settings.subject.clone(),
            timeout: Duration::from_secs(30),
        })
    }

    /// Bound the SMTP conversation by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the message for one run.
    fn build_message(&self, run: &RunReport) -> Result<Message, SinkError> {
        let mut builder = Message::builder()
            .from(self.sender.clone())
            .subject(self.subject.clone());

        for recipient in &self.recipients {
            builder = builder.to(recipient.clone());
        }

        builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_PLAIN)
                            .body(run.report.plain.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(header::ContentType::TEXT_HTML)
                            .body(run.report.html.clone()),
                    ),
            )
            .map_err(|e| SinkError::config(format!("could not build message: {}", e)))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, SinkError> {
        let credentials = Credentials::new(
            self.sender_login.clone(),
            self.password.expose().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)
            .map_err(|e| SinkError::Transport {
                message: format!("could not set up relay {}: {}", self.host, e),
            })?
            .port(self.port)
            .credentials(credentials)
            .timeout(Some(self.timeout))
            .build();

        Ok(transport)
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, SinkError> {
    address
        .trim()
        .parse()
        .map_err(|e| SinkError::config(format!("invalid address '{}': {}", address, e)))
}

fn map_smtp_error(err: lettre::transport::smtp::Error) -> SinkError {
    classify_smtp_code(err.status(), err.to_string())
}

/// 530, 534 and 535 are the SMTP authentication failures; every other
/// reply, or no reply at all, is a transport failure.
fn classify_smtp_code(code: Option<Code>, message: String) -> SinkError {
    match code {
        Some(Code {
            severity: Severity::PermanentNegativeCompletion,
            category: Category::Unspecified3,
            ..
        }) => SinkError::Authentication { message },
        _ => SinkError::Transport { message },
    }
}

#[async_trait]
impl Sink for EmailSink {
    fn name(&self) -> &str {
        "email"
    }

    async fn publish(&self, run: &RunReport) -> Result<SinkOutcome, SinkError> {
        let message = self.build_message(run)?;
        let transport = self.transport()?;

        debug!(host = %self.host, port = self.port, recipients = self.recipients.len(), "Sending report mail");
        transport.send(message).await.map_err(map_smtp_error)?;

        info!(recipients = self.recipients.len(), "Sent report mail");
        Ok(SinkOutcome::delivered(format!(
            "mailed {} recipient(s)",
            self.recipients.len()
        )))
    }
}
