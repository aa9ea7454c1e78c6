use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, Mailboxes, MultiPart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
        response::Response,
    },
};
use uuid::Uuid;

use std::time::Duration;

use crate::{
    config::{Config, SmtpConfig, SmtpSecurity},
    validator::OutgoingEmail,
};

/// Hands a validated email to the upstream relay.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends exactly once and returns the message identifier.
    async fn send(&self, email: &OutgoingEmail) -> Result<String, SendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("SMTP host is not configured")]
    NotConfigured,

    #[error("Sender address is not configured")]
    MissingSender,

    #[error("Invalid email address format: {0}")]
    AddressFormat(#[from] lettre::address::AddressError),

    #[error("Failed to build email message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("Invalid TLS parameters for '{host}': {source}")]
    Tls {
        host: String,
        #[source]
        source: lettre::transport::smtp::Error,
    },

    #[error("SMTP transport error: {0}")]
    SmtpTransport(#[from] lettre::transport::smtp::Error),

    #[error("SMTP transaction timed out after {0:?}")]
    Timeout(Duration),
}

pub struct SmtpMailer {
    sender: Option<String>,
    smtp: SmtpConfig,
    test_mode: bool,
}

impl SmtpMailer {
    pub fn new(config: &Config) -> Self {
        Self {
            sender: config.sender.clone(),
            smtp: config.smtp.clone(),
            test_mode: config.test_mode,
        }
    }

    // A fresh transport per send: no pooled connections outlive a request.
    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendError> {
        let host = self.smtp.host.as_deref().ok_or(SendError::NotConfigured)?;

        let parameters = TlsParameters::new(host.to_string()).map_err(|source| SendError::Tls {
            host: host.to_string(),
            source,
        })?;
        let tls = match self.smtp.security {
            SmtpSecurity::ImplicitTls => Tls::Wrapper(parameters),
            SmtpSecurity::RequiredStartTls => Tls::Required(parameters),
            SmtpSecurity::OpportunisticStartTls => Tls::Opportunistic(parameters),
        };

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(self.smtp.port())
            .tls(tls)
            .timeout(Some(self.smtp.timeout));

        if let Some(username) = &self.smtp.username {
            let creds = Credentials::new(
                username.clone(),
                self.smtp.password.clone().unwrap_or_default(),
            );
            builder = builder.credentials(creds);
        }

        Ok(builder.build())
    }

    fn build_message(&self, email: &OutgoingEmail) -> Result<(Message, String), SendError> {
        let from: Mailbox = self
            .sender
            .as_deref()
            .ok_or(SendError::MissingSender)?
            .parse()?;
        let message_id = format!("<{}@{}>", Uuid::new_v4(), from.email.domain());

        let mut builder = Message::builder()
            .from(from)
            .subject(email.subject.clone())
            .message_id(Some(message_id.clone()));

        for entry in &email.to {
            let mailboxes: Mailboxes = entry.parse()?;
            for mailbox in mailboxes {
                builder = builder.to(mailbox);
            }
        }

        let message = match &email.text {
            Some(text) => builder.multipart(MultiPart::alternative_plain_html(
                text.clone(),
                email.html.clone(),
            ))?,
            None => builder
                .header(ContentType::TEXT_HTML)
                .body(email.html.clone())?,
        };

        Ok((message, message_id))
    }

    fn log_test_preview(response: &Response) {
        let lines: Vec<&str> = response.message().collect();
        tracing::info!("Relay response: {} {}", response.code(), lines.join(" "));
        match preview_url(&lines) {
            Some(url) => tracing::info!("Preview URL: {}", url),
            None => tracing::info!("Relay response carries no preview URL"),
        }
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<String, SendError> {
        let mailer = self.transport()?;
        let (message, message_id) = self.build_message(email)?;
        let recipients = email.to.join(", ");

        tracing::info!(
            "Attempting to send email to '{}' with subject '{}'",
            recipients,
            email.subject
        );

        let response = tokio::time::timeout(self.smtp.timeout, mailer.send(message))
            .await
            .map_err(|_| SendError::Timeout(self.smtp.timeout))??;

        tracing::info!(%message_id, "Message to {} sent successfully", recipients);

        if self.test_mode {
            Self::log_test_preview(&response);
        }

        Ok(message_id)
    }
}

/// Ethereal answers `250 Accepted [STATUS=new MSGID=...]`; other relays yield `None`.
fn preview_url(lines: &[&str]) -> Option<String> {
    lines.iter().find_map(|line| {
        let (_, rest) = line.split_once("MSGID=")?;
        let id: String = rest
            .chars()
            .take_while(|c| !c.is_whitespace() && *c != ']')
            .collect();
        (!id.is_empty()).then(|| format!("https://ethereal.email/message/{id}"))
    })
}
