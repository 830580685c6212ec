use crate::config::SmtpConfig;
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::{authentication::Credentials, PoolConfig},
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("SMTP is not configured")]
    NotConfigured,
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("failed to build message: {0}")]
    Message(#[from] lettre::error::Error),
    #[error("SMTP delivery failed: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html_body: String,
}

/// Mail-send primitive used by the SEND_EMAIL action
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError>;
}

#[derive(Debug, Clone)]
pub struct SmtpMailer {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from_email: String,
    from_name: String,
}

impl SmtpMailer {
    /// Build the pooled transport. An unconfigured SMTP section yields a
    /// mailer whose sends fail with `MailError::NotConfigured`.
    pub fn new(smtp_config: &SmtpConfig) -> Result<Self, MailError> {
        let transport = if smtp_config.is_configured() {
            let creds = Credentials::new(smtp_config.username.clone(), smtp_config.password.clone());
            let builder = if smtp_config.use_tls {
                AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp_config.host)?
            } else {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_config.host)
            };
            Some(
                builder
                    .port(smtp_config.port)
                    .credentials(creds)
                    .pool_config(PoolConfig::new().max_size(10))
                    .timeout(Some(Duration::from_secs(10)))
                    .build(),
            )
        } else {
            tracing::warn!("SMTP not configured; SEND_EMAIL actions will fail");
            None
        };

        Ok(SmtpMailer {
            transport,
            from_email: smtp_config.from_email.clone(),
            from_name: smtp_config.from_name.clone(),
        })
    }
}

fn mailbox(address: &str, name: Option<&str>) -> Result<Mailbox, MailError> {
    let formatted = match name {
        Some(name) => format!("{} <{}>", name, address),
        None => address.to_string(),
    };
    formatted
        .parse::<Mailbox>()
        .map_err(|_| MailError::InvalidAddress(address.to_string()))
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        let transport = self.transport.as_ref().ok_or(MailError::NotConfigured)?;

        let message = Message::builder()
            .from(mailbox(&self.from_email, Some(&self.from_name))?)
            .to(mailbox(&email.to, email.to_name.as_deref())?)
            .subject(email.subject.as_str())
            .header(ContentType::TEXT_HTML)
            .body(email.html_body.clone())?;

        match transport.send(message).await {
            Ok(_) => {
                info!("Email sent successfully to {}", email.to);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send email to {}: {}", email.to, e);
                Err(MailError::Transport(e))
            }
        }
    }
}
