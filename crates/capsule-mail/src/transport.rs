use async_trait::async_trait;
use capsule_core::config::SmtpConfig;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use crate::error::TransportError;

/// Port on which the server expects TLS from the first byte.
const IMPLICIT_TLS_PORT: u16 = 465;

/// Outbound delivery channel.
///
/// One call is one attempt: implementations must not retry internally.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, to: &str, from: &str, subject: &str, body: &str)
        -> Result<(), TransportError>;
}

/// SMTP transport over lettre.
///
/// A fresh connection is opened per message; nothing is pooled between calls.
#[derive(Debug, Clone)]
pub struct SmtpMailer {
    config: SmtpConfig,
}

impl SmtpMailer {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    /// The configured sender, used as the `from` of every delivery.
    pub fn from_address(&self) -> &str {
        &self.config.from
    }

    fn connect(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, TransportError> {
        let host = self.config.host.as_str();
        let builder = if self.config.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
        }
        .map_err(TransportError::Smtp)?;

        Ok(builder
            .port(self.config.port)
            .credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
            .build())
    }
}

fn mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .parse()
        .map_err(|e: lettre::address::AddressError| TransportError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl Transport for SmtpMailer {
    async fn send(
        &self,
        to: &str,
        from: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), TransportError> {
        let message = Message::builder()
            .from(mailbox(from)?)
            .to(mailbox(to)?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(body.to_string())
            .map_err(|e| TransportError::Build(e.to_string()))?;

        let mailer = self.connect()?;
        mailer.send(message).await.map_err(TransportError::Smtp)?;
        debug!(host = %self.config.host, port = self.config.port, %to, "smtp send accepted");
        Ok(())
    }
}
