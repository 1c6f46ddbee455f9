//! SMTP email gateway (async lettre). Works against Gmail, Outlook,
//! or any STARTTLS relay.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use cadence_core::config::SmtpConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::MessagingGateway;
use cadence_core::types::{DispatchReceipt, Outcome, OutboundMessage};

pub struct SmtpGateway {
    config: SmtpConfig,
}

impl SmtpGateway {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn from_mailbox(&self) -> Result<Mailbox> {
        let from = match &self.config.from_name {
            Some(name) => format!("{name} <{}>", self.config.from_address),
            None => self.config.from_address.clone(),
        };
        from.parse()
            .map_err(|e| CadenceError::Transport(format!("invalid from address: {e}")))
    }
}

#[async_trait]
impl MessagingGateway for SmtpGateway {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DispatchReceipt> {
        let to_mailbox: Mailbox = message
            .recipient
            .parse()
            .map_err(|e| CadenceError::Transport(format!("invalid recipient: {e}")))?;

        let email = Message::builder()
            .from(self.from_mailbox()?)
            .to(to_mailbox)
            .subject(&message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| CadenceError::Transport(format!("build email: {e}")))?;

        let creds = Credentials::new(self.config.username.clone(), self.config.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.host)
            .map_err(|e| CadenceError::Transport(format!("SMTP relay: {e}")))?
            .port(self.config.port)
            .credentials(creds)
            .build();

        mailer
            .send(email)
            .await
            .map_err(|e| CadenceError::Transport(format!("SMTP send: {e}")))?;

        tracing::info!(to = %message.recipient, "📧 Email handed to SMTP relay");
        Ok(DispatchReceipt {
            // SMTP gives no message id back on submission
            provider_ref: None,
            // The relay accepted it; delivery is not confirmed
            outcome: Outcome::Pending,
        })
    }
}
