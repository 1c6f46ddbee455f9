//! Console gateway — logs the message instead of delivering it.
//! The default backend when no provider is configured; also handy in
//! development and demos.

use async_trait::async_trait;

use cadence_core::error::Result;
use cadence_core::traits::MessagingGateway;
use cadence_core::types::{DispatchReceipt, Outcome, OutboundMessage};

pub struct ConsoleGateway {
    name: String,
}

impl ConsoleGateway {
    pub fn new(name: &str) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl MessagingGateway for ConsoleGateway {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DispatchReceipt> {
        tracing::info!(
            gateway = %self.name,
            channel = %message.channel,
            to = %message.recipient,
            subject = %message.subject,
            "📤 {}",
            message.body
        );
        Ok(DispatchReceipt {
            provider_ref: Some(format!("console-{}", uuid::Uuid::new_v4())),
            // Nothing actually left the machine, but from the engine's
            // point of view the "provider" confirmed delivery
            outcome: Outcome::Success,
        })
    }
}
