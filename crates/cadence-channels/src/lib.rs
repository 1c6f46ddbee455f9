//! # Cadence Channels
//!
//! `MessagingGateway` implementations plus the placeholder template
//! renderer. The console gateway stands in whenever a provider section
//! is missing from the config, so a bare install dispatches (to the
//! log) without any credentials.

use std::sync::Arc;

use cadence_core::config::ChannelConfig;
use cadence_core::traits::MessagingGateway;

pub mod console;
pub mod smtp;
pub mod template;
pub mod twilio;

pub use console::ConsoleGateway;
pub use smtp::SmtpGateway;
pub use template::PlaceholderRenderer;
pub use twilio::TwilioGateway;

/// Email gateway per config: SMTP when configured and enabled,
/// console otherwise.
pub fn email_gateway(config: &ChannelConfig) -> Arc<dyn MessagingGateway> {
    match &config.smtp {
        Some(smtp) if smtp.enabled => Arc::new(SmtpGateway::new(smtp.clone())),
        _ => Arc::new(ConsoleGateway::new("console-email")),
    }
}

/// SMS gateway per config: Twilio when configured and enabled,
/// console otherwise.
pub fn sms_gateway(config: &ChannelConfig) -> Arc<dyn MessagingGateway> {
    match &config.twilio {
        Some(twilio) if twilio.enabled => Arc::new(TwilioGateway::new(twilio.clone())),
        _ => Arc::new(ConsoleGateway::new("console-sms")),
    }
}
