//! Twilio SMS gateway — plain REST, no SDK. Numbers are normalized to
//! E.164 before the API call; US ten-digit numbers get the +1 prefix.

use async_trait::async_trait;

use cadence_core::config::TwilioConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::MessagingGateway;
use cadence_core::types::{DispatchReceipt, Outcome, OutboundMessage};

pub struct TwilioGateway {
    config: TwilioConfig,
    client: reqwest::Client,
}

impl TwilioGateway {
    pub fn new(config: TwilioConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

/// Normalize a phone number to E.164.
pub fn normalize_phone(phone: &str) -> Result<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 10 {
        Ok(format!("+1{digits}"))
    } else if digits.len() == 11 && digits.starts_with('1') {
        Ok(format!("+{digits}"))
    } else if digits.len() > 10 && phone.trim_start().starts_with('+') {
        Ok(format!("+{digits}"))
    } else {
        Err(CadenceError::Transport(format!(
            "invalid phone number: {phone}"
        )))
    }
}

#[async_trait]
impl MessagingGateway for TwilioGateway {
    fn name(&self) -> &str {
        "twilio"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DispatchReceipt> {
        let to = normalize_phone(&message.recipient)?;
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.config.account_sid
        );

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to.as_str()),
                ("From", self.config.from_number.as_str()),
                ("Body", message.body.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CadenceError::Transport(format!("Twilio request: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(CadenceError::Transport(format!(
                "Twilio API error {status}: {body}"
            )));
        }

        let payload: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CadenceError::Transport(format!("Twilio response: {e}")))?;
        let sid = payload
            .get("sid")
            .and_then(|v| v.as_str())
            .map(String::from);

        tracing::info!(to = %to, sid = sid.as_deref().unwrap_or("-"), "📱 SMS handed to Twilio");
        Ok(DispatchReceipt {
            provider_ref: sid,
            outcome: Outcome::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_us_numbers() {
        assert_eq!(normalize_phone("5551234567").unwrap(), "+15551234567");
        assert_eq!(normalize_phone("(555) 123-4567").unwrap(), "+15551234567");
        assert_eq!(normalize_phone("15551234567").unwrap(), "+15551234567");
        assert_eq!(normalize_phone("+1 555 123 4567").unwrap(), "+15551234567");
    }

    #[test]
    fn test_normalize_international_needs_plus() {
        assert_eq!(normalize_phone("+44 20 7946 0958").unwrap(), "+442079460958");
        // Long digit string without a leading + is ambiguous
        assert!(normalize_phone("442079460958").is_err());
    }

    #[test]
    fn test_normalize_rejects_short_numbers() {
        assert!(normalize_phone("12345").is_err());
        assert!(normalize_phone("").is_err());
    }
}
