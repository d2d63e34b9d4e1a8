use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{DeliveryError, OutboundMessenger};

#[derive(Deserialize)]
struct TwilioMessageResponse {
    sid: String,
}

/// Sends WhatsApp messages through the Twilio REST API (the asynchronous
/// path, independent of the webhook's TwiML acknowledgment).
pub struct TwilioMessenger {
    account_sid: String,
    auth_token: String,
    from_address: String,
    client: Client,
}

impl TwilioMessenger {
    pub fn new(account_sid: String, auth_token: String, from_address: String) -> Self {
        Self {
            account_sid,
            auth_token,
            from_address,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl OutboundMessenger for TwilioMessenger {
    async fn send_text(&self, address: &str, text: &str) -> Result<String, DeliveryError> {
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
            self.account_sid
        );
        let params = [
            ("To", address),
            ("From", self.from_address.as_str()),
            ("Body", text),
        ];
        let res = self
            .client
            .post(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&params)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(DeliveryError::Api {
                status: res.status().as_u16(),
                message: res.text().await.unwrap_or_default(),
            });
        }
        let parsed: TwilioMessageResponse = res.json().await?;
        Ok(parsed.sid)
    }
}
