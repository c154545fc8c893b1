//! Evolution API adapter (self-hosted WhatsApp bridge). Evolution has no
//! payload-signing scheme of its own; it authenticates inbound webhooks
//! with a static shared-secret header instead, so `verify_signature`
//! compares that header in constant time rather than recomputing an HMAC.

use reqwest::Client;
use subtle::ConstantTimeEq;

use super::{ProviderSendError, WhatsAppProvider};

pub struct EvolutionWhatsAppProvider {
    http_client: Client,
    base_url: String,
    instance: String,
    api_key: String,
}

impl EvolutionWhatsAppProvider {
    pub fn new(http_client: Client, base_url: String, instance: String, api_key: String) -> Self {
        Self {
            http_client,
            base_url,
            instance,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl WhatsAppProvider for EvolutionWhatsAppProvider {
    fn verify_signature(&self, _body: &[u8], signature_header: Option<&str>) -> bool {
        let Some(header) = signature_header else {
            return false;
        };
        let expected = self.api_key.as_bytes();
        let actual = header.as_bytes();
        expected.len() == actual.len() && bool::from(expected.ct_eq(actual))
    }

    async fn send_message(&self, destination: &str, body: &str) -> Result<(), ProviderSendError> {
        let response = self
            .http_client
            .post(format!("{}/message/sendText/{}", self.base_url, self.instance))
            .header("apikey", &self.api_key)
            .json(&serde_json::json!({
                "number": destination,
                "text": body,
            }))
            .send()
            .await
            .map_err(|error| ProviderSendError::Transient(error.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error() || status.as_u16() == 429 {
            Err(ProviderSendError::Transient(format!("evolution send {status}")))
        } else {
            Err(ProviderSendError::Permanent(format!("evolution send {status}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> EvolutionWhatsAppProvider {
        EvolutionWhatsAppProvider::new(
            Client::new(),
            "https://evo.example.com".into(),
            "inn-1".into(),
            "shared-secret".into(),
        )
    }

    #[test]
    fn rejects_wrong_key() {
        assert!(!provider().verify_signature(b"{}", Some("wrong")));
    }

    #[test]
    fn accepts_matching_key() {
        assert!(provider().verify_signature(b"{}", Some("shared-secret")));
    }
}
