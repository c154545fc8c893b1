//! Narrow capability interfaces standing in for the source's duck-typed
//! provider polymorphism (section 9): WhatsApp adapters (Meta/Evolution)
//! share `verify_signature`/`send_message`; the payment adapter (Stripe)
//! shares `verify_signature`/`retrieve_event`. Tests substitute a `Fake`
//! variant of each rather than hitting the network.

pub mod stripe;
pub mod whatsapp_evolution;
pub mod whatsapp_meta;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::AppError;
use crate::state::AppState;

/// Picks the WhatsApp adapter named by `WHATSAPP_PROVIDER` (section 9
/// treats Meta and Evolution as interchangeable behind this trait).
pub fn build_whatsapp_provider(state: &AppState) -> Result<Box<dyn WhatsAppProvider>, AppError> {
    let config = &state.config;
    match config.whatsapp_provider.as_str() {
        "meta" => {
            let base_url = config
                .whatsapp_base_url
                .clone()
                .ok_or_else(|| AppError::Internal("WHATSAPP_BASE_URL not configured".into()))?;
            let access_token = config
                .whatsapp_api_key
                .clone()
                .ok_or_else(|| AppError::Internal("WHATSAPP_API_KEY not configured".into()))?;
            let app_secret = config
                .whatsapp_meta_app_secret
                .clone()
                .ok_or_else(|| AppError::Internal("WHATSAPP_META_APP_SECRET not configured".into()))?;
            Ok(Box::new(whatsapp_meta::MetaWhatsAppProvider::new(
                state.http_client.clone(),
                base_url,
                access_token,
                app_secret,
            )))
        }
        "evolution" => {
            let base_url = config
                .whatsapp_base_url
                .clone()
                .ok_or_else(|| AppError::Internal("WHATSAPP_BASE_URL not configured".into()))?;
            let instance = config
                .whatsapp_instance
                .clone()
                .ok_or_else(|| AppError::Internal("WHATSAPP_INSTANCE not configured".into()))?;
            let api_key = config
                .whatsapp_api_key
                .clone()
                .ok_or_else(|| AppError::Internal("WHATSAPP_API_KEY not configured".into()))?;
            Ok(Box::new(whatsapp_evolution::EvolutionWhatsAppProvider::new(
                state.http_client.clone(),
                base_url,
                instance,
                api_key,
            )))
        }
        other => Err(AppError::Internal(format!("unknown WHATSAPP_PROVIDER '{other}'"))),
    }
}

pub fn build_payment_provider(state: &AppState) -> Result<stripe::StripeProvider, AppError> {
    let config = &state.config;
    let api_key = config
        .stripe_api_key
        .clone()
        .ok_or_else(|| AppError::Internal("STRIPE_API_KEY not configured".into()))?;
    let webhook_secret = config
        .stripe_webhook_secret
        .clone()
        .ok_or_else(|| AppError::Internal("STRIPE_WEBHOOK_SECRET not configured".into()))?;
    Ok(stripe::StripeProvider::new(state.http_client.clone(), api_key, webhook_secret))
}

#[async_trait]
pub trait WhatsAppProvider: Send + Sync {
    fn verify_signature(&self, body: &[u8], signature_header: Option<&str>) -> bool;

    /// Sends a text/template message to `destination` (the decrypted,
    /// provider-routable identifier from the vault). Implementations must
    /// never log `destination`.
    async fn send_message(&self, destination: &str, body: &str) -> Result<(), ProviderSendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderSendError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn verify_signature(&self, body: &str, signature_header: &str) -> bool;

    /// Retrieves the full event payload by id — the worker never trusts the
    /// webhook body itself, only the event id, per section 4.5.
    async fn retrieve_event(&self, event_id: &str) -> Result<Value, AppError>;

    async fn create_checkout_session(
        &self,
        amount_cents: i64,
        currency: &str,
        metadata: &serde_json::Map<String, Value>,
        idempotency_key: &str,
    ) -> Result<Value, AppError>;
}
