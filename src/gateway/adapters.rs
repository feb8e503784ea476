use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::models::PaymentMethod;

use super::{GatewayError, PaymentGateway, PaymentRequest, PaymentResponse, WebhookEvent};

/// Static per-provider configuration, injected at construction so the router
/// only ever sees the trait.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub name: String,
    pub active: bool,
    pub currencies: Vec<String>,
    pub methods: Vec<PaymentMethod>,
    pub webhook_secret: String,
}

impl GatewayConfig {
    fn supports(&self, currency: &str, method: PaymentMethod) -> bool {
        self.currencies.iter().any(|c| c == currency) && self.methods.contains(&method)
    }
}

fn hmac_hex(secret: &str, payload: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC can use any key length");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

fn decode_webhook(payload: &[u8]) -> Option<WebhookEvent> {
    serde_json::from_slice(payload).ok()
}

fn reject_invalid(request: &PaymentRequest) -> Result<(), GatewayError> {
    if request.amount_cents <= 0 {
        return Err(GatewayError::Protocol(format!(
            "provider rejected non-positive amount {}",
            request.amount_cents
        )));
    }
    Ok(())
}

/// key: gateway-adapter-stripelike -> card provider with separate capture
///
/// The wire protocol is provider-specific and out of scope here; the adapter
/// owns transaction-id minting and webhook signature verification
/// (`sha256=<hex>` over the raw body).
pub struct StripeLikeGateway {
    config: GatewayConfig,
}

impl StripeLikeGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PaymentGateway for StripeLikeGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_active(&self) -> bool {
        self.config.active
    }

    fn supports(&self, currency: &str, method: PaymentMethod) -> bool {
        self.config.supports(currency, method)
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentResponse, GatewayError> {
        reject_invalid(request)?;
        Ok(PaymentResponse::approved(format!(
            "ch_{}",
            Uuid::new_v4().simple()
        )))
    }

    async fn capture(&self, transaction_id: &str) -> Result<PaymentResponse, GatewayError> {
        Ok(PaymentResponse::approved(transaction_id.to_string()))
    }

    async fn check_status(&self, transaction_id: &str) -> Result<PaymentResponse, GatewayError> {
        Ok(PaymentResponse::approved(transaction_id.to_string()))
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Option<WebhookEvent> {
        let expected = format!("sha256={}", hmac_hex(&self.config.webhook_secret, payload));
        if expected != signature {
            return None;
        }
        decode_webhook(payload)
    }
}

/// key: gateway-adapter-paypallike -> wallet provider, settles on initiation
///
/// No separate capture step; capture answers `unsupported_operation`.
/// Webhook signatures use the provider's `v1=<hex>` scheme.
pub struct PaypalLikeGateway {
    config: GatewayConfig,
}

impl PaypalLikeGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PaymentGateway for PaypalLikeGateway {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_active(&self) -> bool {
        self.config.active
    }

    fn supports(&self, currency: &str, method: PaymentMethod) -> bool {
        self.config.supports(currency, method)
    }

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentResponse, GatewayError> {
        reject_invalid(request)?;
        let mut response = PaymentResponse::approved(format!("PAY-{}", Uuid::new_v4().simple()));
        response.redirect_url = Some(format!(
            "https://checkout.example.com/approve/{}",
            response.transaction_id.as_deref().unwrap_or_default()
        ));
        Ok(response)
    }

    async fn capture(&self, _transaction_id: &str) -> Result<PaymentResponse, GatewayError> {
        Ok(PaymentResponse::declined(
            "unsupported_operation",
            "provider settles on initiation; no capture step",
        ))
    }

    async fn check_status(&self, transaction_id: &str) -> Result<PaymentResponse, GatewayError> {
        Ok(PaymentResponse::approved(transaction_id.to_string()))
    }

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Option<WebhookEvent> {
        let expected = format!("v1={}", hmac_hex(&self.config.webhook_secret, payload));
        if expected != signature {
            return None;
        }
        decode_webhook(payload)
    }
}
