pub mod adapters;
pub mod router;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Metadata, PaymentMethod};

pub use adapters::{GatewayConfig, PaypalLikeGateway, StripeLikeGateway};
pub use router::PaymentRouter;

/// One payment attempt, as handed to a provider adapter. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub method: PaymentMethod,
    pub description: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub success: bool,
    pub transaction_id: Option<String>,
    pub redirect_url: Option<String>,
    pub error: Option<PaymentError>,
    /// Which adapter handled the attempt; annotated by the router so webhooks
    /// and captures can be routed back to the same provider.
    pub gateway: Option<String>,
}

impl PaymentResponse {
    pub fn approved(transaction_id: String) -> Self {
        Self {
            success: true,
            transaction_id: Some(transaction_id),
            redirect_url: None,
            error: None,
            gateway: None,
        }
    }

    pub fn declined(code: &str, message: impl Into<String>) -> Self {
        Self {
            success: false,
            transaction_id: None,
            redirect_url: None,
            error: Some(PaymentError {
                code: code.to_string(),
                message: message.into(),
            }),
            gateway: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentError {
    pub code: String,
    pub message: String,
}

/// Infrastructure-level adapter failure: the provider could not be reached or
/// answered with something unparseable. A declined payment is NOT an error of
/// this kind; declines come back as a failed `PaymentResponse`.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider unreachable: {0}")]
    Unreachable(String),
    #[error("malformed provider response: {0}")]
    Protocol(String),
}

/// Inbound provider notification, decoded after signature verification.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event_type: String,
    pub transaction_id: Option<String>,
    pub invoice_id: Option<Uuid>,
}

/// key: gateway-adapter -> uniform provider contract
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &str;
    fn is_active(&self) -> bool;
    fn supports(&self, currency: &str, method: PaymentMethod) -> bool;

    async fn initiate(&self, request: &PaymentRequest) -> Result<PaymentResponse, GatewayError>;

    /// Separate capture step. Providers that settle on initiation answer with
    /// an `unsupported_operation` response rather than an error.
    async fn capture(&self, transaction_id: &str) -> Result<PaymentResponse, GatewayError>;

    async fn check_status(&self, transaction_id: &str) -> Result<PaymentResponse, GatewayError>;

    /// `None` on a bad signature; never an error.
    fn verify_webhook(&self, payload: &[u8], signature: &str) -> Option<WebhookEvent>;
}
