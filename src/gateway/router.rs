use std::sync::Arc;

use tracing::{info, warn};

use super::{PaymentGateway, PaymentRequest, PaymentResponse, WebhookEvent};

/// key: payment-router -> cross-provider failover
///
/// Failover is triggered by adapter-level infrastructure errors only. A
/// declined payment from a provider is a final answer; retrying a decline
/// against another provider would be a business-logic violation.
pub struct PaymentRouter {
    gateways: Vec<Arc<dyn PaymentGateway>>,
}

impl PaymentRouter {
    pub fn new(gateways: Vec<Arc<dyn PaymentGateway>>) -> Self {
        Self { gateways }
    }

    pub fn gateway(&self, name: &str) -> Option<&Arc<dyn PaymentGateway>> {
        self.gateways.iter().find(|gateway| gateway.name() == name)
    }

    /// Attempt a payment, falling back across eligible providers on
    /// infrastructure failure. Never returns an error: an exhausted or empty
    /// candidate set comes back as a structured failure response.
    pub async fn process_payment(
        &self,
        request: &PaymentRequest,
        preferred_gateway: Option<&str>,
    ) -> PaymentResponse {
        // Registration order is the stable fallback order.
        let mut candidates: Vec<&Arc<dyn PaymentGateway>> = self
            .gateways
            .iter()
            .filter(|gateway| {
                gateway.is_active() && gateway.supports(&request.currency, request.method)
            })
            .collect();

        if candidates.is_empty() {
            warn!(
                currency = %request.currency,
                method = request.method.as_str(),
                "no payment gateway available for request"
            );
            return PaymentResponse::declined(
                "no_gateway_available",
                format!(
                    "no active gateway supports {} via {}",
                    request.currency,
                    request.method.as_str()
                ),
            );
        }

        // The preference only steers the first pick; fallback order is
        // unaffected once failover starts.
        if let Some(preferred) = preferred_gateway {
            if let Some(index) = candidates
                .iter()
                .position(|gateway| gateway.name() == preferred)
            {
                let preferred = candidates.remove(index);
                candidates.insert(0, preferred);
            }
        }

        let mut last_error: Option<String> = None;
        for gateway in candidates {
            match gateway.initiate(request).await {
                Ok(mut response) => {
                    response.gateway = Some(gateway.name().to_string());
                    if response.success {
                        info!(
                            gateway = gateway.name(),
                            transaction = response.transaction_id.as_deref().unwrap_or(""),
                            "payment initiated"
                        );
                    } else {
                        info!(gateway = gateway.name(), "payment declined by provider");
                    }
                    return response;
                }
                Err(err) => {
                    warn!(
                        gateway = gateway.name(),
                        ?err,
                        "gateway failed at infrastructure level, trying next candidate"
                    );
                    last_error = Some(format!("{}: {err}", gateway.name()));
                }
            }
        }

        PaymentResponse::declined(
            "all_gateways_failed",
            last_error.unwrap_or_else(|| "no gateway produced a response".to_string()),
        )
    }

    pub async fn capture(&self, gateway_name: &str, transaction_id: &str) -> PaymentResponse {
        let Some(gateway) = self.gateway(gateway_name) else {
            return PaymentResponse::declined(
                "no_gateway_available",
                format!("unknown gateway `{gateway_name}`"),
            );
        };
        match gateway.capture(transaction_id).await {
            Ok(mut response) => {
                response.gateway = Some(gateway_name.to_string());
                response
            }
            Err(err) => {
                warn!(gateway = gateway_name, ?err, "capture failed");
                PaymentResponse::declined("gateway_unreachable", err.to_string())
            }
        }
    }

    pub async fn check_status(&self, gateway_name: &str, transaction_id: &str) -> PaymentResponse {
        let Some(gateway) = self.gateway(gateway_name) else {
            return PaymentResponse::declined(
                "no_gateway_available",
                format!("unknown gateway `{gateway_name}`"),
            );
        };
        match gateway.check_status(transaction_id).await {
            Ok(mut response) => {
                response.gateway = Some(gateway_name.to_string());
                response
            }
            Err(err) => {
                warn!(gateway = gateway_name, ?err, "status check failed");
                PaymentResponse::declined("gateway_unreachable", err.to_string())
            }
        }
    }

    /// Routed webhook verification; `None` covers both an unknown gateway and
    /// a bad signature.
    pub fn verify_webhook(
        &self,
        gateway_name: &str,
        payload: &[u8],
        signature: &str,
    ) -> Option<WebhookEvent> {
        self.gateway(gateway_name)?.verify_webhook(payload, signature)
    }
}
