use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::dunning::{DunningManager, DunningRunReport};
use crate::error::{AppError, AppResult};
use crate::gateway::{PaymentRequest, PaymentResponse, PaymentRouter};
use crate::invoices::{InvoiceManager, InvoicePatch, NewInvoice};
use crate::models::{Invoice, Metadata, PaymentMethod};
use crate::scheduler::{ScheduleProcessor, ScheduleRunReport};
use crate::store::InvoiceFilter;

/// Shared handler state, injected as an axum `Extension`.
#[derive(Clone)]
pub struct AppContext {
    pub invoices: InvoiceManager,
    pub router: Arc<PaymentRouter>,
    pub dunning: DunningManager,
    pub processor: ScheduleProcessor,
}

/// key: billing-api -> rest endpoints
pub async fn create_invoice(
    Extension(ctx): Extension<AppContext>,
    Json(payload): Json<NewInvoice>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(ctx.invoices.create_invoice(payload).await?))
}

pub async fn get_invoice(
    Extension(ctx): Extension<AppContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(ctx.invoices.get_invoice(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct InvoiceListQuery {
    pub subscription_id: Option<Uuid>,
    pub status: Option<String>,
}

pub async fn list_invoices(
    Extension(ctx): Extension<AppContext>,
    Query(query): Query<InvoiceListQuery>,
) -> AppResult<Json<Vec<Invoice>>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(AppError::Validation)?;
    let filter = InvoiceFilter {
        subscription_id: query.subscription_id,
        status,
    };
    Ok(Json(ctx.invoices.list_invoices(filter).await?))
}

pub async fn update_invoice(
    Extension(ctx): Extension<AppContext>,
    Path(id): Path<Uuid>,
    Json(patch): Json<InvoicePatch>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(ctx.invoices.update_invoice(id, patch).await?))
}

pub async fn send_invoice(
    Extension(ctx): Extension<AppContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(ctx.invoices.send_invoice(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct PayInvoiceRequest {
    pub payment_reference: String,
}

pub async fn pay_invoice(
    Extension(ctx): Extension<AppContext>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PayInvoiceRequest>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(
        ctx.invoices
            .mark_invoice_paid(id, &payload.payment_reference)
            .await?,
    ))
}

pub async fn cancel_invoice(
    Extension(ctx): Extension<AppContext>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Invoice>> {
    Ok(Json(ctx.invoices.cancel_invoice(id).await?))
}

/// Interactive checkout entry point; declines come back as a structured
/// response body, not an error status.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub amount_cents: i64,
    pub currency: String,
    pub method: PaymentMethod,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub preferred_gateway: Option<String>,
}

pub async fn process_payment(
    Extension(ctx): Extension<AppContext>,
    Json(payload): Json<CheckoutRequest>,
) -> AppResult<Json<PaymentResponse>> {
    if payload.amount_cents <= 0 {
        return Err(AppError::Validation("amount must be positive".into()));
    }
    let request = PaymentRequest {
        amount_cents: payload.amount_cents,
        currency: payload.currency,
        method: payload.method,
        description: payload.description,
        metadata: payload.metadata,
    };
    let response = ctx
        .router
        .process_payment(&request, payload.preferred_gateway.as_deref())
        .await;
    Ok(Json(response))
}

/// Inbound provider notification. The adapter owns signature verification; a
/// settled payment marks the referenced invoice paid and pre-empts any open
/// dunning chain.
pub async fn gateway_webhook(
    Extension(ctx): Extension<AppContext>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get("x-webhook-signature")
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::Unauthorized)?;

    let Some(event) = ctx.router.verify_webhook(&gateway, &body, signature) else {
        return Err(AppError::Unauthorized);
    };

    match event.event_type.as_str() {
        "payment.succeeded" | "payment.captured" => {
            let Some(invoice_id) = event.invoice_id else {
                warn!(gateway, event = %event.event_type, "webhook carries no invoice reference");
                return Ok(StatusCode::ACCEPTED);
            };
            let reference = event
                .transaction_id
                .unwrap_or_else(|| format!("webhook-{gateway}"));
            let invoice = ctx.invoices.mark_invoice_paid(invoice_id, &reference).await?;
            ctx.dunning.resolve_chain(invoice.subscription_id).await?;
            info!(gateway, invoice = %invoice.number, "invoice settled via webhook");
            Ok(StatusCode::ACCEPTED)
        }
        _ => Ok(StatusCode::ACCEPTED),
    }
}

pub async fn run_schedules(
    Extension(ctx): Extension<AppContext>,
) -> AppResult<Json<ScheduleRunReport>> {
    Ok(Json(ctx.processor.process_billing_schedules(Utc::now()).await?))
}

pub async fn run_dunning(
    Extension(ctx): Extension<AppContext>,
) -> AppResult<Json<DunningRunReport>> {
    Ok(Json(ctx.dunning.process_dunning_events(Utc::now()).await?))
}
