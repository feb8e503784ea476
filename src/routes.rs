use axum::{
    routing::{get, post},
    Router,
};

use crate::api;

pub fn api_routes() -> Router {
    Router::new()
        .route(
            "/api/invoices",
            get(api::list_invoices).post(api::create_invoice),
        )
        .route(
            "/api/invoices/:id",
            get(api::get_invoice).patch(api::update_invoice),
        )
        .route("/api/invoices/:id/send", post(api::send_invoice))
        .route("/api/invoices/:id/pay", post(api::pay_invoice))
        .route("/api/invoices/:id/cancel", post(api::cancel_invoice))
        .route("/api/payments", post(api::process_payment))
        .route("/api/webhooks/:gateway", post(api::gateway_webhook))
        .route("/api/billing/run-schedules", post(api::run_schedules))
        .route("/api/billing/run-dunning", post(api::run_dunning))
}
