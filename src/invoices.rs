use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Invoice, InvoiceStatus, LineItem, SubscriptionStatus};
use crate::notify::Notifier;
use crate::render::InvoiceRenderer;
use crate::store::{BillingStore, InvoiceFilter, SubscriptionDirectory};
use crate::tax::TaxCalculator;

#[derive(Debug, Clone, Deserialize)]
pub struct NewLineItem {
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewInvoice {
    pub subscription_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub items: Vec<NewLineItem>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct InvoicePatch {
    pub description: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub items: Option<Vec<NewLineItem>>,
}

/// key: invoice-manager -> invoice lifecycle owner
#[derive(Clone)]
pub struct InvoiceManager {
    store: Arc<dyn BillingStore>,
    subscriptions: Arc<dyn SubscriptionDirectory>,
    notifier: Arc<dyn Notifier>,
    renderer: Arc<dyn InvoiceRenderer>,
    tax: TaxCalculator,
}

impl InvoiceManager {
    pub fn new(
        store: Arc<dyn BillingStore>,
        subscriptions: Arc<dyn SubscriptionDirectory>,
        notifier: Arc<dyn Notifier>,
        renderer: Arc<dyn InvoiceRenderer>,
    ) -> Self {
        Self {
            store,
            subscriptions,
            notifier,
            renderer,
            tax: TaxCalculator::new(),
        }
    }

    /// Creates a Draft invoice with the next sequential number for the
    /// current calendar year. Numbers are never reused, even across
    /// concurrent creators; the store's counter is the serialization point.
    pub async fn create_invoice(&self, input: NewInvoice) -> AppResult<Invoice> {
        if input.amount_cents <= 0 {
            return Err(AppError::Validation(
                "invoice amount must be positive".into(),
            ));
        }
        if input.currency.trim().len() != 3 {
            return Err(AppError::Validation(format!(
                "invalid currency code `{}`",
                input.currency
            )));
        }
        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            if item.quantity <= 0 || item.unit_price_cents <= 0 {
                return Err(AppError::Validation(format!(
                    "line item `{}` must have positive quantity and unit price",
                    item.description
                )));
            }
            items.push(LineItem {
                description: item.description.clone(),
                quantity: item.quantity,
                unit_price_cents: item.unit_price_cents,
                total_cents: item.quantity * item.unit_price_cents,
            });
        }

        let subscription = self
            .subscriptions
            .subscription(input.subscription_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let now = Utc::now();
        let seq = self.store.next_invoice_sequence(now.year()).await?;
        let number = format!("INV-{}-{:06}", now.year(), seq);

        let assessment = self.tax.calculate(
            input.amount_cents,
            &input.currency,
            &subscription.country,
            subscription.tax_exempt,
        );

        let invoice = Invoice {
            id: Uuid::new_v4(),
            number,
            subscription_id: input.subscription_id,
            amount_cents: input.amount_cents,
            currency: input.currency,
            description: input.description,
            items,
            tax_cents: assessment.tax_cents,
            total_cents: assessment.total_cents,
            due_date: input.due_date,
            status: InvoiceStatus::Draft,
            paid_at: None,
            payment_reference: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_invoice(&invoice).await?;
        Ok(invoice)
    }

    pub async fn get_invoice(&self, id: Uuid) -> AppResult<Invoice> {
        self.store.invoice(id).await?.ok_or(AppError::NotFound)
    }

    pub async fn list_invoices(&self, filter: InvoiceFilter) -> AppResult<Vec<Invoice>> {
        self.store.list_invoices(&filter).await
    }

    /// Renders and dispatches the invoice document, then moves a Draft to
    /// Sent. Delivery problems are logged, never surfaced: the notifier is a
    /// fire-and-forget collaborator.
    pub async fn send_invoice(&self, id: Uuid) -> AppResult<Invoice> {
        let invoice = self.get_invoice(id).await?;
        if invoice.status.is_terminal() {
            return Err(AppError::Validation(format!(
                "invoice {} is {} and cannot be sent",
                invoice.number, invoice.status
            )));
        }

        match self.renderer.render(&invoice) {
            Ok(document) => {
                if let Err(err) = self
                    .notifier
                    .send_invoice_document(&invoice, &document)
                    .await
                {
                    warn!(invoice = %invoice.number, ?err, "invoice document delivery failed");
                }
            }
            Err(err) => {
                warn!(invoice = %invoice.number, ?err, "invoice rendering failed");
            }
        }

        if invoice.status == InvoiceStatus::Draft {
            if let Some(updated) = self
                .store
                .transition_invoice(id, &[InvoiceStatus::Draft], InvoiceStatus::Sent, None)
                .await?
            {
                return Ok(updated);
            }
        }
        // Already Sent or Overdue: re-sending keeps the current status.
        self.get_invoice(id).await
    }

    /// Idempotent: marking an already-Paid invoice is a no-op success that
    /// keeps the original `paid_at` and triggers no second side effect.
    pub async fn mark_invoice_paid(
        &self,
        id: Uuid,
        payment_reference: &str,
    ) -> AppResult<Invoice> {
        let invoice = self.get_invoice(id).await?;
        if invoice.status == InvoiceStatus::Paid {
            return Ok(invoice);
        }
        if invoice.status == InvoiceStatus::Cancelled {
            return Err(AppError::Validation(format!(
                "invoice {} is cancelled and cannot be paid",
                invoice.number
            )));
        }

        let updated = self
            .store
            .transition_invoice(
                id,
                &[
                    InvoiceStatus::Draft,
                    InvoiceStatus::Sent,
                    InvoiceStatus::Overdue,
                ],
                InvoiceStatus::Paid,
                Some((payment_reference.to_string(), Utc::now())),
            )
            .await?;

        match updated {
            Some(invoice) => {
                self.subscriptions
                    .set_status(invoice.subscription_id, SubscriptionStatus::Active)
                    .await?;
                Ok(invoice)
            }
            // Lost the race to another marker; the invoice is Paid already.
            None => self.get_invoice(id).await,
        }
    }

    pub async fn update_invoice(&self, id: Uuid, patch: InvoicePatch) -> AppResult<Invoice> {
        let mut invoice = self.get_invoice(id).await?;
        if invoice.status.is_terminal() {
            return Err(AppError::Validation(format!(
                "invoice {} is {} and cannot be updated",
                invoice.number, invoice.status
            )));
        }

        if let Some(description) = patch.description {
            invoice.description = description;
        }
        if let Some(due_date) = patch.due_date {
            invoice.due_date = due_date;
        }
        if let Some(items) = patch.items {
            let mut rebuilt = Vec::with_capacity(items.len());
            for item in &items {
                if item.quantity <= 0 || item.unit_price_cents <= 0 {
                    return Err(AppError::Validation(format!(
                        "line item `{}` must have positive quantity and unit price",
                        item.description
                    )));
                }
                rebuilt.push(LineItem {
                    description: item.description.clone(),
                    quantity: item.quantity,
                    unit_price_cents: item.unit_price_cents,
                    total_cents: item.quantity * item.unit_price_cents,
                });
            }
            invoice.amount_cents = rebuilt.iter().map(|item| item.total_cents).sum();
            invoice.items = rebuilt;

            let subscription = self
                .subscriptions
                .subscription(invoice.subscription_id)
                .await?
                .ok_or(AppError::NotFound)?;
            let assessment = self.tax.calculate(
                invoice.amount_cents,
                &invoice.currency,
                &subscription.country,
                subscription.tax_exempt,
            );
            invoice.tax_cents = assessment.tax_cents;
            invoice.total_cents = assessment.total_cents;
        }

        self.store.update_invoice(&invoice).await?;
        self.get_invoice(id).await
    }

    /// Cancellation is a terminal status, not removal.
    pub async fn cancel_invoice(&self, id: Uuid) -> AppResult<Invoice> {
        let invoice = self.get_invoice(id).await?;
        match invoice.status {
            InvoiceStatus::Cancelled => Ok(invoice),
            InvoiceStatus::Paid => Err(AppError::Validation(format!(
                "invoice {} is paid and cannot be cancelled",
                invoice.number
            ))),
            _ => {
                let updated = self
                    .store
                    .transition_invoice(
                        id,
                        &[
                            InvoiceStatus::Draft,
                            InvoiceStatus::Sent,
                            InvoiceStatus::Overdue,
                        ],
                        InvoiceStatus::Cancelled,
                        None,
                    )
                    .await?;
                match updated {
                    Some(invoice) => Ok(invoice),
                    None => self.get_invoice(id).await,
                }
            }
        }
    }

    /// Time-based `Sent -> Overdue` sweep, driven by the periodic tick.
    pub async fn mark_overdue_invoices(&self, now: DateTime<Utc>) -> AppResult<usize> {
        let candidates = self.store.overdue_candidates(now).await?;
        let mut flipped = 0;
        for invoice in candidates {
            if self
                .store
                .transition_invoice(
                    invoice.id,
                    &[InvoiceStatus::Sent],
                    InvoiceStatus::Overdue,
                    None,
                )
                .await?
                .is_some()
            {
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}
