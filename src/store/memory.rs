use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    BillingSchedule, DunningEvent, DunningStatus, Invoice, InvoiceStatus, ScheduleStatus,
    Subscription, SubscriptionStatus,
};

use super::{BillingStore, InvoiceFilter, SubscriptionDirectory};

#[derive(Default)]
struct Tables {
    invoices: HashMap<Uuid, Invoice>,
    invoice_counters: HashMap<i32, i64>,
    dunning_events: HashMap<Uuid, DunningEvent>,
    schedules: HashMap<Uuid, BillingSchedule>,
    subscriptions: HashMap<Uuid, Subscription>,
}

/// In-memory store backing tests and local development. A single `RwLock`
/// around the tables gives the same conditional-write semantics the Postgres
/// store gets from `UPDATE ... WHERE status = $expected`.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_subscription(&self, subscription: Subscription) {
        let mut tables = self.tables.write().await;
        tables.subscriptions.insert(subscription.id, subscription);
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn insert_invoice(&self, invoice: &Invoice) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        if tables
            .invoices
            .values()
            .any(|existing| existing.number == invoice.number)
        {
            return Err(AppError::Conflict(format!(
                "invoice number {} already issued",
                invoice.number
            )));
        }
        tables.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn invoice(&self, id: Uuid) -> AppResult<Option<Invoice>> {
        let tables = self.tables.read().await;
        Ok(tables.invoices.get(&id).cloned())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        if !tables.invoices.contains_key(&invoice.id) {
            return Err(AppError::NotFound);
        }
        let mut updated = invoice.clone();
        updated.updated_at = Utc::now();
        tables.invoices.insert(invoice.id, updated);
        Ok(())
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> AppResult<Vec<Invoice>> {
        let tables = self.tables.read().await;
        let mut matches: Vec<Invoice> = tables
            .invoices
            .values()
            .filter(|invoice| {
                filter
                    .subscription_id
                    .map_or(true, |id| invoice.subscription_id == id)
                    && filter.status.map_or(true, |status| invoice.status == status)
            })
            .cloned()
            .collect();
        matches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.number.cmp(&b.number)));
        Ok(matches)
    }

    async fn next_invoice_sequence(&self, year: i32) -> AppResult<i64> {
        let mut tables = self.tables.write().await;
        let counter = tables.invoice_counters.entry(year).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn transition_invoice(
        &self,
        id: Uuid,
        expected: &[InvoiceStatus],
        next: InvoiceStatus,
        paid: Option<(String, DateTime<Utc>)>,
    ) -> AppResult<Option<Invoice>> {
        let mut tables = self.tables.write().await;
        let Some(invoice) = tables.invoices.get_mut(&id) else {
            return Ok(None);
        };
        if !expected.contains(&invoice.status) {
            return Ok(None);
        }
        invoice.status = next;
        if let Some((reference, paid_at)) = paid {
            invoice.payment_reference = Some(reference);
            invoice.paid_at = Some(paid_at);
        }
        invoice.updated_at = Utc::now();
        Ok(Some(invoice.clone()))
    }

    async fn overdue_candidates(&self, now: DateTime<Utc>) -> AppResult<Vec<Invoice>> {
        let tables = self.tables.read().await;
        Ok(tables
            .invoices
            .values()
            .filter(|invoice| invoice.status == InvoiceStatus::Sent && invoice.due_date < now)
            .cloned()
            .collect())
    }

    async fn insert_dunning_event(&self, event: &DunningEvent) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        if event.status == DunningStatus::Pending {
            let chain_open = tables.dunning_events.values().any(|existing| {
                existing.subscription_id == event.subscription_id
                    && existing.id != event.id
                    && existing.status == DunningStatus::Pending
            });
            if chain_open {
                return Err(AppError::Conflict(format!(
                    "subscription {} already has a pending dunning event",
                    event.subscription_id
                )));
            }
        }
        tables.dunning_events.insert(event.id, event.clone());
        Ok(())
    }

    async fn dunning_event(&self, id: Uuid) -> AppResult<Option<DunningEvent>> {
        let tables = self.tables.read().await;
        Ok(tables.dunning_events.get(&id).cloned())
    }

    async fn due_dunning_events(&self, now: DateTime<Utc>) -> AppResult<Vec<DunningEvent>> {
        let tables = self.tables.read().await;
        let mut due: Vec<DunningEvent> = tables
            .dunning_events
            .values()
            .filter(|event| event.status == DunningStatus::Pending && event.scheduled_for <= now)
            .cloned()
            .collect();
        due.sort_by_key(|event| event.created_at);
        Ok(due)
    }

    async fn active_dunning_event(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Option<DunningEvent>> {
        let tables = self.tables.read().await;
        Ok(tables
            .dunning_events
            .values()
            .filter(|event| event.subscription_id == subscription_id && event.is_active())
            .max_by_key(|event| event.created_at)
            .cloned())
    }

    async fn transition_dunning_event(
        &self,
        id: Uuid,
        expected: DunningStatus,
        next: DunningStatus,
        sent_at: Option<DateTime<Utc>>,
        resolved_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<DunningEvent>> {
        let mut tables = self.tables.write().await;
        let Some(event) = tables.dunning_events.get_mut(&id) else {
            return Ok(None);
        };
        if event.status != expected {
            return Ok(None);
        }
        event.status = next;
        if sent_at.is_some() {
            event.sent_at = sent_at;
        }
        if resolved_at.is_some() {
            event.resolved_at = resolved_at;
        }
        event.updated_at = Utc::now();
        Ok(Some(event.clone()))
    }

    async fn insert_schedule(&self, schedule: &BillingSchedule) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let open = tables.schedules.values().any(|existing| {
            existing.subscription_id == schedule.subscription_id
                && existing.id != schedule.id
                && matches!(
                    existing.status,
                    ScheduleStatus::Scheduled | ScheduleStatus::Processing
                )
        });
        if open && schedule.status == ScheduleStatus::Scheduled {
            return Err(AppError::Conflict(format!(
                "subscription {} already has an open billing schedule",
                schedule.subscription_id
            )));
        }
        tables.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn schedule(&self, id: Uuid) -> AppResult<Option<BillingSchedule>> {
        let tables = self.tables.read().await;
        Ok(tables.schedules.get(&id).cloned())
    }

    async fn active_schedule(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Option<BillingSchedule>> {
        let tables = self.tables.read().await;
        Ok(tables
            .schedules
            .values()
            .filter(|schedule| {
                schedule.subscription_id == subscription_id
                    && matches!(
                        schedule.status,
                        ScheduleStatus::Scheduled | ScheduleStatus::Processing
                    )
            })
            .max_by_key(|schedule| schedule.created_at)
            .cloned())
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<BillingSchedule>> {
        let tables = self.tables.read().await;
        let mut due: Vec<BillingSchedule> = tables
            .schedules
            .values()
            .filter(|schedule| {
                schedule.status == ScheduleStatus::Scheduled && schedule.next_billing_date <= now
            })
            .cloned()
            .collect();
        due.sort_by_key(|schedule| schedule.next_billing_date);
        Ok(due)
    }

    async fn transition_schedule(
        &self,
        id: Uuid,
        expected: ScheduleStatus,
        next: ScheduleStatus,
        increment_retry: bool,
    ) -> AppResult<Option<BillingSchedule>> {
        let mut tables = self.tables.write().await;
        let Some(schedule) = tables.schedules.get_mut(&id) else {
            return Ok(None);
        };
        if schedule.status != expected {
            return Ok(None);
        }
        schedule.status = next;
        if increment_retry {
            schedule.retry_count += 1;
        }
        schedule.updated_at = Utc::now();
        Ok(Some(schedule.clone()))
    }
}

#[async_trait]
impl SubscriptionDirectory for MemoryStore {
    async fn subscription(&self, id: Uuid) -> AppResult<Option<Subscription>> {
        let tables = self.tables.read().await;
        Ok(tables.subscriptions.get(&id).cloned())
    }

    async fn set_status(&self, id: Uuid, status: SubscriptionStatus) -> AppResult<()> {
        let mut tables = self.tables.write().await;
        let subscription = tables.subscriptions.get_mut(&id).ok_or(AppError::NotFound)?;
        subscription.status = status;
        Ok(())
    }
}
