pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{
    BillingSchedule, DunningEvent, DunningStatus, Invoice, InvoiceStatus, ScheduleStatus,
    Subscription, SubscriptionStatus,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub subscription_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
}

/// Persistence collaborator for the billing engine. All `transition_*`
/// operations are conditional writes: they apply only when the record is still
/// in the expected state and return `None` when the precondition no longer
/// holds, so concurrent engine instances cannot double-apply a step.
#[async_trait]
pub trait BillingStore: Send + Sync {
    // -- invoices --
    async fn insert_invoice(&self, invoice: &Invoice) -> AppResult<()>;
    async fn invoice(&self, id: Uuid) -> AppResult<Option<Invoice>>;
    async fn update_invoice(&self, invoice: &Invoice) -> AppResult<()>;
    async fn list_invoices(&self, filter: &InvoiceFilter) -> AppResult<Vec<Invoice>>;
    /// Next value of the per-calendar-year invoice counter. Atomic: two
    /// concurrent callers never observe the same value.
    async fn next_invoice_sequence(&self, year: i32) -> AppResult<i64>;
    async fn transition_invoice(
        &self,
        id: Uuid,
        expected: &[InvoiceStatus],
        next: InvoiceStatus,
        paid: Option<(String, DateTime<Utc>)>,
    ) -> AppResult<Option<Invoice>>;
    /// Sent invoices whose due date has passed, for the overdue sweep.
    async fn overdue_candidates(&self, now: DateTime<Utc>) -> AppResult<Vec<Invoice>>;

    // -- dunning events --
    async fn insert_dunning_event(&self, event: &DunningEvent) -> AppResult<()>;
    async fn dunning_event(&self, id: Uuid) -> AppResult<Option<DunningEvent>>;
    async fn due_dunning_events(&self, now: DateTime<Utc>) -> AppResult<Vec<DunningEvent>>;
    /// The event currently holding a subscription's chain open, if any.
    async fn active_dunning_event(&self, subscription_id: Uuid)
        -> AppResult<Option<DunningEvent>>;
    async fn transition_dunning_event(
        &self,
        id: Uuid,
        expected: DunningStatus,
        next: DunningStatus,
        sent_at: Option<DateTime<Utc>>,
        resolved_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<DunningEvent>>;

    // -- billing schedules --
    async fn insert_schedule(&self, schedule: &BillingSchedule) -> AppResult<()>;
    async fn schedule(&self, id: Uuid) -> AppResult<Option<BillingSchedule>>;
    async fn active_schedule(&self, subscription_id: Uuid)
        -> AppResult<Option<BillingSchedule>>;
    async fn due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<BillingSchedule>>;
    async fn transition_schedule(
        &self,
        id: Uuid,
        expected: ScheduleStatus,
        next: ScheduleStatus,
        increment_retry: bool,
    ) -> AppResult<Option<BillingSchedule>>;
}

/// Subscription collaborator. The engine reads subscriber billing context and
/// writes nothing but the status field.
#[async_trait]
pub trait SubscriptionDirectory: Send + Sync {
    async fn subscription(&self, id: Uuid) -> AppResult<Option<Subscription>>;
    async fn set_status(&self, id: Uuid, status: SubscriptionStatus) -> AppResult<()>;
}
