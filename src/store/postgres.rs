use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    BillingSchedule, DunningEvent, DunningStatus, Invoice, InvoiceStatus, LineItem, Metadata,
    ScheduleStatus, Subscription, SubscriptionStatus,
};

use super::{BillingStore, InvoiceFilter, SubscriptionDirectory};

/// Postgres-backed store. Conditional transitions lean on
/// `UPDATE ... WHERE status = $expected RETURNING *` so the database, not the
/// process, is the serialization point; the invoice counter is a single
/// `ON CONFLICT DO UPDATE ... RETURNING` row per calendar year.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn parse<T: std::str::FromStr<Err = String>>(value: String) -> AppResult<T> {
    value.parse().map_err(AppError::Message)
}

fn decode_items(value: serde_json::Value) -> AppResult<Vec<LineItem>> {
    serde_json::from_value(value)
        .map_err(|err| AppError::Message(format!("malformed invoice line items: {err}")))
}

fn decode_metadata(value: serde_json::Value) -> AppResult<Metadata> {
    serde_json::from_value(value)
        .map_err(|err| AppError::Message(format!("malformed metadata map: {err}")))
}

fn invoice_from_row(row: &PgRow) -> AppResult<Invoice> {
    Ok(Invoice {
        id: row.get("id"),
        number: row.get("number"),
        subscription_id: row.get("subscription_id"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        description: row.get("description"),
        items: decode_items(row.get("items"))?,
        tax_cents: row.get("tax_cents"),
        total_cents: row.get("total_cents"),
        due_date: row.get("due_date"),
        status: parse(row.get::<String, _>("status"))?,
        paid_at: row.get("paid_at"),
        payment_reference: row.get("payment_reference"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn event_from_row(row: &PgRow) -> AppResult<DunningEvent> {
    Ok(DunningEvent {
        id: row.get("id"),
        subscription_id: row.get("subscription_id"),
        kind: parse(row.get::<String, _>("kind"))?,
        status: parse(row.get::<String, _>("status"))?,
        attempt: row.get("attempt"),
        scheduled_for: row.get("scheduled_for"),
        sent_at: row.get("sent_at"),
        resolved_at: row.get("resolved_at"),
        metadata: decode_metadata(row.get("metadata"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn schedule_from_row(row: &PgRow) -> AppResult<BillingSchedule> {
    Ok(BillingSchedule {
        id: row.get("id"),
        subscription_id: row.get("subscription_id"),
        next_billing_date: row.get("next_billing_date"),
        amount_cents: row.get("amount_cents"),
        currency: row.get("currency"),
        status: parse(row.get::<String, _>("status"))?,
        retry_count: row.get("retry_count"),
        max_retries: row.get("max_retries"),
        metadata: decode_metadata(row.get("metadata"))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn metadata_json(metadata: &Metadata) -> serde_json::Value {
    serde_json::to_value(metadata).unwrap_or_else(|_| serde_json::json!({}))
}

#[async_trait]
impl BillingStore for PgStore {
    async fn insert_invoice(&self, invoice: &Invoice) -> AppResult<()> {
        let items = serde_json::to_value(&invoice.items)
            .map_err(|err| AppError::Message(format!("cannot encode line items: {err}")))?;
        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, number, subscription_id, amount_cents, currency, description,
                items, tax_cents, total_cents, due_date, status, paid_at,
                payment_reference, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(invoice.id)
        .bind(&invoice.number)
        .bind(invoice.subscription_id)
        .bind(invoice.amount_cents)
        .bind(&invoice.currency)
        .bind(&invoice.description)
        .bind(items)
        .bind(invoice.tax_cents)
        .bind(invoice.total_cents)
        .bind(invoice.due_date)
        .bind(invoice.status.as_str())
        .bind(invoice.paid_at)
        .bind(&invoice.payment_reference)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn invoice(&self, id: Uuid) -> AppResult<Option<Invoice>> {
        let row = sqlx::query("SELECT * FROM invoices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    async fn update_invoice(&self, invoice: &Invoice) -> AppResult<()> {
        let items = serde_json::to_value(&invoice.items)
            .map_err(|err| AppError::Message(format!("cannot encode line items: {err}")))?;
        let result = sqlx::query(
            r#"
            UPDATE invoices SET
                description = $2,
                items = $3,
                amount_cents = $4,
                tax_cents = $5,
                total_cents = $6,
                due_date = $7,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(invoice.id)
        .bind(&invoice.description)
        .bind(items)
        .bind(invoice.amount_cents)
        .bind(invoice.tax_cents)
        .bind(invoice.total_cents)
        .bind(invoice.due_date)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn list_invoices(&self, filter: &InvoiceFilter) -> AppResult<Vec<Invoice>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM invoices
            WHERE ($1::uuid IS NULL OR subscription_id = $1)
              AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at ASC, number ASC
            "#,
        )
        .bind(filter.subscription_id)
        .bind(filter.status.map(|status| status.as_str()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invoice_from_row).collect()
    }

    async fn next_invoice_sequence(&self, year: i32) -> AppResult<i64> {
        let seq: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO invoice_counters (year, seq) VALUES ($1, 1)
            ON CONFLICT (year)
            DO UPDATE SET seq = invoice_counters.seq + 1
            RETURNING seq
            "#,
        )
        .bind(year)
        .fetch_one(&self.pool)
        .await?;
        Ok(seq)
    }

    async fn transition_invoice(
        &self,
        id: Uuid,
        expected: &[InvoiceStatus],
        next: InvoiceStatus,
        paid: Option<(String, DateTime<Utc>)>,
    ) -> AppResult<Option<Invoice>> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let (reference, paid_at) = match paid {
            Some((reference, paid_at)) => (Some(reference), Some(paid_at)),
            None => (None, None),
        };
        let row = sqlx::query(
            r#"
            UPDATE invoices SET
                status = $2,
                payment_reference = COALESCE($3, payment_reference),
                paid_at = COALESCE($4, paid_at),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($5)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next.as_str())
        .bind(reference)
        .bind(paid_at)
        .bind(&expected)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(invoice_from_row).transpose()
    }

    async fn overdue_candidates(&self, now: DateTime<Utc>) -> AppResult<Vec<Invoice>> {
        let rows = sqlx::query(
            "SELECT * FROM invoices WHERE status = 'sent' AND due_date < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(invoice_from_row).collect()
    }

    async fn insert_dunning_event(&self, event: &DunningEvent) -> AppResult<()> {
        // Partial unique index on (subscription_id) WHERE status = 'pending'
        // backs the one-active-chain invariant.
        let result = sqlx::query(
            r#"
            INSERT INTO dunning_events (
                id, subscription_id, kind, status, attempt, scheduled_for,
                sent_at, resolved_at, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.id)
        .bind(event.subscription_id)
        .bind(event.kind.as_str())
        .bind(event.status.as_str())
        .bind(event.attempt)
        .bind(event.scheduled_for)
        .bind(event.sent_at)
        .bind(event.resolved_at)
        .bind(metadata_json(&event.metadata))
        .bind(event.created_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.constraint().is_some() => {
                Err(AppError::Conflict(format!(
                    "subscription {} already has a pending dunning event",
                    event.subscription_id
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn dunning_event(&self, id: Uuid) -> AppResult<Option<DunningEvent>> {
        let row = sqlx::query("SELECT * FROM dunning_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn due_dunning_events(&self, now: DateTime<Utc>) -> AppResult<Vec<DunningEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM dunning_events
            WHERE status = 'pending' AND scheduled_for <= $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn active_dunning_event(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Option<DunningEvent>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM dunning_events
            WHERE subscription_id = $1 AND status IN ('pending', 'sent')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn transition_dunning_event(
        &self,
        id: Uuid,
        expected: DunningStatus,
        next: DunningStatus,
        sent_at: Option<DateTime<Utc>>,
        resolved_at: Option<DateTime<Utc>>,
    ) -> AppResult<Option<DunningEvent>> {
        let row = sqlx::query(
            r#"
            UPDATE dunning_events SET
                status = $2,
                sent_at = COALESCE($3, sent_at),
                resolved_at = COALESCE($4, resolved_at),
                updated_at = NOW()
            WHERE id = $1 AND status = $5
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next.as_str())
        .bind(sent_at)
        .bind(resolved_at)
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(event_from_row).transpose()
    }

    async fn insert_schedule(&self, schedule: &BillingSchedule) -> AppResult<()> {
        // Partial unique index on (subscription_id) WHERE status IN
        // ('scheduled', 'processing') backs the one-open-schedule invariant.
        let result = sqlx::query(
            r#"
            INSERT INTO billing_schedules (
                id, subscription_id, next_billing_date, amount_cents, currency,
                status, retry_count, max_retries, metadata, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(schedule.id)
        .bind(schedule.subscription_id)
        .bind(schedule.next_billing_date)
        .bind(schedule.amount_cents)
        .bind(&schedule.currency)
        .bind(schedule.status.as_str())
        .bind(schedule.retry_count)
        .bind(schedule.max_retries)
        .bind(metadata_json(&schedule.metadata))
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.constraint().is_some() => {
                Err(AppError::Conflict(format!(
                    "subscription {} already has an open billing schedule",
                    schedule.subscription_id
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn schedule(&self, id: Uuid) -> AppResult<Option<BillingSchedule>> {
        let row = sqlx::query("SELECT * FROM billing_schedules WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn active_schedule(
        &self,
        subscription_id: Uuid,
    ) -> AppResult<Option<BillingSchedule>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM billing_schedules
            WHERE subscription_id = $1 AND status IN ('scheduled', 'processing')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }

    async fn due_schedules(&self, now: DateTime<Utc>) -> AppResult<Vec<BillingSchedule>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM billing_schedules
            WHERE status = 'scheduled' AND next_billing_date <= $1
            ORDER BY next_billing_date ASC
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(schedule_from_row).collect()
    }

    async fn transition_schedule(
        &self,
        id: Uuid,
        expected: ScheduleStatus,
        next: ScheduleStatus,
        increment_retry: bool,
    ) -> AppResult<Option<BillingSchedule>> {
        let row = sqlx::query(
            r#"
            UPDATE billing_schedules SET
                status = $2,
                retry_count = retry_count + $3,
                updated_at = NOW()
            WHERE id = $1 AND status = $4
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(next.as_str())
        .bind(if increment_retry { 1_i32 } else { 0_i32 })
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(schedule_from_row).transpose()
    }
}

#[async_trait]
impl SubscriptionDirectory for PgStore {
    async fn subscription(&self, id: Uuid) -> AppResult<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(Subscription {
            id: row.get("id"),
            customer_email: row.get("customer_email"),
            country: row.get("country"),
            currency: row.get("currency"),
            billing_cycle: parse(row.get::<String, _>("billing_cycle"))?,
            payment_method: parse(row.get::<String, _>("payment_method"))?,
            preferred_gateway: row.get("preferred_gateway"),
            tax_exempt: row.get("tax_exempt"),
            status: parse(row.get::<String, _>("status"))?,
        }))
    }

    async fn set_status(&self, id: Uuid, status: SubscriptionStatus) -> AppResult<()> {
        let result =
            sqlx::query("UPDATE subscriptions SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }
}
