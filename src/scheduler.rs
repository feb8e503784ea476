use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use futures_util::{stream, StreamExt};
use tokio::time::{self, Duration as TokioDuration};
use tracing::{error, info, warn};

use crate::config;
use crate::dunning::DunningManager;
use crate::error::AppResult;
use crate::gateway::{PaymentRequest, PaymentRouter};
use crate::invoices::{InvoiceManager, NewInvoice, NewLineItem};
use crate::models::{BillingSchedule, Metadata, ScheduleStatus};
use crate::store::{BillingStore, SubscriptionDirectory};

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ScheduleRunReport {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// key: billing-schedule-processor -> recurring billing driver
#[derive(Clone)]
pub struct ScheduleProcessor {
    store: Arc<dyn BillingStore>,
    subscriptions: Arc<dyn SubscriptionDirectory>,
    invoices: InvoiceManager,
    router: Arc<PaymentRouter>,
    dunning: DunningManager,
    invoice_due_days: i64,
    batch_concurrency: usize,
}

impl ScheduleProcessor {
    pub fn new(
        store: Arc<dyn BillingStore>,
        subscriptions: Arc<dyn SubscriptionDirectory>,
        invoices: InvoiceManager,
        router: Arc<PaymentRouter>,
        dunning: DunningManager,
        invoice_due_days: i64,
        batch_concurrency: usize,
    ) -> Self {
        Self {
            store,
            subscriptions,
            invoices,
            router,
            dunning,
            invoice_due_days,
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    /// Batch entry point: bill every schedule that has come due. Items are
    /// processed under bounded concurrency and isolated from each other; a
    /// failing schedule ends up Failed with a dunning chain opened, and its
    /// siblings still run to a terminal state in the same batch.
    pub async fn process_billing_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> AppResult<ScheduleRunReport> {
        let due = self.store.due_schedules(now).await?;
        if due.is_empty() {
            return Ok(ScheduleRunReport::default());
        }

        let results: Vec<ScheduleOutcome> = stream::iter(due)
            .map(|schedule| {
                let processor = self.clone();
                async move { processor.process_one(schedule, now).await }
            })
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await;

        let mut report = ScheduleRunReport::default();
        for outcome in results {
            match outcome {
                ScheduleOutcome::Completed => report.completed += 1,
                ScheduleOutcome::Failed => report.failed += 1,
                ScheduleOutcome::Skipped => report.skipped += 1,
            }
        }
        Ok(report)
    }

    async fn process_one(&self, schedule: BillingSchedule, now: DateTime<Utc>) -> ScheduleOutcome {
        // Conditional claim; a sibling engine instance may have won the race.
        let claimed = match self
            .store
            .transition_schedule(
                schedule.id,
                ScheduleStatus::Scheduled,
                ScheduleStatus::Processing,
                false,
            )
            .await
        {
            Ok(Some(claimed)) => claimed,
            Ok(None) => return ScheduleOutcome::Skipped,
            Err(err) => {
                error!(schedule = %schedule.id, ?err, "could not claim billing schedule");
                return ScheduleOutcome::Skipped;
            }
        };

        match self.bill_cycle(&claimed, now).await {
            Ok(true) => ScheduleOutcome::Completed,
            Ok(false) => ScheduleOutcome::Failed,
            Err(err) => {
                error!(
                    schedule = %claimed.id,
                    subscription = %claimed.subscription_id,
                    ?err,
                    "billing cycle processing failed"
                );
                if let Err(err) = self
                    .store
                    .transition_schedule(
                        claimed.id,
                        ScheduleStatus::Processing,
                        ScheduleStatus::Failed,
                        true,
                    )
                    .await
                {
                    error!(schedule = %claimed.id, ?err, "could not mark schedule failed");
                }
                ScheduleOutcome::Failed
            }
        }
    }

    /// One cycle: invoice, collect, roll forward on success or hand off to
    /// dunning on a declined/failed collection. Returns Ok(false) for the
    /// normal payment-failure path.
    async fn bill_cycle(
        &self,
        schedule: &BillingSchedule,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let subscription = self
            .subscriptions
            .subscription(schedule.subscription_id)
            .await
            .context("loading subscription")?
            .ok_or_else(|| anyhow!("subscription {} not found", schedule.subscription_id))?;

        let description = format!(
            "Subscription renewal ({})",
            subscription.billing_cycle.as_str()
        );
        let invoice = self
            .invoices
            .create_invoice(NewInvoice {
                subscription_id: schedule.subscription_id,
                amount_cents: schedule.amount_cents,
                currency: schedule.currency.clone(),
                description: description.clone(),
                due_date: now + Duration::days(self.invoice_due_days),
                items: vec![NewLineItem {
                    description,
                    quantity: 1,
                    unit_price_cents: schedule.amount_cents,
                }],
            })
            .await
            .context("creating cycle invoice")?;

        let mut metadata = Metadata::new();
        metadata.insert("invoice_id".into(), invoice.id.to_string());
        metadata.insert("schedule_id".into(), schedule.id.to_string());

        let request = PaymentRequest {
            amount_cents: invoice.total_cents,
            currency: invoice.currency.clone(),
            method: subscription.payment_method,
            description: format!("collection for invoice {}", invoice.number),
            metadata: metadata.clone(),
        };
        let response = self
            .router
            .process_payment(&request, subscription.preferred_gateway.as_deref())
            .await;

        if response.success {
            let reference = response
                .transaction_id
                .unwrap_or_else(|| format!("schedule-{}", schedule.id));
            self.invoices
                .mark_invoice_paid(invoice.id, &reference)
                .await
                .context("marking cycle invoice paid")?;
            self.store
                .transition_schedule(
                    schedule.id,
                    ScheduleStatus::Processing,
                    ScheduleStatus::Completed,
                    false,
                )
                .await?;

            // Next occurrence is anchored on the previous scheduled date, not
            // on "now", so late runs do not drift the cycle.
            let successor = BillingSchedule::new(
                schedule.subscription_id,
                subscription.billing_cycle.advance(schedule.next_billing_date),
                schedule.amount_cents,
                &schedule.currency,
                schedule.max_retries,
            );
            self.store
                .insert_schedule(&successor)
                .await
                .context("scheduling next billing cycle")?;
            info!(
                subscription = %schedule.subscription_id,
                invoice = %invoice.number,
                next = %successor.next_billing_date,
                "billing cycle completed"
            );
            Ok(true)
        } else {
            self.store
                .transition_schedule(
                    schedule.id,
                    ScheduleStatus::Processing,
                    ScheduleStatus::Failed,
                    true,
                )
                .await?;
            warn!(
                subscription = %schedule.subscription_id,
                invoice = %invoice.number,
                error = response.error.as_ref().map(|e| e.code.as_str()).unwrap_or(""),
                "cycle collection failed, handing off to dunning"
            );
            self.dunning
                .open_chain(schedule.subscription_id, metadata)
                .await
                .context("opening dunning chain")?;
            Ok(false)
        }
    }
}

enum ScheduleOutcome {
    Completed,
    Failed,
    Skipped,
}

/// key: billing-tick -> periodic batch driver
///
/// The engine has no timers of its own; due-ness is a pure function of "now"
/// and persisted timestamps, so a restart resumes cleanly from the store.
pub fn spawn(processor: ScheduleProcessor, dunning: DunningManager, invoices: InvoiceManager) {
    let interval = TokioDuration::from_secs(*config::BILLING_TICK_INTERVAL_SECS);
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            match processor.process_billing_schedules(now).await {
                Ok(report) => info!(
                    completed = report.completed,
                    failed = report.failed,
                    skipped = report.skipped,
                    "billing schedule tick finished"
                ),
                Err(err) => warn!(?err, "billing schedule tick failed"),
            }
            match dunning.process_dunning_events(now).await {
                Ok(report) => info!(
                    processed = report.processed,
                    failed = report.failed,
                    skipped = report.skipped,
                    "dunning tick finished"
                ),
                Err(err) => warn!(?err, "dunning tick failed"),
            }
            match invoices.mark_overdue_invoices(now).await {
                Ok(flipped) if flipped > 0 => info!(flipped, "invoices marked overdue"),
                Ok(_) => {}
                Err(err) => warn!(?err, "overdue sweep failed"),
            }
        }
    });
}
