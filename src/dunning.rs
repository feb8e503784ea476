use std::sync::Arc;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};
use futures_util::{stream, StreamExt};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppResult;
use crate::gateway::{PaymentRequest, PaymentRouter};
use crate::invoices::InvoiceManager;
use crate::models::{
    DunningEvent, DunningKind, DunningStatus, Metadata, Subscription, SubscriptionStatus,
};
use crate::notify::Notifier;
use crate::store::{BillingStore, SubscriptionDirectory};

/// Outcome of one batch run; failures are per-event, never batch-aborting.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct DunningRunReport {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// key: dunning-manager -> retry/suspension/reactivation state machine
///
/// Chain discipline: processing stamps `sent_at` on the current event and
/// marks it Resolved when a successor takes over (or the chain terminates),
/// so at most one event per subscription is ever awaiting processing. A
/// processed suspension stays Sent because the chain remains open until the
/// account recovers.
#[derive(Clone)]
pub struct DunningManager {
    store: Arc<dyn BillingStore>,
    subscriptions: Arc<dyn SubscriptionDirectory>,
    router: Arc<PaymentRouter>,
    invoices: InvoiceManager,
    notifier: Arc<dyn Notifier>,
    max_retries: i32,
    suspension_delay_days: i64,
    batch_concurrency: usize,
}

impl DunningManager {
    pub fn new(
        store: Arc<dyn BillingStore>,
        subscriptions: Arc<dyn SubscriptionDirectory>,
        router: Arc<PaymentRouter>,
        invoices: InvoiceManager,
        notifier: Arc<dyn Notifier>,
        max_retries: i32,
        suspension_delay_days: i64,
        batch_concurrency: usize,
    ) -> Self {
        Self {
            store,
            subscriptions,
            router,
            invoices,
            notifier,
            max_retries,
            suspension_delay_days,
            batch_concurrency: batch_concurrency.max(1),
        }
    }

    /// Opens a dunning chain for a subscription after a failed collection.
    /// Returns `None` when a chain is already active; two chains per
    /// subscription never coexist.
    pub async fn open_chain(
        &self,
        subscription_id: Uuid,
        metadata: Metadata,
    ) -> AppResult<Option<DunningEvent>> {
        if let Some(active) = self.store.active_dunning_event(subscription_id).await? {
            info!(
                subscription = %subscription_id,
                event = %active.id,
                kind = active.kind.as_str(),
                "dunning chain already active, not opening another"
            );
            return Ok(None);
        }
        let event = DunningEvent::new(
            subscription_id,
            DunningKind::PaymentFailed,
            1,
            Utc::now(),
            metadata,
        );
        self.store.insert_dunning_event(&event).await?;
        Ok(Some(event))
    }

    /// Pre-empts the next scheduled step, e.g. after an out-of-band manual
    /// reactivation or a provider webhook settling the invoice.
    pub async fn resolve_chain(&self, subscription_id: Uuid) -> AppResult<Option<DunningEvent>> {
        let Some(active) = self.store.active_dunning_event(subscription_id).await? else {
            return Ok(None);
        };
        self.store
            .transition_dunning_event(
                active.id,
                active.status,
                DunningStatus::Resolved,
                None,
                Some(Utc::now()),
            )
            .await
    }

    /// Batch entry point, driven by the external scheduler. Items run under
    /// bounded concurrency and are isolated: one event's failure marks that
    /// event Failed and never blocks its siblings.
    pub async fn process_dunning_events(&self, now: DateTime<Utc>) -> AppResult<DunningRunReport> {
        let due = self.store.due_dunning_events(now).await?;
        if due.is_empty() {
            return Ok(DunningRunReport::default());
        }

        let results: Vec<EventOutcome> = stream::iter(due)
            .map(|event| {
                let manager = self.clone();
                async move { manager.process_one(event, now).await }
            })
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await;

        let mut report = DunningRunReport::default();
        for outcome in results {
            match outcome {
                EventOutcome::Processed => report.processed += 1,
                EventOutcome::Skipped => report.skipped += 1,
                EventOutcome::Failed => report.failed += 1,
            }
        }
        Ok(report)
    }

    async fn process_one(&self, event: DunningEvent, now: DateTime<Utc>) -> EventOutcome {
        // Re-check under the current state: an out-of-band resolution may
        // have pre-empted this step since the due query ran.
        let current = match self.store.dunning_event(event.id).await {
            Ok(Some(current)) => current,
            Ok(None) => return EventOutcome::Skipped,
            Err(err) => {
                error!(event = %event.id, ?err, "failed to reload dunning event");
                return EventOutcome::Failed;
            }
        };
        if current.status != DunningStatus::Pending {
            return EventOutcome::Skipped;
        }

        match self.handle_event(&current, now).await {
            Ok(()) => EventOutcome::Processed,
            Err(err) => {
                error!(
                    event = %current.id,
                    subscription = %current.subscription_id,
                    kind = current.kind.as_str(),
                    ?err,
                    "dunning event processing failed"
                );
                if let Err(err) = self
                    .store
                    .transition_dunning_event(
                        current.id,
                        DunningStatus::Pending,
                        DunningStatus::Failed,
                        None,
                        None,
                    )
                    .await
                {
                    error!(event = %current.id, ?err, "could not mark dunning event failed");
                }
                EventOutcome::Failed
            }
        }
    }

    async fn handle_event(&self, event: &DunningEvent, now: DateTime<Utc>) -> anyhow::Result<()> {
        let subscription = self
            .subscriptions
            .subscription(event.subscription_id)
            .await
            .context("loading subscription")?
            .ok_or_else(|| anyhow!("subscription {} not found", event.subscription_id))?;

        match event.kind {
            DunningKind::PaymentFailed => self.on_payment_failed(event, &subscription, now).await,
            DunningKind::PaymentRetry => self.on_payment_retry(event, &subscription, now).await,
            DunningKind::AccountSuspended => self.on_suspended(event, &subscription, now).await,
            DunningKind::AccountReactivated => self.on_reactivated(event, &subscription, now).await,
        }
    }

    /// Retry attempts 1..=max back off linearly (2, 4, 6 days); the attempt
    /// after the last retry escalates to suspension instead.
    async fn on_payment_failed(
        &self,
        event: &DunningEvent,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        if let Err(err) = self
            .notifier
            .send_payment_failed_notice(
                subscription,
                &format!("payment attempt {} failed", event.attempt),
            )
            .await
        {
            warn!(subscription = %subscription.id, ?err, "payment failed notice not delivered");
        }

        let successor = if event.attempt <= self.max_retries {
            DunningEvent::new(
                event.subscription_id,
                DunningKind::PaymentRetry,
                event.attempt,
                now + Duration::days(2 * event.attempt as i64),
                event.metadata.clone(),
            )
        } else {
            DunningEvent::new(
                event.subscription_id,
                DunningKind::AccountSuspended,
                event.attempt,
                now + Duration::days(self.suspension_delay_days),
                event.metadata.clone(),
            )
        };
        self.advance_chain(event, successor, now).await
    }

    async fn on_payment_retry(
        &self,
        event: &DunningEvent,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let invoice_id = event
            .metadata
            .get("invoice_id")
            .and_then(|value| value.parse::<Uuid>().ok())
            .ok_or_else(|| anyhow!("dunning event {} carries no invoice_id", event.id))?;
        let invoice = self
            .invoices
            .get_invoice(invoice_id)
            .await
            .context("loading invoice for retry")?;

        let request = PaymentRequest {
            amount_cents: invoice.total_cents,
            currency: invoice.currency.clone(),
            method: subscription.payment_method,
            description: format!("retry {} for invoice {}", event.attempt, invoice.number),
            metadata: event.metadata.clone(),
        };
        let response = self
            .router
            .process_payment(&request, subscription.preferred_gateway.as_deref())
            .await;

        if response.success {
            let reference = response
                .transaction_id
                .unwrap_or_else(|| format!("dunning-{}", event.id));
            self.invoices
                .mark_invoice_paid(invoice_id, &reference)
                .await
                .context("marking recovered invoice paid")?;
            info!(
                subscription = %subscription.id,
                invoice = %invoice.number,
                attempt = event.attempt,
                "payment recovered during dunning"
            );
            let successor = DunningEvent::new(
                event.subscription_id,
                DunningKind::AccountReactivated,
                event.attempt,
                now,
                event.metadata.clone(),
            );
            self.advance_chain(event, successor, now).await
        } else {
            info!(
                subscription = %subscription.id,
                invoice = %invoice.number,
                attempt = event.attempt,
                error = response.error.as_ref().map(|e| e.code.as_str()).unwrap_or(""),
                "retry payment failed"
            );
            let successor = DunningEvent::new(
                event.subscription_id,
                DunningKind::PaymentFailed,
                event.attempt + 1,
                now,
                event.metadata.clone(),
            );
            self.advance_chain(event, successor, now).await
        }
    }

    async fn on_suspended(
        &self,
        event: &DunningEvent,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.subscriptions
            .set_status(subscription.id, SubscriptionStatus::PastDue)
            .await
            .context("suspending subscription")?;
        if let Err(err) = self
            .notifier
            .send_account_suspended_notice(subscription, "payment retries exhausted")
            .await
        {
            warn!(subscription = %subscription.id, ?err, "suspension notice not delivered");
        }
        // Chain stays open (Sent) until the account recovers.
        self.store
            .transition_dunning_event(
                event.id,
                DunningStatus::Pending,
                DunningStatus::Sent,
                Some(now),
                None,
            )
            .await?;
        Ok(())
    }

    async fn on_reactivated(
        &self,
        event: &DunningEvent,
        subscription: &Subscription,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.subscriptions
            .set_status(subscription.id, SubscriptionStatus::Active)
            .await
            .context("reactivating subscription")?;
        if let Err(err) = self
            .notifier
            .send_account_reactivated_notice(subscription, "payment recovered")
            .await
        {
            warn!(subscription = %subscription.id, ?err, "reactivation notice not delivered");
        }
        self.store
            .transition_dunning_event(
                event.id,
                DunningStatus::Pending,
                DunningStatus::Resolved,
                Some(now),
                Some(now),
            )
            .await?;
        Ok(())
    }

    /// Resolves the processed event, then installs its successor as the
    /// single pending step of the chain.
    async fn advance_chain(
        &self,
        current: &DunningEvent,
        successor: DunningEvent,
        now: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        self.store
            .transition_dunning_event(
                current.id,
                DunningStatus::Pending,
                DunningStatus::Resolved,
                Some(now),
                Some(now),
            )
            .await?;
        self.store
            .insert_dunning_event(&successor)
            .await
            .context("scheduling successor dunning event")?;
        Ok(())
    }
}

enum EventOutcome {
    Processed,
    Skipped,
    Failed,
}
