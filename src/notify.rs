use async_trait::async_trait;
use tracing::info;

use crate::models::{Invoice, Subscription};

/// Notification collaborator. Fire-and-forget: callers log delivery failures
/// and never let them surface as billing failures.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_invoice_document(&self, invoice: &Invoice, document: &[u8]) -> anyhow::Result<()>;
    async fn send_payment_failed_notice(
        &self,
        subscription: &Subscription,
        details: &str,
    ) -> anyhow::Result<()>;
    async fn send_account_suspended_notice(
        &self,
        subscription: &Subscription,
        details: &str,
    ) -> anyhow::Result<()>;
    async fn send_account_reactivated_notice(
        &self,
        subscription: &Subscription,
        details: &str,
    ) -> anyhow::Result<()>;
}

/// Default sink: structured log lines. A mail/webhook transport slots in
/// behind the same trait.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_invoice_document(&self, invoice: &Invoice, document: &[u8]) -> anyhow::Result<()> {
        info!(
            invoice = %invoice.number,
            subscription = %invoice.subscription_id,
            bytes = document.len(),
            "invoice document dispatched"
        );
        Ok(())
    }

    async fn send_payment_failed_notice(
        &self,
        subscription: &Subscription,
        details: &str,
    ) -> anyhow::Result<()> {
        info!(
            subscription = %subscription.id,
            email = %subscription.customer_email,
            details,
            "payment failed notice dispatched"
        );
        Ok(())
    }

    async fn send_account_suspended_notice(
        &self,
        subscription: &Subscription,
        details: &str,
    ) -> anyhow::Result<()> {
        info!(
            subscription = %subscription.id,
            email = %subscription.customer_email,
            details,
            "account suspended notice dispatched"
        );
        Ok(())
    }

    async fn send_account_reactivated_notice(
        &self,
        subscription: &Subscription,
        details: &str,
    ) -> anyhow::Result<()> {
        info!(
            subscription = %subscription.id,
            email = %subscription.customer_email,
            details,
            "account reactivated notice dispatched"
        );
        Ok(())
    }
}
