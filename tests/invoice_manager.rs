mod common;

use std::collections::HashSet;

use chrono::{Duration, Utc};
use uuid::Uuid;

use billingd::error::AppError;
use billingd::models::{InvoiceStatus, SubscriptionStatus};
use billingd::store::{InvoiceFilter, SubscriptionDirectory};

use common::{harness, renewal_invoice, seed_subscription, single_gateway, MockBehavior};

#[tokio::test]
async fn invoice_totals_reconcile_with_tax() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let subscription = seed_subscription(&h.store).await;

    let invoice = h
        .invoices
        .create_invoice(renewal_invoice(subscription.id, 10_000))
        .await
        .unwrap();

    // German subscriber: 19% VAT.
    assert_eq!(invoice.amount_cents, 10_000);
    assert_eq!(invoice.tax_cents, 1_900);
    assert_eq!(invoice.total_cents, invoice.amount_cents + invoice.tax_cents);
    assert_eq!(invoice.status, InvoiceStatus::Draft);
    assert!(invoice.number.starts_with(&format!("INV-{}-", Utc::now().format("%Y"))));
}

#[tokio::test]
async fn tax_exempt_subscriber_pays_no_tax() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let mut subscription = seed_subscription(&h.store).await;
    subscription.tax_exempt = true;
    h.store.put_subscription(subscription.clone()).await;

    let invoice = h
        .invoices
        .create_invoice(renewal_invoice(subscription.id, 10_000))
        .await
        .unwrap();

    assert_eq!(invoice.tax_cents, 0);
    assert_eq!(invoice.total_cents, 10_000);
}

#[tokio::test]
async fn invoice_numbers_are_unique_and_gapless_under_concurrency() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let subscription = seed_subscription(&h.store).await;

    let mut handles = Vec::new();
    for _ in 0..20 {
        let invoices = h.invoices.clone();
        let subscription_id = subscription.id;
        handles.push(tokio::spawn(async move {
            invoices
                .create_invoice(renewal_invoice(subscription_id, 1_000))
                .await
                .unwrap()
                .number
        }));
    }

    let mut numbers = HashSet::new();
    for handle in handles {
        numbers.insert(handle.await.unwrap());
    }

    assert_eq!(numbers.len(), 20, "no number may be issued twice");
    let year = Utc::now().format("%Y").to_string();
    for seq in 1..=20 {
        let expected = format!("INV-{year}-{seq:06}");
        assert!(numbers.contains(&expected), "missing {expected}");
    }
}

#[tokio::test]
async fn validation_rejects_non_positive_amounts() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let subscription = seed_subscription(&h.store).await;

    let mut input = renewal_invoice(subscription.id, 1_000);
    input.amount_cents = 0;
    assert!(matches!(
        h.invoices.create_invoice(input).await,
        Err(AppError::Validation(_))
    ));

    let mut input = renewal_invoice(subscription.id, 1_000);
    input.items[0].unit_price_cents = -5;
    assert!(matches!(
        h.invoices.create_invoice(input).await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn send_invoice_transitions_draft_and_dispatches_document() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let subscription = seed_subscription(&h.store).await;
    let invoice = h
        .invoices
        .create_invoice(renewal_invoice(subscription.id, 5_000))
        .await
        .unwrap();

    let sent = h.invoices.send_invoice(invoice.id).await.unwrap();
    assert_eq!(sent.status, InvoiceStatus::Sent);
    assert!(h
        .notifier
        .recorded()
        .contains(&format!("invoice:{}", invoice.number)));

    // Re-sending keeps the status.
    let resent = h.invoices.send_invoice(invoice.id).await.unwrap();
    assert_eq!(resent.status, InvoiceStatus::Sent);
}

#[tokio::test]
async fn send_missing_invoice_is_not_found() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    assert!(matches!(
        h.invoices.send_invoice(Uuid::new_v4()).await,
        Err(AppError::NotFound)
    ));
}

#[tokio::test]
async fn mark_paid_is_idempotent_and_reactivates_once() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let mut subscription = seed_subscription(&h.store).await;
    subscription.status = SubscriptionStatus::PastDue;
    h.store.put_subscription(subscription.clone()).await;

    let invoice = h
        .invoices
        .create_invoice(renewal_invoice(subscription.id, 5_000))
        .await
        .unwrap();

    let paid = h
        .invoices
        .mark_invoice_paid(invoice.id, "txn_1")
        .await
        .unwrap();
    assert_eq!(paid.status, InvoiceStatus::Paid);
    assert_eq!(paid.payment_reference.as_deref(), Some("txn_1"));
    let first_paid_at = paid.paid_at.unwrap();
    assert_eq!(
        h.store.subscription(subscription.id).await.unwrap().unwrap().status,
        SubscriptionStatus::Active
    );

    // Second call: same paid_at, same reference, still a success.
    let again = h
        .invoices
        .mark_invoice_paid(invoice.id, "txn_2")
        .await
        .unwrap();
    assert_eq!(again.status, InvoiceStatus::Paid);
    assert_eq!(again.paid_at.unwrap(), first_paid_at);
    assert_eq!(again.payment_reference.as_deref(), Some("txn_1"));
}

#[tokio::test]
async fn cancelled_invoice_cannot_be_paid() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let subscription = seed_subscription(&h.store).await;
    let invoice = h
        .invoices
        .create_invoice(renewal_invoice(subscription.id, 5_000))
        .await
        .unwrap();

    h.invoices.cancel_invoice(invoice.id).await.unwrap();
    assert!(matches!(
        h.invoices.mark_invoice_paid(invoice.id, "txn").await,
        Err(AppError::Validation(_))
    ));
}

#[tokio::test]
async fn overdue_sweep_flips_sent_invoices_past_due_date() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let subscription = seed_subscription(&h.store).await;

    let mut input = renewal_invoice(subscription.id, 5_000);
    input.due_date = Utc::now() - Duration::days(1);
    let late = h.invoices.create_invoice(input).await.unwrap();
    h.invoices.send_invoice(late.id).await.unwrap();

    let fresh = h
        .invoices
        .create_invoice(renewal_invoice(subscription.id, 5_000))
        .await
        .unwrap();
    h.invoices.send_invoice(fresh.id).await.unwrap();

    let flipped = h.invoices.mark_overdue_invoices(Utc::now()).await.unwrap();
    assert_eq!(flipped, 1);
    assert_eq!(
        h.invoices.get_invoice(late.id).await.unwrap().status,
        InvoiceStatus::Overdue
    );
    assert_eq!(
        h.invoices.get_invoice(fresh.id).await.unwrap().status,
        InvoiceStatus::Sent
    );
}

#[tokio::test]
async fn list_invoices_filters_by_subscription_and_status() {
    let (_, gateways) = single_gateway(MockBehavior::Approve);
    let h = harness(gateways);
    let first = seed_subscription(&h.store).await;
    let second = seed_subscription(&h.store).await;

    let a = h
        .invoices
        .create_invoice(renewal_invoice(first.id, 1_000))
        .await
        .unwrap();
    h.invoices
        .create_invoice(renewal_invoice(second.id, 2_000))
        .await
        .unwrap();
    h.invoices.send_invoice(a.id).await.unwrap();

    let sent_for_first = h
        .invoices
        .list_invoices(InvoiceFilter {
            subscription_id: Some(first.id),
            status: Some(InvoiceStatus::Sent),
        })
        .await
        .unwrap();
    assert_eq!(sent_for_first.len(), 1);
    assert_eq!(sent_for_first[0].id, a.id);

    let all = h.invoices.list_invoices(InvoiceFilter::default()).await.unwrap();
    assert_eq!(all.len(), 2);
}
