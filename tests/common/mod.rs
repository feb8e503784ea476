#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use billingd::dunning::DunningManager;
use billingd::gateway::{
    GatewayError, PaymentGateway, PaymentRequest, PaymentResponse, PaymentRouter, WebhookEvent,
};
use billingd::invoices::{InvoiceManager, NewInvoice, NewLineItem};
use billingd::models::{
    BillingCycle, Invoice, PaymentMethod, Subscription, SubscriptionStatus,
};
use billingd::notify::Notifier;
use billingd::render::TextRenderer;
use billingd::scheduler::ScheduleProcessor;
use billingd::store::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Approve,
    Decline,
    Unreachable,
}

/// Scriptable gateway double; records invocation order in a shared log.
pub struct MockGateway {
    name: String,
    behavior: Mutex<MockBehavior>,
    pub calls: AtomicUsize,
    call_log: Arc<Mutex<Vec<String>>>,
}

impl MockGateway {
    pub fn new(
        name: &str,
        behavior: MockBehavior,
        call_log: Arc<Mutex<Vec<String>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            call_log,
        })
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_active(&self) -> bool {
        true
    }

    fn supports(&self, _currency: &str, _method: PaymentMethod) -> bool {
        true
    }

    async fn initiate(&self, _request: &PaymentRequest) -> Result<PaymentResponse, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_log.lock().unwrap().push(self.name.clone());
        match *self.behavior.lock().unwrap() {
            MockBehavior::Approve => Ok(PaymentResponse::approved(format!(
                "txn_{}_{}",
                self.name,
                Uuid::new_v4().simple()
            ))),
            MockBehavior::Decline => Ok(PaymentResponse::declined(
                "card_declined",
                "insufficient funds",
            )),
            MockBehavior::Unreachable => {
                Err(GatewayError::Unreachable("connection refused".into()))
            }
        }
    }

    async fn capture(&self, transaction_id: &str) -> Result<PaymentResponse, GatewayError> {
        Ok(PaymentResponse::approved(transaction_id.to_string()))
    }

    async fn check_status(&self, transaction_id: &str) -> Result<PaymentResponse, GatewayError> {
        Ok(PaymentResponse::approved(transaction_id.to_string()))
    }

    fn verify_webhook(&self, _payload: &[u8], _signature: &str) -> Option<WebhookEvent> {
        None
    }
}

/// Notifier double capturing every dispatched notice.
#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn recorded(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.notices.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_invoice_document(
        &self,
        invoice: &Invoice,
        _document: &[u8],
    ) -> anyhow::Result<()> {
        self.record(format!("invoice:{}", invoice.number));
        Ok(())
    }

    async fn send_payment_failed_notice(
        &self,
        subscription: &Subscription,
        _details: &str,
    ) -> anyhow::Result<()> {
        self.record(format!("payment_failed:{}", subscription.id));
        Ok(())
    }

    async fn send_account_suspended_notice(
        &self,
        subscription: &Subscription,
        _details: &str,
    ) -> anyhow::Result<()> {
        self.record(format!("suspended:{}", subscription.id));
        Ok(())
    }

    async fn send_account_reactivated_notice(
        &self,
        subscription: &Subscription,
        _details: &str,
    ) -> anyhow::Result<()> {
        self.record(format!("reactivated:{}", subscription.id));
        Ok(())
    }
}

pub struct Harness {
    pub store: MemoryStore,
    pub invoices: InvoiceManager,
    pub dunning: DunningManager,
    pub processor: ScheduleProcessor,
    pub router: Arc<PaymentRouter>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness(gateways: Vec<Arc<dyn PaymentGateway>>) -> Harness {
    let store = MemoryStore::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let router = Arc::new(PaymentRouter::new(gateways));

    let invoices = InvoiceManager::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        notifier.clone(),
        Arc::new(TextRenderer),
    );
    let dunning = DunningManager::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        router.clone(),
        invoices.clone(),
        notifier.clone(),
        3,
        7,
        4,
    );
    let processor = ScheduleProcessor::new(
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        invoices.clone(),
        router.clone(),
        dunning.clone(),
        14,
        4,
    );

    Harness {
        store,
        invoices,
        dunning,
        processor,
        router,
        notifier,
    }
}

pub fn single_gateway(behavior: MockBehavior) -> (Arc<MockGateway>, Vec<Arc<dyn PaymentGateway>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let gateway = MockGateway::new("mock", behavior, log);
    (gateway.clone(), vec![gateway as Arc<dyn PaymentGateway>])
}

pub async fn seed_subscription(store: &MemoryStore) -> Subscription {
    let subscription = Subscription {
        id: Uuid::new_v4(),
        customer_email: "subscriber@example.com".into(),
        country: "DE".into(),
        currency: "EUR".into(),
        billing_cycle: BillingCycle::Monthly,
        payment_method: PaymentMethod::Card,
        preferred_gateway: None,
        tax_exempt: false,
        status: SubscriptionStatus::Active,
    };
    store.put_subscription(subscription.clone()).await;
    subscription
}

pub fn renewal_invoice(subscription_id: Uuid, amount_cents: i64) -> NewInvoice {
    NewInvoice {
        subscription_id,
        amount_cents,
        currency: "EUR".into(),
        description: "Subscription renewal".into(),
        due_date: Utc::now() + Duration::days(14),
        items: vec![NewLineItem {
            description: "Subscription renewal".into(),
            quantity: 1,
            unit_price_cents: amount_cents,
        }],
    }
}
