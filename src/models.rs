use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Open key-value bag carried by events and schedules. Kept as a flat map of
/// strings so serialization stays deterministic.
pub type Metadata = BTreeMap<String, String>;

/// key: invoice-model -> one bill per billing cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    /// Human-readable number, unique and sequential within a calendar year.
    pub number: String,
    pub subscription_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub description: String,
    pub items: Vec<LineItem>,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub due_date: DateTime<Utc>,
    pub status: InvoiceStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub total_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Sent,
    Overdue,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Sent => "sent",
            InvoiceStatus::Overdue => "overdue",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    /// Status only ever advances along the lifecycle graph, never backward.
    pub fn can_transition_to(&self, next: InvoiceStatus) -> bool {
        use InvoiceStatus::*;
        match (self, next) {
            (Draft, Sent) | (Sent, Paid) | (Sent, Overdue) | (Overdue, Paid) => true,
            (Draft, Paid) => true,
            (Draft, Cancelled) | (Sent, Cancelled) | (Overdue, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(InvoiceStatus::Draft),
            "sent" => Ok(InvoiceStatus::Sent),
            "overdue" => Ok(InvoiceStatus::Overdue),
            "paid" => Ok(InvoiceStatus::Paid),
            "cancelled" => Ok(InvoiceStatus::Cancelled),
            other => Err(format!("unknown invoice status `{other}`")),
        }
    }
}

/// key: dunning-model -> one step of the failure-recovery chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DunningEvent {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub kind: DunningKind,
    pub status: DunningStatus,
    /// 1-based; meaningful for `PaymentFailed`/`PaymentRetry` steps.
    pub attempt: i32,
    pub scheduled_for: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DunningEvent {
    pub fn new(
        subscription_id: Uuid,
        kind: DunningKind,
        attempt: i32,
        scheduled_for: DateTime<Utc>,
        metadata: Metadata,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            kind,
            status: DunningStatus::Pending,
            attempt,
            scheduled_for,
            sent_at: None,
            resolved_at: None,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// An event still holding its chain open: Pending (awaiting processing)
    /// or Sent (processed, awaiting external resolution, e.g. a suspension).
    pub fn is_active(&self) -> bool {
        matches!(self.status, DunningStatus::Pending | DunningStatus::Sent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DunningKind {
    PaymentFailed,
    PaymentRetry,
    AccountSuspended,
    AccountReactivated,
}

impl DunningKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DunningKind::PaymentFailed => "payment_failed",
            DunningKind::PaymentRetry => "payment_retry",
            DunningKind::AccountSuspended => "account_suspended",
            DunningKind::AccountReactivated => "account_reactivated",
        }
    }
}

impl FromStr for DunningKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "payment_failed" => Ok(DunningKind::PaymentFailed),
            "payment_retry" => Ok(DunningKind::PaymentRetry),
            "account_suspended" => Ok(DunningKind::AccountSuspended),
            "account_reactivated" => Ok(DunningKind::AccountReactivated),
            other => Err(format!("unknown dunning kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DunningStatus {
    Pending,
    Sent,
    Failed,
    Resolved,
}

impl DunningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DunningStatus::Pending => "pending",
            DunningStatus::Sent => "sent",
            DunningStatus::Failed => "failed",
            DunningStatus::Resolved => "resolved",
        }
    }
}

impl FromStr for DunningStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DunningStatus::Pending),
            "sent" => Ok(DunningStatus::Sent),
            "failed" => Ok(DunningStatus::Failed),
            "resolved" => Ok(DunningStatus::Resolved),
            other => Err(format!("unknown dunning status `{other}`")),
        }
    }
}

/// key: schedule-model -> next billing occurrence for a subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingSchedule {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub next_billing_date: DateTime<Utc>,
    pub amount_cents: i64,
    pub currency: String,
    pub status: ScheduleStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillingSchedule {
    pub fn new(
        subscription_id: Uuid,
        next_billing_date: DateTime<Utc>,
        amount_cents: i64,
        currency: &str,
        max_retries: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            next_billing_date,
            amount_cents,
            currency: currency.to_string(),
            status: ScheduleStatus::Scheduled,
            retry_count: 0,
            max_retries,
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Scheduled,
    Processing,
    Completed,
    Failed,
}

impl ScheduleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleStatus::Scheduled => "scheduled",
            ScheduleStatus::Processing => "processing",
            ScheduleStatus::Completed => "completed",
            ScheduleStatus::Failed => "failed",
        }
    }
}

impl FromStr for ScheduleStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(ScheduleStatus::Scheduled),
            "processing" => Ok(ScheduleStatus::Processing),
            "completed" => Ok(ScheduleStatus::Completed),
            "failed" => Ok(ScheduleStatus::Failed),
            other => Err(format!("unknown schedule status `{other}`")),
        }
    }
}

/// Recurring period between successive charges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Quarterly => "quarterly",
            BillingCycle::Yearly => "yearly",
        }
    }

    /// Next occurrence, anchored on the previous scheduled date so repeated
    /// cycles never drift.
    pub fn advance(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let months = match self {
            BillingCycle::Monthly => Months::new(1),
            BillingCycle::Quarterly => Months::new(3),
            BillingCycle::Yearly => Months::new(12),
        };
        from.checked_add_months(months).unwrap_or(from)
    }
}

impl FromStr for BillingCycle {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "monthly" => Ok(BillingCycle::Monthly),
            "quarterly" => Ok(BillingCycle::Quarterly),
            "yearly" | "annual" => Ok(BillingCycle::Yearly),
            other => Err(format!("unknown billing cycle `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Wallet,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::Wallet => "wallet",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "card" => Ok(PaymentMethod::Card),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "wallet" => Ok(PaymentMethod::Wallet),
            other => Err(format!("unknown payment method `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            other => Err(format!("unknown subscription status `{other}`")),
        }
    }
}

/// Subscriber record as seen from the billing engine. The engine reads it for
/// billing context and only ever writes the status field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub customer_email: String,
    pub country: String,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub payment_method: PaymentMethod,
    pub preferred_gateway: Option<String>,
    pub tax_exempt: bool,
    pub status: SubscriptionStatus,
}
