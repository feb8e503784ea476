use once_cell::sync::Lazy;

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even
/// if database migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// key: billing-config -> batch tick cadence
pub static BILLING_TICK_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    std::env::var("BILLING_TICK_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(300)
});

/// key: billing-config -> bounded fan-out within one batch run
pub static BILLING_BATCH_CONCURRENCY: Lazy<usize> = Lazy::new(|| {
    std::env::var("BILLING_BATCH_CONCURRENCY")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(4)
});

/// key: billing-config -> payment retries before suspension
pub static DUNNING_MAX_RETRIES: Lazy<i32> = Lazy::new(|| {
    std::env::var("DUNNING_MAX_RETRIES")
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(3)
});

/// key: billing-config -> days between final failure and suspension
pub static DUNNING_SUSPENSION_DELAY_DAYS: Lazy<i64> = Lazy::new(|| {
    std::env::var("DUNNING_SUSPENSION_DELAY_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value >= 0)
        .unwrap_or(7)
});

/// Days between invoice creation and its due date.
pub static INVOICE_DUE_DAYS: Lazy<i64> = Lazy::new(|| {
    std::env::var("INVOICE_DUE_DAYS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value >= 0)
        .unwrap_or(14)
});

/// Webhook signing secret for the stripe-like provider.
pub static STRIPELIKE_WEBHOOK_SECRET: Lazy<String> = Lazy::new(|| {
    std::env::var("STRIPELIKE_WEBHOOK_SECRET").unwrap_or_else(|_| "dev-stripelike-secret".into())
});

/// Webhook signing secret for the paypal-like provider.
pub static PAYPALLIKE_WEBHOOK_SECRET: Lazy<String> = Lazy::new(|| {
    std::env::var("PAYPALLIKE_WEBHOOK_SECRET").unwrap_or_else(|_| "dev-paypallike-secret".into())
});

fn read_flag(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(default)
}

/// Enable flag for the stripe-like provider. Defaults to `true`.
pub static STRIPELIKE_ENABLED: Lazy<bool> = Lazy::new(|| read_flag("STRIPELIKE_ENABLED", true));

/// Enable flag for the paypal-like provider. Defaults to `true`.
pub static PAYPALLIKE_ENABLED: Lazy<bool> = Lazy::new(|| read_flag("PAYPALLIKE_ENABLED", true));
