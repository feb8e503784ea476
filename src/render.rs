use std::fmt::Write;

use crate::models::Invoice;

/// Document renderer collaborator; the engine treats the output as an opaque
/// blob handed to the notifier.
pub trait InvoiceRenderer: Send + Sync {
    fn render(&self, invoice: &Invoice) -> anyhow::Result<Vec<u8>>;
}

/// Plain-text rendering. A PDF renderer implements the same trait.
pub struct TextRenderer;

impl InvoiceRenderer for TextRenderer {
    fn render(&self, invoice: &Invoice) -> anyhow::Result<Vec<u8>> {
        let mut out = String::new();
        writeln!(out, "INVOICE {}", invoice.number)?;
        writeln!(out, "Subscription: {}", invoice.subscription_id)?;
        writeln!(out, "Due: {}", invoice.due_date.format("%Y-%m-%d"))?;
        writeln!(out)?;
        for item in &invoice.items {
            writeln!(
                out,
                "{:<40} {:>4} x {:>10} = {:>10}",
                item.description,
                item.quantity,
                format_cents(item.unit_price_cents, &invoice.currency),
                format_cents(item.total_cents, &invoice.currency),
            )?;
        }
        writeln!(out)?;
        writeln!(
            out,
            "Subtotal: {}",
            format_cents(invoice.amount_cents, &invoice.currency)
        )?;
        writeln!(out, "Tax:      {}", format_cents(invoice.tax_cents, &invoice.currency))?;
        writeln!(
            out,
            "Total:    {}",
            format_cents(invoice.total_cents, &invoice.currency)
        )?;
        Ok(out.into_bytes())
    }
}

fn format_cents(cents: i64, currency: &str) -> String {
    format!("{}.{:02} {currency}", cents / 100, (cents % 100).abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InvoiceStatus, LineItem};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn rendered_document_carries_number_and_totals() {
        let now = Utc::now();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            number: "INV-2026-000042".into(),
            subscription_id: Uuid::new_v4(),
            amount_cents: 2_500,
            currency: "EUR".into(),
            description: "Monthly plan".into(),
            items: vec![LineItem {
                description: "Monthly plan".into(),
                quantity: 1,
                unit_price_cents: 2_500,
                total_cents: 2_500,
            }],
            tax_cents: 475,
            total_cents: 2_975,
            due_date: now,
            status: InvoiceStatus::Draft,
            paid_at: None,
            payment_reference: None,
            created_at: now,
            updated_at: now,
        };

        let text = String::from_utf8(TextRenderer.render(&invoice).unwrap()).unwrap();
        assert!(text.contains("INV-2026-000042"));
        assert!(text.contains("29.75 EUR"));
    }
}
