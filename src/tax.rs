use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

/// key: tax-calculator -> flat per-jurisdiction rates
///
/// Rates are basis points of the pre-tax amount. The component split is
/// advisory presentation data, not a legal tax engine; components always sum
/// to the computed tax because the rounding remainder lands on the first one.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaxCalculator;

#[derive(Debug, Clone, Serialize)]
pub struct TaxAssessment {
    pub tax_cents: i64,
    pub rate_bps: i64,
    pub total_cents: i64,
    pub breakdown: Vec<TaxComponent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaxComponent {
    pub label: &'static str,
    pub rate_bps: i64,
    pub amount_cents: i64,
}

struct Jurisdiction {
    rate_bps: i64,
    components: &'static [(&'static str, i64)],
}

static JURISDICTIONS: Lazy<HashMap<&'static str, Jurisdiction>> = Lazy::new(|| {
    let mut table = HashMap::new();
    table.insert(
        "DE",
        Jurisdiction {
            rate_bps: 1900,
            components: &[("vat", 1900)],
        },
    );
    table.insert(
        "FR",
        Jurisdiction {
            rate_bps: 2000,
            components: &[("vat", 2000)],
        },
    );
    table.insert(
        "GB",
        Jurisdiction {
            rate_bps: 2000,
            components: &[("vat", 2000)],
        },
    );
    table.insert(
        "CH",
        Jurisdiction {
            rate_bps: 810,
            components: &[("vat", 810)],
        },
    );
    table.insert(
        "US",
        Jurisdiction {
            rate_bps: 825,
            components: &[("state", 625), ("local", 200)],
        },
    );
    table.insert(
        "CA",
        Jurisdiction {
            rate_bps: 1300,
            components: &[("federal", 500), ("provincial", 800)],
        },
    );
    table
});

fn tax_for(amount_cents: i64, rate_bps: i64) -> i64 {
    // Half-up rounding in integer math; no floats near money.
    (amount_cents * rate_bps + 5_000) / 10_000
}

impl TaxCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Unknown countries resolve to a zero rate rather than failing; the
    /// jurisdiction table is best-effort by design.
    pub fn calculate(
        &self,
        amount_cents: i64,
        _currency: &str,
        country: &str,
        tax_exempt: bool,
    ) -> TaxAssessment {
        if tax_exempt {
            return TaxAssessment {
                tax_cents: 0,
                rate_bps: 0,
                total_cents: amount_cents,
                breakdown: Vec::new(),
            };
        }

        let Some(jurisdiction) = JURISDICTIONS.get(country) else {
            return TaxAssessment {
                tax_cents: 0,
                rate_bps: 0,
                total_cents: amount_cents,
                breakdown: Vec::new(),
            };
        };

        let tax_cents = tax_for(amount_cents, jurisdiction.rate_bps);
        let mut breakdown: Vec<TaxComponent> = jurisdiction
            .components
            .iter()
            .map(|(label, rate_bps)| TaxComponent {
                label,
                rate_bps: *rate_bps,
                amount_cents: tax_for(amount_cents, *rate_bps),
            })
            .collect();

        let component_sum: i64 = breakdown.iter().map(|c| c.amount_cents).sum();
        if let Some(first) = breakdown.first_mut() {
            first.amount_cents += tax_cents - component_sum;
        }

        TaxAssessment {
            tax_cents,
            rate_bps: jurisdiction.rate_bps,
            total_cents: amount_cents + tax_cents,
            breakdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exempt_subscribers_pay_no_tax() {
        let assessment = TaxCalculator::new().calculate(10_000, "EUR", "DE", true);
        assert_eq!(assessment.tax_cents, 0);
        assert_eq!(assessment.total_cents, 10_000);
        assert!(assessment.breakdown.is_empty());
    }

    #[test]
    fn german_vat_is_nineteen_percent() {
        let assessment = TaxCalculator::new().calculate(10_000, "EUR", "DE", false);
        assert_eq!(assessment.tax_cents, 1_900);
        assert_eq!(assessment.total_cents, 11_900);
        assert_eq!(assessment.rate_bps, 1_900);
    }

    #[test]
    fn unknown_country_resolves_to_zero_tax() {
        let assessment = TaxCalculator::new().calculate(10_000, "USD", "ZZ", false);
        assert_eq!(assessment.tax_cents, 0);
        assert_eq!(assessment.total_cents, 10_000);
    }

    #[test]
    fn breakdown_reconciles_with_total_tax() {
        let assessment = TaxCalculator::new().calculate(9_999, "USD", "US", false);
        let component_sum: i64 = assessment.breakdown.iter().map(|c| c.amount_cents).sum();
        assert_eq!(component_sum, assessment.tax_cents);
        assert_eq!(
            assessment.total_cents,
            9_999 + assessment.tax_cents
        );
    }

    #[test]
    fn rounding_is_half_up() {
        // 1 cent at 19% is 0.19 cents, rounds to 0; 3 cents rounds to 1.
        let calc = TaxCalculator::new();
        assert_eq!(calc.calculate(1, "EUR", "DE", false).tax_cents, 0);
        assert_eq!(calc.calculate(3, "EUR", "DE", false).tax_cents, 1);
    }
}
