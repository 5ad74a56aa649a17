use chrono::NaiveDate;
use tracing::debug;

use crate::currency::Currency;
use crate::errors::{EpdError, Result};
use crate::invoice::Invoice;
use crate::schedule::TierSelector;

/// decides whether an invoice can still take its early payment discount
///
/// prior partial payments never make an invoice ineligible.
pub struct EligibilityGate;

impl EligibilityGate {
    pub fn eligible(invoice: &Invoice, currency: &Currency, ref_date: Option<NaiveDate>) -> bool {
        match Self::check(invoice, currency, ref_date) {
            Ok(()) => true,
            Err(err) => {
                debug!(invoice_id = invoice.id, reason = %err, "invoice not eligible for discount");
                false
            }
        }
    }

    /// same as [`EligibilityGate::eligible`] but names the failing rule
    pub fn check(invoice: &Invoice, currency: &Currency, ref_date: Option<NaiveDate>) -> Result<()> {
        let refuse = |reason: &str| EpdError::NotEligible {
            invoice_id: invoice.id,
            reason: reason.to_string(),
        };

        if !invoice.is_posted() {
            return Err(refuse("invoice is not posted"));
        }
        if &invoice.currency != currency {
            return Err(refuse("payment currency differs from invoice currency"));
        }
        if !invoice.move_type.is_sale_side() {
            return Err(refuse("only customer invoices and credit notes take discounts"));
        }

        let term = match &invoice.payment_term {
            Some(term) if term.epd_enabled() => term,
            _ => return Err(refuse("payment term has no early payment discount")),
        };

        let (ref_date, issue_date) = match (ref_date, invoice.issue_date) {
            (Some(ref_date), Some(issue_date)) => (ref_date, issue_date),
            _ => return Ok(()),
        };

        let open = if term.has_tiers() {
            TierSelector::any_open(&term.tiers, issue_date, ref_date)
        } else {
            invoice
                .stored_discount_date()
                .map_or(false, |deadline| deadline >= ref_date)
        };

        if open {
            Ok(())
        } else {
            Err(refuse("discount deadline has passed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::RateTable;
    use crate::decimal::Money;
    use crate::invoice::InvoiceBuilder;
    use crate::schedule::{DiscountTier, PaymentTerm};
    use crate::types::{DelayRule, MoveType};
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn tiered() -> PaymentTerm {
        PaymentTerm::net_days("30 days", 30)
            .with_tier(DiscountTier::new(dec!(10), 10, DelayRule::DaysAfterIssue).unwrap())
            .with_tier(DiscountTier::new(dec!(5), 20, DelayRule::DaysAfterIssue).unwrap())
    }

    fn invoice(move_type: MoveType, term: PaymentTerm) -> Invoice {
        InvoiceBuilder::new(1, move_type, Currency::usd())
            .issue_date(d(2025, 1, 1))
            .payment_term(term)
            .line("413535", "frames", Money::from_major(1000))
            .post(d(2025, 1, 1), &Currency::usd(), &RateTable::new())
            .unwrap()
    }

    #[test]
    fn test_open_tier_is_eligible() {
        let inv = invoice(MoveType::OutInvoice, tiered());
        let usd = Currency::usd();
        assert!(EligibilityGate::eligible(&inv, &usd, Some(d(2025, 1, 21))));
        assert!(!EligibilityGate::eligible(&inv, &usd, Some(d(2025, 1, 22))));
    }

    #[test]
    fn test_currency_and_type_rules() {
        let inv = invoice(MoveType::OutInvoice, tiered());
        assert!(!EligibilityGate::eligible(&inv, &Currency::eur(), Some(d(2025, 1, 2))));

        let bill = invoice(MoveType::InInvoice, tiered());
        let err = EligibilityGate::check(&bill, &Currency::usd(), None).unwrap_err();
        assert!(matches!(err, EpdError::NotEligible { .. }));
    }

    #[test]
    fn test_missing_dates_are_eligible() {
        let inv = invoice(MoveType::OutRefund, tiered());
        assert!(EligibilityGate::eligible(&inv, &Currency::usd(), None));
    }

    #[test]
    fn test_legacy_discount_uses_stored_date() {
        let term = PaymentTerm::net_days("2/10 net 30", 30)
            .with_legacy_discount(dec!(2), 10)
            .unwrap();
        let inv = invoice(MoveType::OutInvoice, term);
        let usd = Currency::usd();
        assert!(EligibilityGate::eligible(&inv, &usd, Some(d(2025, 1, 11))));
        assert!(!EligibilityGate::eligible(&inv, &usd, Some(d(2025, 1, 12))));
    }

    #[test]
    fn test_partially_paid_invoice_stays_eligible() {
        let mut inv = invoice(MoveType::OutInvoice, tiered());
        let usd = Currency::usd();
        inv.term_lines[0].settle(Money::from_major(400), &usd, &usd);
        assert!(EligibilityGate::eligible(&inv, &usd, Some(d(2025, 1, 5))));
    }

    #[test]
    fn test_term_without_discount() {
        let inv = invoice(MoveType::OutInvoice, PaymentTerm::net_days("net 30", 30));
        assert!(!EligibilityGate::eligible(&inv, &Currency::usd(), None));
    }
}
