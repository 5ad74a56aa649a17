use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::currency::Currency;
use crate::decimal::{Money, Percentage};
use crate::eligibility::EligibilityGate;
use crate::invoice::Invoice;
use crate::schedule::{self, ApplicableTier};
use crate::types::{DiscountComputation, InvoiceId};

/// discount figures of one invoice on a payment date
///
/// all amounts are magnitudes in invoice currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountBasis {
    pub invoice_id: InvoiceId,
    pub eligible: bool,
    /// original gross `G`
    pub gross: Money,
    /// residual before this payment `R`
    pub residual: Money,
    /// discount on the full invoice under the applicable tier `D_total`
    pub discount_total: Money,
    /// `G - D_total`
    pub net_total: Money,
    /// percentage in force, `None` without discount
    pub percentage: Option<Percentage>,
    pub tier: Option<ApplicableTier>,
}

impl DiscountBasis {
    /// plain residual, no discount
    fn undiscounted(invoice: &Invoice, eligible: bool) -> Self {
        let view = invoice.residual_view();
        Self {
            invoice_id: invoice.id,
            eligible,
            gross: view.original_gross,
            residual: view.residual,
            discount_total: Money::ZERO,
            net_total: view.original_gross,
            percentage: None,
            tier: None,
        }
    }

    pub fn has_discount(&self) -> bool {
        self.eligible && self.discount_total.is_positive() && self.gross.is_positive()
    }

    /// discount still attached to the unpaid residual, `D_total × R / G`, unrounded
    pub fn remaining_discount(&self) -> Money {
        if !self.has_discount() {
            return Money::ZERO;
        }
        match self.residual.ratio_to(self.gross) {
            Some(share) => self.discount_total * share,
            None => Money::ZERO,
        }
    }

    /// amount that settles the invoice today, `R - D_total × R / G`
    pub fn suggested_net(&self, currency: &Currency) -> Money {
        currency.round(self.residual - self.remaining_discount())
    }

    /// `P / N_total`; zero when the net is zero
    pub fn payment_ratio(&self, amount: Money) -> Decimal {
        amount.abs().ratio_to(self.net_total).unwrap_or(Decimal::ZERO)
    }

    /// split a payment `P` into the part applied to the residual, the discount and the excess
    ///
    /// a payment reaching the suggested net settles the invoice and takes the
    /// whole remaining discount; a smaller one takes `D_total × P / N_total`,
    /// never more than what remains.
    pub fn allocate(&self, amount: Money, currency: &Currency) -> Allocation {
        let amount = currency.round(amount.abs());
        let suggested = self.suggested_net(currency);

        if currency.compare(amount, suggested).is_ge() {
            let discount = currency.round(self.residual - suggested);
            return Allocation {
                invoice_id: self.invoice_id,
                applied: suggested,
                discount,
                excess: amount - suggested,
                ratio: if self.has_discount() { self.payment_ratio(suggested) } else { Decimal::ZERO },
                settles: true,
            };
        }

        let discount = if self.has_discount() && !self.net_total.is_zero() {
            let proportional = self.discount_total * self.payment_ratio(amount);
            currency.round(proportional.min(self.remaining_discount()))
        } else {
            Money::ZERO
        };

        Allocation {
            invoice_id: self.invoice_id,
            applied: amount,
            discount,
            excess: Money::ZERO,
            ratio: self.payment_ratio(amount),
            settles: false,
        }
    }
}

/// outcome of allocating a payment to one invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub invoice_id: InvoiceId,
    pub applied: Money,
    pub discount: Money,
    /// paid above what the invoice needed
    pub excess: Money,
    pub ratio: Decimal,
    /// the residual reaches zero
    pub settles: bool,
}

impl Allocation {
    pub fn residual_reduction(&self) -> Money {
        self.applied + self.discount
    }
}

/// ratio-based discount allocation across partial payments
pub struct ProportionalAllocator;

impl ProportionalAllocator {
    /// discount figures of `invoice` for a payment in `currency` on `payment_date`
    pub fn basis(invoice: &Invoice, currency: &Currency, payment_date: NaiveDate) -> DiscountBasis {
        if !EligibilityGate::eligible(invoice, currency, Some(payment_date)) {
            return DiscountBasis::undiscounted(invoice, false);
        }
        let term = match &invoice.payment_term {
            Some(term) => term,
            None => return DiscountBasis::undiscounted(invoice, false),
        };

        let view = invoice.residual_view();
        let gross = view.original_gross;
        let issue_date = invoice.issue_date.unwrap_or(payment_date);

        let (discount_total, percentage, tier) = if term.has_tiers() {
            match schedule::select(term, issue_date, payment_date) {
                Some(applicable) => {
                    let pct = applicable.tier.percentage;
                    let net = match term.computation {
                        DiscountComputation::Included => {
                            invoice.currency.round(gross * pct.complement_fraction())
                        }
                        DiscountComputation::Excluded | DiscountComputation::Mixed => {
                            invoice.amount_total()
                                - invoice.currency.round(invoice.amount_untaxed().percentage(pct))
                        }
                    };
                    (gross - net, Some(pct), Some(applicable))
                }
                None => (Money::ZERO, None, None),
            }
        } else {
            (view.original_discount_stored(), invoice.stored_percentage, None)
        };

        let discount_total = discount_total.max(Money::ZERO);
        if let Some(applicable) = &tier {
            debug!(
                invoice_id = invoice.id,
                percentage = %applicable.tier.percentage,
                discount = %discount_total,
                "dynamic discount computed"
            );
        }

        DiscountBasis {
            invoice_id: invoice.id,
            eligible: true,
            gross,
            residual: view.residual,
            discount_total,
            net_total: gross - discount_total,
            percentage,
            tier,
        }
    }

    /// share a batch payment across invoices in proportion to what each one needs now
    ///
    /// every invoice is capped at its suggested net; the last share absorbs rounding.
    pub fn distribute(bases: &[DiscountBasis], amount: Money, currency: &Currency) -> Vec<Money> {
        let amount = currency.round(amount.abs());
        let needs: Vec<Money> = bases.iter().map(|b| b.suggested_net(currency)).collect();
        let total_need: Money = needs.iter().sum();

        if currency.compare(amount, total_need).is_ge() {
            let mut shares = needs;
            let extra = amount - total_need;
            if let Some(last) = shares.last_mut() {
                *last += extra;
            }
            return shares;
        }

        let ratio = amount.ratio_to(total_need).unwrap_or(Decimal::ZERO);
        let mut shares: Vec<Money> = needs.iter().map(|n| currency.round(*n * ratio)).collect();
        let drift = amount - shares.iter().sum::<Money>();
        if let Some(last) = shares.last_mut() {
            *last += drift;
        }
        shares
    }

    /// cap a requested amount at the residual; the flag tells whether it was cut
    pub fn clamp(amount: Money, residual: Money, currency: &Currency) -> (Money, bool) {
        if currency.compare(amount, residual).is_gt() {
            warn!(requested = %amount, residual = %residual, "amount clamped to residual");
            (residual, true)
        } else {
            (amount, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::RateTable;
    use crate::invoice::InvoiceBuilder;
    use crate::payments::WriteOffBuilder;
    use crate::schedule::{DiscountTier, PaymentTerm};
    use crate::types::{DelayRule, MoveType};
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn invoice(amount: i64, term: PaymentTerm) -> Invoice {
        InvoiceBuilder::new(1, MoveType::OutInvoice, Currency::usd())
            .issue_date(d(2025, 1, 1))
            .payment_term(term)
            .line("413535", "bicycles", Money::from_major(amount))
            .post(d(2025, 1, 1), &Currency::usd(), &RateTable::new())
            .unwrap()
    }

    fn ten_percent() -> PaymentTerm {
        PaymentTerm::net_days("10% 10 days", 30)
            .with_tier(DiscountTier::new(dec!(10), 10, DelayRule::DaysAfterIssue).unwrap())
    }

    #[test]
    fn test_first_partial_takes_proportional_discount() {
        let usd = Currency::usd();
        let inv = invoice(1000, ten_percent());
        let basis = ProportionalAllocator::basis(&inv, &usd, d(2025, 1, 5));

        assert_eq!(basis.discount_total, Money::from_major(100));
        assert_eq!(basis.suggested_net(&usd), Money::from_major(900));

        let allocation = basis.allocate(Money::from_major(450), &usd);
        assert_eq!(allocation.discount, Money::from_major(50));
        assert_eq!(allocation.ratio, dec!(0.5));
        assert!(!allocation.settles);
        assert_eq!(allocation.residual_reduction(), Money::from_major(500));
    }

    #[test]
    fn test_payment_reaching_suggested_net_settles() {
        let usd = Currency::usd();
        let mut inv = invoice(1000, ten_percent());
        inv.term_lines[0].settle(Money::from_major(500), &usd, &usd);

        let basis = ProportionalAllocator::basis(&inv, &usd, d(2025, 1, 5));
        assert_eq!(basis.suggested_net(&usd), Money::from_major(450));

        let allocation = basis.allocate(Money::from_major(500), &usd);
        assert!(allocation.settles);
        assert_eq!(allocation.applied, Money::from_major(450));
        assert_eq!(allocation.discount, Money::from_major(50));
        assert_eq!(allocation.excess, Money::from_major(50));
    }

    #[test]
    fn test_expired_tier_means_no_discount() {
        let usd = Currency::usd();
        let inv = invoice(1000, ten_percent());
        let basis = ProportionalAllocator::basis(&inv, &usd, d(2025, 1, 20));
        assert!(!basis.eligible);
        assert_eq!(basis.suggested_net(&usd), Money::from_major(1000));

        let allocation = basis.allocate(Money::from_major(300), &usd);
        assert!(allocation.discount.is_zero());
    }

    #[test]
    fn test_full_discount_leaves_nothing_to_pay() {
        let usd = Currency::usd();
        let term = PaymentTerm::net_days("free", 30)
            .with_tier(DiscountTier::new(dec!(100), 5, DelayRule::DaysAfterIssue).unwrap());
        let inv = invoice(200, term);
        let basis = ProportionalAllocator::basis(&inv, &usd, d(2025, 1, 2));

        assert!(basis.net_total.is_zero());
        assert_eq!(basis.payment_ratio(Money::from_major(10)), Decimal::ZERO);
        assert!(basis.suggested_net(&usd).is_zero());
    }

    #[test]
    fn test_zero_amount_invoice_has_no_discount() {
        let usd = Currency::usd();
        let inv = invoice(0, ten_percent());
        let basis = ProportionalAllocator::basis(&inv, &usd, d(2025, 1, 3));

        assert!(!basis.has_discount());
        assert!(basis.remaining_discount().is_zero());
        assert_eq!(basis.suggested_net(&usd), basis.residual);

        let allocation = basis.allocate(Money::from_major(50), &usd);
        assert!(allocation.discount.is_zero());
        assert!(allocation.settles);
        assert_eq!(allocation.excess, Money::from_major(50));

        let rates = RateTable::new();
        let lines = WriteOffBuilder::new("530535", &usd, &rates)
            .build(&inv, &basis, &allocation, d(2025, 1, 3))
            .unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn test_legacy_discount_uses_stored_net() {
        let usd = Currency::usd();
        let term = PaymentTerm::net_days("2/10", 30).with_legacy_discount(dec!(2), 10).unwrap();
        let inv = invoice(500, term);
        let basis = ProportionalAllocator::basis(&inv, &usd, d(2025, 1, 3));
        assert_eq!(basis.discount_total, Money::from_major(10));
        assert_eq!(basis.percentage, Some(Percentage::from_percent(2)));
    }

    #[test]
    fn test_distribute_by_need() {
        let usd = Currency::usd();
        let a = invoice(1000, ten_percent());
        let mut b = invoice(500, ten_percent());
        b.id = 2;
        let date = d(2025, 1, 5);
        let bases = vec![
            ProportionalAllocator::basis(&a, &usd, date),
            ProportionalAllocator::basis(&b, &usd, date),
        ];

        let shares = ProportionalAllocator::distribute(&bases, Money::from_major(675), &usd);
        assert_eq!(shares, vec![Money::from_major(450), Money::from_major(225)]);

        let shares = ProportionalAllocator::distribute(&bases, Money::from_major(1400), &usd);
        assert_eq!(shares, vec![Money::from_major(900), Money::from_major(500)]);
    }

    #[test]
    fn test_clamp() {
        let usd = Currency::usd();
        assert_eq!(
            ProportionalAllocator::clamp(Money::from_major(120), Money::from_major(100), &usd),
            (Money::from_major(100), true)
        );
        assert_eq!(
            ProportionalAllocator::clamp(Money::from_major(80), Money::from_major(100), &usd),
            (Money::from_major(80), false)
        );
    }
}
