pub mod deadline;
pub mod selector;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::Currency;
use crate::decimal::{Money, Percentage};
use crate::errors::{EpdError, Result};
use crate::types::{DelayRule, DiscountComputation};

pub use deadline::{apply_delay, end_of_month};
pub use selector::{select, ApplicableTier, TierSelector};

/// one step of a multi-tier discount schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountTier {
    pub percentage: Percentage,
    pub days: u32,
    pub delay_rule: DelayRule,
}

impl DiscountTier {
    pub fn new(percentage: Decimal, days: u32, delay_rule: DelayRule) -> Result<Self> {
        let percentage = Percentage::new(percentage).ok_or_else(|| EpdError::InvalidDiscount {
            message: format!("discount percentage must be between 0 and 100, got {}", percentage),
        })?;

        Ok(Self {
            percentage,
            days,
            delay_rule,
        })
    }

    /// last day the tier can be taken for an invoice issued on `issue_date`
    pub fn deadline(&self, issue_date: NaiveDate) -> NaiveDate {
        apply_delay(self.delay_rule, self.days, issue_date)
    }
}

/// deadline of a tier for an invoice issued on `issue_date`
pub fn deadline(tier: &DiscountTier, issue_date: NaiveDate) -> NaiveDate {
    tier.deadline(issue_date)
}

/// single early payment discount configured directly on the term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyDiscount {
    pub percentage: Percentage,
    pub days: u32,
}

impl LegacyDiscount {
    pub fn deadline(&self, issue_date: NaiveDate) -> NaiveDate {
        apply_delay(DelayRule::DaysAfterIssue, self.days, issue_date)
    }
}

/// amount share of one installment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentValue {
    Percent(Percentage),
    /// whatever the other installments leave
    Balance,
}

/// one due date of a payment term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub value: InstallmentValue,
    pub days: u32,
    pub delay_rule: DelayRule,
}

impl Installment {
    pub fn balance(days: u32) -> Self {
        Self {
            value: InstallmentValue::Balance,
            days,
            delay_rule: DelayRule::DaysAfterIssue,
        }
    }

    pub fn percent(percent: u32, days: u32) -> Self {
        Self {
            value: InstallmentValue::Percent(Percentage::from_percent(percent)),
            days,
            delay_rule: DelayRule::DaysAfterIssue,
        }
    }

    pub fn due_date(&self, reference: NaiveDate) -> NaiveDate {
        apply_delay(self.delay_rule, self.days, reference)
    }
}

/// one line of the discount preview shown when configuring a term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountPreview {
    pub percentage: Percentage,
    pub deadline: NaiveDate,
    pub amount_due: Money,
}

/// payment term with its installments and discount schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTerm {
    pub name: String,
    pub installments: Vec<Installment>,
    pub early_discount: Option<LegacyDiscount>,
    /// kept in insertion order; ties in selection fall back to it
    pub tiers: Vec<DiscountTier>,
    pub computation: DiscountComputation,
}

impl PaymentTerm {
    /// single installment due `days` after the invoice date
    pub fn net_days(name: &str, days: u32) -> Self {
        Self {
            name: name.to_string(),
            installments: vec![Installment::balance(days)],
            early_discount: None,
            tiers: Vec::new(),
            computation: DiscountComputation::Included,
        }
    }

    pub fn with_installments(mut self, installments: Vec<Installment>) -> Self {
        self.installments = installments;
        self
    }

    pub fn with_legacy_discount(mut self, percentage: Decimal, days: u32) -> Result<Self> {
        let percentage = Percentage::new(percentage).ok_or_else(|| EpdError::InvalidDiscount {
            message: format!("discount percentage must be between 0 and 100, got {}", percentage),
        })?;
        self.early_discount = Some(LegacyDiscount { percentage, days });
        Ok(self)
    }

    pub fn with_tier(mut self, tier: DiscountTier) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn with_computation(mut self, computation: DiscountComputation) -> Self {
        self.computation = computation;
        self
    }

    pub fn has_tiers(&self) -> bool {
        !self.tiers.is_empty()
    }

    /// any discount configured, multi-tier or legacy
    pub fn epd_enabled(&self) -> bool {
        self.has_tiers() || self.early_discount.is_some()
    }

    /// latest installment due date for invoices dated `reference`
    pub fn latest_due_date(&self, reference: NaiveDate) -> Option<NaiveDate> {
        self.installments
            .iter()
            .map(|installment| installment.due_date(reference))
            .max()
    }

    /// checks run when the term is saved
    pub fn validate(&self, reference: NaiveDate) -> Result<()> {
        if self.installments.is_empty() {
            return Err(EpdError::ConfigurationError {
                message: format!("payment term {} has no installments", self.name),
            });
        }

        let mut percent_total = Decimal::ZERO;
        let mut has_balance = false;
        for installment in &self.installments {
            match installment.value {
                InstallmentValue::Percent(p) => percent_total += p.value(),
                InstallmentValue::Balance => has_balance = true,
            }
        }
        if percent_total > Decimal::ONE_HUNDRED
            || (!has_balance && percent_total != Decimal::ONE_HUNDRED)
        {
            return Err(EpdError::ConfigurationError {
                message: format!(
                    "installments of payment term {} must cover exactly 100%",
                    self.name
                ),
            });
        }

        if self.epd_enabled() && self.installments.len() != 1 {
            return Err(EpdError::ConfigurationError {
                message: "early payment discounts require a single 100% installment".to_string(),
            });
        }

        if let Some(latest) = self.latest_due_date(reference) {
            for tier in &self.tiers {
                let discount_date = tier.deadline(reference);
                if discount_date > latest {
                    return Err(EpdError::ConfigurationError {
                        message: format!(
                            "the early payment discount date ({}) cannot exceed the last payment deadline ({})",
                            discount_date.format("%d/%m/%Y"),
                            latest.format("%d/%m/%Y"),
                        ),
                    });
                }
            }
        }

        Ok(())
    }

    /// discount stored on the invoice when it is posted
    ///
    /// the legacy discount when configured, otherwise the tier applicable on
    /// the issue date.
    pub fn stored_discount(&self, issue_date: NaiveDate) -> Option<(Percentage, NaiveDate)> {
        if let Some(legacy) = &self.early_discount {
            return Some((legacy.percentage, legacy.deadline(issue_date)));
        }
        TierSelector::select(&self.tiers, issue_date, issue_date)
            .map(|applicable| (applicable.tier.percentage, applicable.deadline))
    }

    /// amount due per tier for an example invoice, sorted by tier days
    pub fn discount_preview(&self, example_amount: Money, example_date: NaiveDate, currency: &Currency) -> Vec<DiscountPreview> {
        let mut tiers: Vec<&DiscountTier> = self.tiers.iter().collect();
        tiers.sort_by_key(|tier| tier.days);

        tiers
            .into_iter()
            .map(|tier| DiscountPreview {
                percentage: tier.percentage,
                deadline: tier.deadline(example_date),
                amount_due: currency.round(example_amount - example_amount.percentage(tier.percentage)),
            })
            .collect()
    }

    /// split a signed total across the installments, the balance line taking the remainder
    pub fn split_amount(&self, total: Money, currency: &Currency) -> Vec<Money> {
        let mut amounts = Vec::with_capacity(self.installments.len());
        let mut allocated = Money::ZERO;
        let mut balance_index = None;

        for (i, installment) in self.installments.iter().enumerate() {
            match installment.value {
                InstallmentValue::Percent(p) => {
                    let amount = currency.round(total.percentage(p));
                    allocated += amount;
                    amounts.push(amount);
                }
                InstallmentValue::Balance => {
                    balance_index = Some(i);
                    amounts.push(Money::ZERO);
                }
            }
        }

        let remainder = total - allocated;
        match balance_index {
            Some(i) => amounts[i] = remainder,
            None => {
                if let Some(last) = amounts.last_mut() {
                    *last += remainder;
                }
            }
        }

        amounts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn two_tier_term() -> PaymentTerm {
        PaymentTerm::net_days("30 days, 10%/5%", 30)
            .with_tier(DiscountTier::new(dec!(10), 10, DelayRule::DaysAfterIssue).unwrap())
            .with_tier(DiscountTier::new(dec!(5), 20, DelayRule::DaysAfterIssue).unwrap())
    }

    #[test]
    fn test_tier_percentage_bounds() {
        assert!(DiscountTier::new(dec!(100.5), 10, DelayRule::DaysAfterIssue).is_err());
        assert!(DiscountTier::new(dec!(-1), 10, DelayRule::DaysAfterIssue).is_err());
        assert!(DiscountTier::new(dec!(100), 0, DelayRule::DaysAfterIssue).is_ok());
    }

    #[test]
    fn test_deadline_rules() {
        let tier = DiscountTier::new(dec!(2), 10, DelayRule::DaysAfterEndOfMonth).unwrap();
        assert_eq!(deadline(&tier, d(2025, 4, 12)), d(2025, 5, 10));
    }

    #[test]
    fn test_validate_accepts_tiers_within_due_date() {
        assert!(two_tier_term().validate(d(2025, 1, 1)).is_ok());
    }

    #[test]
    fn test_validate_rejects_tier_past_due_date() {
        let term = PaymentTerm::net_days("15 days", 15)
            .with_tier(DiscountTier::new(dec!(3), 20, DelayRule::DaysAfterIssue).unwrap());
        let err = term.validate(d(2025, 1, 1)).unwrap_err();
        assert!(matches!(err, EpdError::ConfigurationError { .. }));
    }

    #[test]
    fn test_validate_requires_single_installment_with_discount() {
        let term = two_tier_term()
            .with_installments(vec![Installment::percent(50, 15), Installment::balance(30)]);
        assert!(term.validate(d(2025, 1, 1)).is_err());
    }

    #[test]
    fn test_validate_installments_cover_total() {
        let term = PaymentTerm::net_days("split", 30)
            .with_installments(vec![Installment::percent(50, 15), Installment::percent(40, 30)]);
        assert!(term.validate(d(2025, 1, 1)).is_err());

        let term = PaymentTerm::net_days("split", 30)
            .with_installments(vec![Installment::percent(50, 15), Installment::balance(30)]);
        assert!(term.validate(d(2025, 1, 1)).is_ok());
    }

    #[test]
    fn test_stored_discount_prefers_legacy() {
        let issue = d(2025, 1, 1);
        let term = two_tier_term().with_legacy_discount(dec!(2), 7).unwrap();
        let (pct, date) = term.stored_discount(issue).unwrap();
        assert_eq!(pct.value(), dec!(2));
        assert_eq!(date, d(2025, 1, 8));

        let (pct, date) = two_tier_term().stored_discount(issue).unwrap();
        assert_eq!(pct.value(), dec!(10));
        assert_eq!(date, d(2025, 1, 11));

        assert!(PaymentTerm::net_days("net", 30).stored_discount(issue).is_none());
    }

    #[test]
    fn test_discount_preview_sorted_by_days() {
        let term = PaymentTerm::net_days("preview", 30)
            .with_tier(DiscountTier::new(dec!(5), 20, DelayRule::DaysAfterIssue).unwrap())
            .with_tier(DiscountTier::new(dec!(10), 10, DelayRule::DaysAfterIssue).unwrap());
        let preview = term.discount_preview(Money::from_major(1000), d(2025, 1, 1), &Currency::usd());

        assert_eq!(preview.len(), 2);
        assert_eq!(preview[0].amount_due, Money::from_major(900));
        assert_eq!(preview[0].deadline, d(2025, 1, 11));
        assert_eq!(preview[1].amount_due, Money::from_major(950));
    }

    #[test]
    fn test_split_amount_balance_takes_remainder() {
        let term = PaymentTerm::net_days("thirds", 60).with_installments(vec![
            Installment::percent(33, 30),
            Installment::percent(33, 45),
            Installment::balance(60),
        ]);
        let parts = term.split_amount(Money::from_major(100), &Currency::usd());
        assert_eq!(parts, vec![Money::from_major(33), Money::from_major(33), Money::from_major(34)]);
    }
}
