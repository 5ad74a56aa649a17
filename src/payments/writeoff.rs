use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::currency::{Currency, ExchangeRates};
use crate::decimal::{Money, Percentage};
use crate::errors::Result;
use crate::invoice::Invoice;
use crate::types::{AccountCode, DiscountComputation, InvoiceId};

use super::allocator::{Allocation, DiscountBasis};

/// which part of the invoice a write-off line discounts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteOffBucket {
    Base,
    Tax,
}

/// accounting line absorbing part of a discount
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOffLine {
    pub invoice_id: InvoiceId,
    pub bucket: WriteOffBucket,
    pub account: AccountCode,
    pub label: String,
    /// signed, invoice currency
    pub amount_currency: Money,
    /// signed, company currency
    pub balance: Money,
}

/// full-payment write-off of `invoice` at `percentage`, one line per base and tax bucket
///
/// this is what settling the whole invoice on time would book. lines sum to
/// the discount stored on the invoice when `percentage` is the stored one.
pub fn standard_write_off(
    invoice: &Invoice,
    discount_account: &str,
    percentage: Percentage,
    company_currency: &Currency,
    rates: &dyn ExchangeRates,
    on: NaiveDate,
) -> Result<Vec<WriteOffLine>> {
    if percentage.is_zero() {
        return Ok(Vec::new());
    }

    let currency = &invoice.currency;
    let computation = invoice
        .payment_term
        .as_ref()
        .map(|t| t.computation)
        .unwrap_or_default();

    let mut lines: Vec<WriteOffLine> = invoice
        .base_lines
        .iter()
        .map(|base| WriteOffLine {
            invoice_id: invoice.id,
            bucket: WriteOffBucket::Base,
            account: discount_account.to_string(),
            label: format!("Early Payment Discount ({})", base.label),
            amount_currency: currency.round(base.amount_currency.percentage(percentage)),
            balance: Money::ZERO,
        })
        .collect();

    let target = match computation {
        DiscountComputation::Included => {
            lines.extend(invoice.tax_lines.iter().map(|tax| WriteOffLine {
                invoice_id: invoice.id,
                bucket: WriteOffBucket::Tax,
                account: tax.account.clone(),
                label: format!("Early Payment Discount ({})", tax.tax_name),
                amount_currency: currency.round(tax.amount_currency.percentage(percentage)),
                balance: Money::ZERO,
            }));
            let gross = invoice.amount_total();
            gross - currency.round(gross * percentage.complement_fraction())
        }
        DiscountComputation::Excluded | DiscountComputation::Mixed => {
            currency.round(invoice.amount_untaxed().percentage(percentage))
        }
    };

    let sign = invoice.direction_sign();
    let mut amounts: Vec<Money> = lines.iter().map(|l| l.amount_currency).collect();
    absorb_residue(&mut amounts, target);
    for (line, amount) in lines.iter_mut().zip(amounts) {
        line.amount_currency = amount.with_sign_of(sign);
    }

    set_balances(&mut lines, currency, company_currency, rates, on)?;
    Ok(lines)
}

/// scales write-offs to the discount one payment actually takes
pub struct WriteOffBuilder<'a> {
    discount_account: &'a str,
    company_currency: &'a Currency,
    rates: &'a dyn ExchangeRates,
}

impl<'a> WriteOffBuilder<'a> {
    pub fn new(discount_account: &'a str, company_currency: &'a Currency, rates: &'a dyn ExchangeRates) -> Self {
        Self {
            discount_account,
            company_currency,
            rates,
        }
    }

    /// write-off lines for `allocation` against `invoice`
    ///
    /// starts from the standard write-off at the stored percentage, rescales it
    /// to the percentage in force and then to the share of the discount this
    /// payment takes.
    pub fn build(
        &self,
        invoice: &Invoice,
        basis: &DiscountBasis,
        allocation: &Allocation,
        payment_date: NaiveDate,
    ) -> Result<Vec<WriteOffLine>> {
        let currency = &invoice.currency;
        if currency.is_zero(allocation.discount) {
            return Ok(Vec::new());
        }

        let stored = invoice.stored_percentage.unwrap_or(Percentage::ZERO);
        let dynamic = basis.percentage.unwrap_or(stored);
        let standard = standard_write_off(
            invoice,
            self.discount_account,
            stored,
            self.company_currency,
            self.rates,
            payment_date,
        )?;

        let mut lines = if standard.is_empty() {
            // nothing stored to rescale; expand at the percentage in force
            standard_write_off(
                invoice,
                self.discount_account,
                dynamic,
                self.company_currency,
                self.rates,
                payment_date,
            )?
        } else {
            Self::rescale(standard, dynamic, stored)
        };

        let full: Money = lines.iter().map(|l| l.amount_currency.abs()).sum();
        let ratio = match allocation.discount.ratio_to(full) {
            Some(ratio) => ratio,
            None => return Ok(Vec::new()),
        };
        lines = Self::scale(lines, ratio);

        let sign = invoice.direction_sign();
        let mut amounts: Vec<Money> = lines.iter().map(|l| currency.round(l.amount_currency)).collect();
        absorb_residue(&mut amounts, allocation.discount.with_sign_of(sign));
        for (line, amount) in lines.iter_mut().zip(amounts) {
            line.amount_currency = amount;
        }
        set_balances(&mut lines, currency, self.company_currency, self.rates, payment_date)?;

        debug!(
            invoice_id = invoice.id,
            discount = %allocation.discount,
            ratio = %ratio,
            lines = lines.len(),
            "write-off lines built"
        );

        Ok(lines)
    }

    /// rescale lines computed at the stored percentage to the dynamic one
    ///
    /// a zero stored percentage leaves the lines untouched.
    pub fn rescale(lines: Vec<WriteOffLine>, dynamic: Percentage, standard: Percentage) -> Vec<WriteOffLine> {
        if standard.is_zero() || dynamic == standard {
            return lines;
        }
        let factor = dynamic.value() / standard.value();
        Self::scale(lines, factor)
    }

    /// multiply both amounts of every line, unrounded
    pub fn scale(lines: Vec<WriteOffLine>, ratio: Decimal) -> Vec<WriteOffLine> {
        lines
            .into_iter()
            .map(|line| WriteOffLine {
                amount_currency: line.amount_currency * ratio,
                balance: line.balance * ratio,
                ..line
            })
            .collect()
    }
}

/// company-currency balances, the largest line taking the conversion drift
fn set_balances(
    lines: &mut [WriteOffLine],
    currency: &Currency,
    company_currency: &Currency,
    rates: &dyn ExchangeRates,
    on: NaiveDate,
) -> Result<()> {
    let total: Money = lines.iter().map(|l| l.amount_currency).sum();
    let target = rates.convert(total, currency, company_currency, on)?;

    let mut balances = Vec::with_capacity(lines.len());
    for line in lines.iter() {
        balances.push(rates.convert(line.amount_currency, currency, company_currency, on)?);
    }
    absorb_residue(&mut balances, target);

    for (line, balance) in lines.iter_mut().zip(balances) {
        line.balance = balance;
    }
    Ok(())
}

/// push the gap between `target` and the sum onto the largest amount
fn absorb_residue(amounts: &mut [Money], target: Money) {
    let drift = target - amounts.iter().sum::<Money>();
    if drift.is_zero() {
        return;
    }
    let largest = amounts
        .iter()
        .enumerate()
        .fold(None::<(usize, Money)>, |best, (i, amount)| match best {
            Some((_, top)) if top >= amount.abs() => best,
            _ => Some((i, amount.abs())),
        });
    if let Some((i, _)) = largest {
        amounts[i] += drift;
    }
}
