use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::currency::{Currency, ExchangeRates};
use crate::decimal::{Money, Percentage};
use crate::errors::{EpdError, Result};
use crate::schedule::PaymentTerm;
use crate::types::{
    AccountCode, DiscountComputation, ExtensionState, InvoiceId, InvoiceState, LineId, MoveType,
};

/// receivable line of an invoice, one per installment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceLine {
    pub id: LineId,
    pub account: AccountCode,
    pub date_maturity: NaiveDate,
    /// signed gross in invoice currency
    pub amount_currency: Money,
    /// signed gross in company currency
    pub balance: Money,
    pub amount_residual_currency: Money,
    pub amount_residual: Money,
    /// signed net after the stored discount
    pub discount_amount_currency: Money,
    pub discount_balance: Money,
    pub discount_date: Option<NaiveDate>,
}

impl InvoiceLine {
    pub fn is_reconciled(&self, currency: &Currency) -> bool {
        currency.is_zero(self.amount_residual_currency)
    }

    /// settle up to `amount` (a magnitude) of this line, returning what was applied
    ///
    /// the residual keeps the sign of the gross and never crosses zero.
    pub fn settle(&mut self, amount: Money, currency: &Currency, company_currency: &Currency) -> Money {
        let open = self.amount_residual_currency.abs();
        let applied = amount.abs().min(open);
        if applied.is_zero() {
            return Money::ZERO;
        }

        let sign = self.amount_currency.signum();
        self.amount_residual_currency = currency.round(self.amount_residual_currency - applied.with_sign_of(sign));
        self.sync_company_residual(company_currency);
        applied
    }

    /// give back `amount` (a magnitude) previously settled, capped at the original gross
    pub fn unsettle(&mut self, amount: Money, currency: &Currency, company_currency: &Currency) {
        let sign = self.amount_currency.signum();
        let restored = (self.amount_residual_currency.abs() + amount.abs()).min(self.amount_currency.abs());
        self.amount_residual_currency = currency.round(restored.with_sign_of(sign));
        self.sync_company_residual(company_currency);
    }

    fn sync_company_residual(&mut self, company_currency: &Currency) {
        self.amount_residual = match self.amount_residual_currency.ratio_to(self.amount_currency) {
            Some(ratio) => company_currency.round(self.balance * ratio),
            None => Money::ZERO,
        };
    }
}

/// untaxed revenue grouped by account; amounts are magnitudes, the sign comes from the move type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseBucket {
    pub account: AccountCode,
    pub label: String,
    pub amount_currency: Money,
}

/// tax amount grouped by tax; magnitudes like [`BaseBucket`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxBucket {
    pub tax_name: String,
    pub account: AccountCode,
    pub rate: Percentage,
    pub amount_currency: Money,
}

/// request to push the due date of an invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueDateExtension {
    pub id: u64,
    pub state: ExtensionState,
    pub active: bool,
    pub extended_due_date: NaiveDate,
    /// the early payment discount stays available during the extension
    pub keep_discount: bool,
}

/// posted or draft customer document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub name: String,
    pub move_type: MoveType,
    pub state: InvoiceState,
    pub currency: Currency,
    pub issue_date: Option<NaiveDate>,
    pub payment_term: Option<PaymentTerm>,
    /// discount percentage stored on the term lines at posting
    pub stored_percentage: Option<Percentage>,
    pub receivable_account: AccountCode,
    pub term_lines: Vec<InvoiceLine>,
    pub base_lines: Vec<BaseBucket>,
    pub tax_lines: Vec<TaxBucket>,
    pub extensions: Vec<DueDateExtension>,
}

impl Invoice {
    pub fn is_posted(&self) -> bool {
        self.state == InvoiceState::Posted
    }

    pub fn direction_sign(&self) -> Decimal {
        self.move_type.direction_sign()
    }

    /// signed gross at posting time
    pub fn original_gross(&self) -> Money {
        self.term_lines.iter().map(|l| l.amount_currency).sum()
    }

    /// signed net under the discount stored at posting time
    pub fn original_net_stored(&self) -> Money {
        self.term_lines.iter().map(|l| l.discount_amount_currency).sum()
    }

    /// signed residual in invoice currency
    pub fn residual_gross(&self) -> Money {
        self.term_lines.iter().map(|l| l.amount_residual_currency).sum()
    }

    /// signed residual in company currency
    pub fn residual_company(&self) -> Money {
        self.term_lines.iter().map(|l| l.amount_residual).sum()
    }

    pub fn amount_untaxed(&self) -> Money {
        self.base_lines.iter().map(|b| b.amount_currency).sum()
    }

    pub fn amount_tax(&self) -> Money {
        self.tax_lines.iter().map(|t| t.amount_currency).sum()
    }

    /// unsigned tax-inclusive total
    pub fn amount_total(&self) -> Money {
        self.amount_untaxed() + self.amount_tax()
    }

    pub fn is_paid(&self) -> bool {
        self.term_lines.iter().all(|line| line.is_reconciled(&self.currency))
    }

    /// stored discount deadline of the first term line
    pub fn stored_discount_date(&self) -> Option<NaiveDate> {
        self.term_lines.first().and_then(|line| line.discount_date)
    }

    /// latest installment date
    pub fn due_date(&self) -> Option<NaiveDate> {
        self.term_lines.iter().map(|l| l.date_maturity).max()
    }

    /// earliest installment still open
    pub fn next_open_line(&self) -> Option<&InvoiceLine> {
        self.term_lines
            .iter()
            .filter(|line| !line.is_reconciled(&self.currency))
            .min_by_key(|line| (line.date_maturity, line.id))
    }

    /// most recent approved, active extension
    pub fn latest_extension(&self) -> Option<&DueDateExtension> {
        self.extensions
            .iter()
            .filter(|e| e.active && e.state == ExtensionState::Approved)
            .max_by_key(|e| e.extended_due_date)
    }

    /// extended due date when an extension applies, the original one otherwise
    pub fn effective_due_date(&self) -> Option<NaiveDate> {
        self.latest_extension()
            .map(|e| e.extended_due_date)
            .or_else(|| self.due_date())
    }

    pub fn residual_view(&self) -> ResidualView {
        ResidualView::of(self)
    }
}

/// read-only snapshot of the amounts the allocator works with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualView {
    pub invoice_id: InvoiceId,
    pub direction_sign: Decimal,
    /// magnitude of the gross at posting
    pub original_gross: Money,
    /// magnitude of the stored discounted net
    pub original_net_stored: Money,
    /// magnitude still owed
    pub residual: Money,
    pub line_residuals: Vec<(LineId, Money)>,
}

impl ResidualView {
    pub fn of(invoice: &Invoice) -> Self {
        Self {
            invoice_id: invoice.id,
            direction_sign: invoice.direction_sign(),
            original_gross: invoice.original_gross().abs(),
            original_net_stored: invoice.original_net_stored().abs(),
            residual: invoice.residual_gross().abs(),
            line_residuals: invoice
                .term_lines
                .iter()
                .map(|l| (l.id, l.amount_residual_currency))
                .collect(),
        }
    }

    /// discount stored at posting
    pub fn original_discount_stored(&self) -> Money {
        self.original_gross - self.original_net_stored
    }
}

struct ProductLine {
    account: AccountCode,
    label: String,
    untaxed: Money,
    tax: Option<(String, AccountCode, Percentage)>,
}

/// assembles and posts invoices
pub struct InvoiceBuilder {
    id: InvoiceId,
    name: Option<String>,
    move_type: MoveType,
    currency: Currency,
    issue_date: Option<NaiveDate>,
    payment_term: Option<PaymentTerm>,
    receivable_account: AccountCode,
    products: Vec<ProductLine>,
    extensions: Vec<DueDateExtension>,
}

impl InvoiceBuilder {
    pub fn new(id: InvoiceId, move_type: MoveType, currency: Currency) -> Self {
        Self {
            id,
            name: None,
            move_type,
            currency,
            issue_date: None,
            payment_term: None,
            receivable_account: "130505".to_string(),
            products: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn issue_date(mut self, date: NaiveDate) -> Self {
        self.issue_date = Some(date);
        self
    }

    pub fn payment_term(mut self, term: PaymentTerm) -> Self {
        self.payment_term = Some(term);
        self
    }

    pub fn receivable_account(mut self, account: &str) -> Self {
        self.receivable_account = account.to_string();
        self
    }

    /// untaxed product line
    pub fn line(mut self, account: &str, label: &str, untaxed: Money) -> Self {
        self.products.push(ProductLine {
            account: account.to_string(),
            label: label.to_string(),
            untaxed: untaxed.abs(),
            tax: None,
        });
        self
    }

    /// product line with one tax
    pub fn taxed_line(
        mut self,
        account: &str,
        label: &str,
        untaxed: Money,
        tax_name: &str,
        tax_account: &str,
        rate: Percentage,
    ) -> Self {
        self.products.push(ProductLine {
            account: account.to_string(),
            label: label.to_string(),
            untaxed: untaxed.abs(),
            tax: Some((tax_name.to_string(), tax_account.to_string(), rate)),
        });
        self
    }

    pub fn extension(mut self, extension: DueDateExtension) -> Self {
        self.extensions.push(extension);
        self
    }

    /// invoice in draft, without receivable lines
    pub fn draft(self) -> Invoice {
        let (base_lines, tax_lines) = Self::buckets(&self.products, &self.currency, None);
        Invoice {
            id: self.id,
            name: self.name.unwrap_or_else(|| format!("INV/{}", self.id)),
            move_type: self.move_type,
            state: InvoiceState::Draft,
            currency: self.currency,
            issue_date: self.issue_date,
            payment_term: self.payment_term,
            stored_percentage: None,
            receivable_account: self.receivable_account,
            term_lines: Vec::new(),
            base_lines,
            tax_lines,
            extensions: self.extensions,
        }
    }

    /// post the invoice: compute taxes, receivable lines and the stored discount
    ///
    /// `accounting_date` stands in for the issue date when none is set.
    pub fn post(
        self,
        accounting_date: NaiveDate,
        company_currency: &Currency,
        rates: &dyn ExchangeRates,
    ) -> Result<Invoice> {
        if self.products.is_empty() {
            return Err(EpdError::ConfigurationError {
                message: "cannot post an invoice without lines".to_string(),
            });
        }

        let reference = self.issue_date.unwrap_or(accounting_date);
        let term = self
            .payment_term
            .clone()
            .unwrap_or_else(|| PaymentTerm::net_days("immediate", 0));
        term.validate(reference)?;

        let stored = term.stored_discount(reference);
        let mixed_pct = match (term.computation, stored) {
            (DiscountComputation::Mixed, Some((pct, _))) => Some(pct),
            _ => None,
        };

        let (base_lines, tax_lines) = Self::buckets(&self.products, &self.currency, mixed_pct);
        let untaxed: Money = base_lines.iter().map(|b| b.amount_currency).sum();
        let tax: Money = tax_lines.iter().map(|t| t.amount_currency).sum();
        let total = untaxed + tax;
        let sign = self.move_type.direction_sign();
        let gross = total.with_sign_of(sign);

        let amounts = term.split_amount(gross, &self.currency);
        let mut term_lines = Vec::with_capacity(amounts.len());
        for (i, (installment, amount)) in term.installments.iter().zip(amounts).enumerate() {
            let (net, discount_date) = match stored {
                Some((pct, date)) => {
                    let net_magnitude = match term.computation {
                        DiscountComputation::Included => {
                            self.currency.round(amount.abs() * pct.complement_fraction())
                        }
                        DiscountComputation::Excluded | DiscountComputation::Mixed => {
                            // the untaxed discount is shared across installments by gross
                            let share = amount.abs().ratio_to(total).unwrap_or(Decimal::ZERO);
                            amount.abs() - self.currency.round(untaxed.percentage(pct) * share)
                        }
                    };
                    (net_magnitude.with_sign_of(sign), Some(date))
                }
                None => (amount, None),
            };

            let balance = rates.convert(amount, &self.currency, company_currency, reference)?;
            let discount_balance = rates.convert(net, &self.currency, company_currency, reference)?;

            term_lines.push(InvoiceLine {
                id: i as LineId + 1,
                account: self.receivable_account.clone(),
                date_maturity: installment.due_date(reference),
                amount_currency: amount,
                balance,
                amount_residual_currency: amount,
                amount_residual: balance,
                discount_amount_currency: net,
                discount_balance,
                discount_date,
            });
        }

        Ok(Invoice {
            id: self.id,
            name: self.name.unwrap_or_else(|| format!("INV/{}", self.id)),
            move_type: self.move_type,
            state: InvoiceState::Posted,
            currency: self.currency,
            issue_date: self.issue_date,
            payment_term: self.payment_term,
            stored_percentage: stored.map(|(pct, _)| pct),
            receivable_account: self.receivable_account,
            term_lines,
            base_lines,
            tax_lines,
            extensions: self.extensions,
        })
    }

    fn buckets(
        products: &[ProductLine],
        currency: &Currency,
        mixed_discount: Option<Percentage>,
    ) -> (Vec<BaseBucket>, Vec<TaxBucket>) {
        let mut base: Vec<BaseBucket> = Vec::new();
        let mut taxes: Vec<TaxBucket> = Vec::new();

        for product in products {
            match base.iter_mut().find(|b| b.account == product.account) {
                Some(bucket) => bucket.amount_currency += product.untaxed,
                None => base.push(BaseBucket {
                    account: product.account.clone(),
                    label: product.label.clone(),
                    amount_currency: product.untaxed,
                }),
            }

            if let Some((name, account, rate)) = &product.tax {
                // mixed computation taxes the discounted base
                let taxable = match mixed_discount {
                    Some(pct) => product.untaxed - product.untaxed.percentage(pct),
                    None => product.untaxed,
                };
                let amount = taxable.percentage(*rate);
                match taxes.iter_mut().find(|t| &t.tax_name == name) {
                    Some(bucket) => bucket.amount_currency += amount,
                    None => taxes.push(TaxBucket {
                        tax_name: name.clone(),
                        account: account.clone(),
                        rate: *rate,
                        amount_currency: amount,
                    }),
                }
            }
        }

        for bucket in &mut base {
            bucket.amount_currency = currency.round(bucket.amount_currency);
        }
        for bucket in &mut taxes {
            bucket.amount_currency = currency.round(bucket.amount_currency);
        }

        (base, taxes)
    }
}
