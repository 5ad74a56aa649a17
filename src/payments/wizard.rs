use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::currency::ExchangeRates;
use crate::decimal::Money;
use crate::errors::{EpdError, Result};
use crate::invoice::Invoice;
use crate::types::{DifferenceHandling, PaymentState};

use super::allocator::{Allocation, DiscountBasis, ProportionalAllocator};
use super::writeoff::{WriteOffBuilder, WriteOffLine};
use super::{InvoiceSettlement, MoveLine, MoveLineKind, Payment, PaymentRequest};

/// values the registration form shows for a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardValues {
    /// amount that settles every target invoice today
    pub amount_by_default: Money,
    pub epd_mode: bool,
    pub difference_handling: DifferenceHandling,
    /// discount the entered amount takes
    pub payment_difference: Money,
}

/// payment ready to be handed to the ledger
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentProposal {
    pub payment: Payment,
    pub bases: Vec<DiscountBasis>,
    pub allocations: Vec<Allocation>,
    pub write_offs: Vec<WriteOffLine>,
    pub values: WizardValues,
}

/// payment registration over a batch of invoices
pub struct PaymentWizard<'a> {
    config: &'a EngineConfig,
    rates: &'a dyn ExchangeRates,
}

impl<'a> PaymentWizard<'a> {
    pub fn new(config: &'a EngineConfig, rates: &'a dyn ExchangeRates) -> Self {
        Self { config, rates }
    }

    /// derived form values; nothing is mutated
    pub fn derive(&self, request: &PaymentRequest, invoices: &[Invoice]) -> Result<WizardValues> {
        let bases = self.bases(request, invoices)?;
        let allocations = self.allocate(request, &bases);
        Ok(self.values(request, &bases, &allocations))
    }

    /// write-off lines the request would book, in invoice id order
    pub fn write_offs(&self, request: &PaymentRequest, invoices: &[Invoice]) -> Result<Vec<WriteOffLine>> {
        let bases = self.bases(request, invoices)?;
        let allocations = self.allocate(request, &bases);
        self.build_write_offs(request, invoices, &bases, &allocations)
    }

    /// assemble the payment and its journal entry
    pub fn propose(&self, request: &PaymentRequest, invoices: &[Invoice]) -> Result<PaymentProposal> {
        if !request.amount.is_positive() {
            return Err(EpdError::InvalidPaymentAmount { amount: request.amount });
        }

        let bases = self.bases(request, invoices)?;
        let allocations = self.allocate(request, &bases);
        let values = self.values(request, &bases, &allocations);
        let write_offs = self.build_write_offs(request, invoices, &bases, &allocations)?;
        let payment = self.payment(request, invoices, &bases, &allocations, &write_offs)?;

        Ok(PaymentProposal {
            payment,
            bases,
            allocations,
            write_offs,
            values,
        })
    }

    /// discount basis of every invoice, after checking the batch is consistent
    ///
    /// invoices must be sorted by id, as loaded by the engine.
    fn bases(&self, request: &PaymentRequest, invoices: &[Invoice]) -> Result<Vec<DiscountBasis>> {
        request.validate()?;
        let first = invoices.first().ok_or(EpdError::EmptyRequest)?;

        for invoice in invoices {
            if !invoice.is_posted() {
                return Err(EpdError::InvoiceNotPosted { id: invoice.id });
            }
            if invoice.currency != request.currency {
                return Err(EpdError::CurrencyMismatch {
                    expected: request.currency.code.clone(),
                    found: invoice.currency.code.clone(),
                });
            }
            if invoice.move_type.payment_type() != first.move_type.payment_type() {
                return Err(EpdError::AmountMismatch {
                    message: "invoices and credit notes cannot share one payment".to_string(),
                });
            }
        }

        Ok(invoices
            .iter()
            .map(|invoice| ProportionalAllocator::basis(invoice, &request.currency, request.payment_date))
            .collect())
    }

    fn allocate(&self, request: &PaymentRequest, bases: &[DiscountBasis]) -> Vec<Allocation> {
        let shares = ProportionalAllocator::distribute(bases, request.amount, &request.currency);
        bases
            .iter()
            .zip(shares)
            .map(|(basis, share)| basis.allocate(share, &request.currency))
            .collect()
    }

    fn values(&self, request: &PaymentRequest, bases: &[DiscountBasis], allocations: &[Allocation]) -> WizardValues {
        let currency = &request.currency;
        let amount_by_default: Money = bases.iter().map(|b| b.suggested_net(currency)).sum();
        let epd_mode = bases.iter().any(|b| b.eligible) && !request.amount.is_zero();

        let difference_handling = if currency.compare(request.amount, amount_by_default).is_lt() {
            DifferenceHandling::Open
        } else {
            DifferenceHandling::Reconcile
        };

        let payment_difference = if request.amount.is_zero() {
            Money::ZERO
        } else {
            allocations.iter().map(|a| a.discount).sum()
        };

        WizardValues {
            amount_by_default,
            epd_mode,
            difference_handling,
            payment_difference,
        }
    }

    fn build_write_offs(
        &self,
        request: &PaymentRequest,
        invoices: &[Invoice],
        bases: &[DiscountBasis],
        allocations: &[Allocation],
    ) -> Result<Vec<WriteOffLine>> {
        let builder = WriteOffBuilder::new(
            &self.config.accounts.early_payment_discount_account,
            &self.config.company_currency,
            self.rates,
        );

        let mut lines = Vec::new();
        for ((invoice, basis), allocation) in invoices.iter().zip(bases).zip(allocations) {
            lines.extend(builder.build(invoice, basis, allocation, request.payment_date)?);
        }
        Ok(lines)
    }

    fn payment(
        &self,
        request: &PaymentRequest,
        invoices: &[Invoice],
        bases: &[DiscountBasis],
        allocations: &[Allocation],
        write_offs: &[WriteOffLine],
    ) -> Result<Payment> {
        let first = invoices.first().ok_or(EpdError::EmptyRequest)?;
        let payment_type = first.move_type.payment_type();
        let payment_method = self.config.journal.payment_method(payment_type)?.to_string();
        let sign: Decimal = first.direction_sign();
        let company = &self.config.company_currency;
        let date = request.payment_date;
        let memo = if request.memo.is_empty() {
            let names: Vec<&str> = invoices.iter().map(|i| i.name.as_str()).collect();
            names.join(", ")
        } else {
            request.memo.clone()
        };

        let convert = |amount: Money| self.rates.convert(amount, &request.currency, company, date);

        let amount = request.currency.round(request.amount);
        let mut move_lines = vec![MoveLine {
            kind: MoveLineKind::Liquidity,
            account: self.config.journal.liquidity_account.clone(),
            invoice_id: None,
            label: memo.clone(),
            amount_currency: amount.with_sign_of(sign),
            balance: convert(amount.with_sign_of(sign))?,
        }];

        let mut settlements = Vec::with_capacity(invoices.len());
        let mut excess = Money::ZERO;

        for ((invoice, basis), allocation) in invoices.iter().zip(bases).zip(allocations) {
            let mut written_off = Money::ZERO;
            for line in write_offs.iter().filter(|w| w.invoice_id == invoice.id) {
                written_off += line.balance;
                move_lines.push(MoveLine {
                    kind: MoveLineKind::WriteOff(line.bucket),
                    account: line.account.clone(),
                    invoice_id: Some(invoice.id),
                    label: line.label.clone(),
                    amount_currency: line.amount_currency,
                    balance: line.balance,
                });
            }

            let applied = allocation.applied.with_sign_of(sign);
            move_lines.push(MoveLine {
                kind: MoveLineKind::Counterpart,
                account: invoice.receivable_account.clone(),
                invoice_id: Some(invoice.id),
                label: format!("{} - {}", memo, invoice.name),
                amount_currency: -allocation.residual_reduction().with_sign_of(sign),
                balance: -(convert(applied)? + written_off),
            });

            settlements.push(InvoiceSettlement {
                invoice_id: invoice.id,
                applied: allocation.applied,
                discount: allocation.discount,
                tier: basis.tier,
            });
            excess += allocation.excess;
        }

        if excess.is_positive() {
            move_lines.push(MoveLine {
                kind: MoveLineKind::Overpayment,
                account: first.receivable_account.clone(),
                invoice_id: None,
                label: format!("{} (overpayment)", memo),
                amount_currency: -excess.with_sign_of(sign),
                balance: -convert(excess.with_sign_of(sign))?,
            });
        }

        // conversion drift goes to the open line, or the last counterpart
        let drift: Money = move_lines.iter().map(|l| l.balance).sum();
        if !drift.is_zero() {
            let target = move_lines
                .iter_mut()
                .rev()
                .find(|l| matches!(l.kind, MoveLineKind::Overpayment | MoveLineKind::Counterpart));
            if let Some(line) = target {
                line.balance -= drift;
            }
        }

        debug!(
            amount = %amount,
            invoices = invoices.len(),
            excess = %excess,
            "payment entry assembled"
        );

        Ok(Payment {
            id: Uuid::new_v4(),
            memo,
            journal: self.config.journal.code.clone(),
            payment_type,
            payment_method,
            amount,
            currency: request.currency.clone(),
            payment_date: date,
            state: PaymentState::Created,
            invoice_ids: invoices.iter().map(|i| i.id).collect(),
            settlements,
            move_lines,
            overpayment: excess,
        })
    }
}
