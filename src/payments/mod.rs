pub mod allocator;
pub mod split;
pub mod wizard;
pub mod writeoff;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::currency::Currency;
use crate::decimal::Money;
use crate::errors::{EpdError, Result};
use crate::schedule::ApplicableTier;
use crate::types::{AccountCode, InvoiceId, PaymentId, PaymentState, PaymentType};

pub use allocator::{Allocation, DiscountBasis, ProportionalAllocator};
pub use split::MultiInvoiceSplitter;
pub use wizard::{PaymentProposal, PaymentWizard, WizardValues};
pub use writeoff::{standard_write_off, WriteOffBucket, WriteOffBuilder, WriteOffLine};

/// payment registration request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub payment_date: NaiveDate,
    pub amount: Money,
    pub currency: Currency,
    pub invoice_ids: Vec<InvoiceId>,
    /// explicit amount per invoice; switches execution to one payment per invoice
    pub per_invoice_amounts: Option<BTreeMap<InvoiceId, Money>>,
    pub memo: String,
}

impl PaymentRequest {
    pub fn new(payment_date: NaiveDate, amount: Money, currency: Currency, invoice_ids: Vec<InvoiceId>) -> Self {
        Self {
            payment_date,
            amount,
            currency,
            invoice_ids,
            per_invoice_amounts: None,
            memo: String::new(),
        }
    }

    pub fn with_memo(mut self, memo: &str) -> Self {
        self.memo = memo.to_string();
        self
    }

    pub fn with_split(mut self, amounts: BTreeMap<InvoiceId, Money>) -> Self {
        self.per_invoice_amounts = Some(amounts);
        self
    }

    /// target invoices sorted by id, duplicates removed
    pub fn sorted_invoice_ids(&self) -> Vec<InvoiceId> {
        let mut ids = self.invoice_ids.clone();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn validate(&self) -> Result<()> {
        if self.invoice_ids.is_empty() {
            return Err(EpdError::EmptyRequest);
        }
        if self.amount.is_negative() {
            return Err(EpdError::InvalidPaymentAmount { amount: self.amount });
        }
        Ok(())
    }
}

/// what one payment does to one invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSettlement {
    pub invoice_id: InvoiceId,
    /// part of the payment applied to the residual
    pub applied: Money,
    /// discount written off against the residual
    pub discount: Money,
    pub tier: Option<ApplicableTier>,
}

impl InvoiceSettlement {
    /// total residual reduction
    pub fn settled(&self) -> Money {
        self.applied + self.discount
    }
}

/// role of a line in the payment journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoveLineKind {
    Liquidity,
    WriteOff(WriteOffBucket),
    /// receivable line matched against an invoice
    Counterpart,
    /// receivable left open on the payment
    Overpayment,
}

/// journal item of a payment entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveLine {
    pub kind: MoveLineKind,
    pub account: AccountCode,
    pub invoice_id: Option<InvoiceId>,
    pub label: String,
    pub amount_currency: Money,
    /// company currency
    pub balance: Money,
}

/// account payment with its journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub memo: String,
    pub journal: String,
    pub payment_type: PaymentType,
    pub payment_method: String,
    pub amount: Money,
    pub currency: Currency,
    pub payment_date: NaiveDate,
    pub state: PaymentState,
    pub invoice_ids: Vec<InvoiceId>,
    pub settlements: Vec<InvoiceSettlement>,
    pub move_lines: Vec<MoveLine>,
    pub overpayment: Money,
}

impl Payment {
    /// sum of balances; zero for a balanced entry
    pub fn total_balance(&self) -> Money {
        self.move_lines.iter().map(|l| l.balance).sum()
    }

    pub fn total_discount(&self) -> Money {
        self.settlements.iter().map(|s| s.discount).sum()
    }

    pub fn write_off_lines(&self) -> impl Iterator<Item = &MoveLine> {
        self.move_lines
            .iter()
            .filter(|l| matches!(l.kind, MoveLineKind::WriteOff(_)))
    }

    pub fn settlement_for(&self, invoice_id: InvoiceId) -> Option<&InvoiceSettlement> {
        self.settlements.iter().find(|s| s.invoice_id == invoice_id)
    }

    /// move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: PaymentState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(EpdError::InvalidState {
                current: self.state,
                expected: next,
            });
        }
        self.state = next;
        Ok(())
    }
}
