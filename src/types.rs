use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// invoice primary key; write-off and reconciliation order follows it
pub type InvoiceId = u64;

/// payment-term line identifier, unique within an invoice
pub type LineId = u64;

/// payment record identifier
pub type PaymentId = Uuid;

/// general ledger account code
pub type AccountCode = String;

/// accounting document type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveType {
    /// customer invoice
    OutInvoice,
    /// customer credit note
    OutRefund,
    /// vendor bill
    InInvoice,
    /// vendor credit note
    InRefund,
}

impl MoveType {
    /// sale-side documents are the only ones the discount engine settles
    pub fn is_sale_side(&self) -> bool {
        matches!(self, MoveType::OutInvoice | MoveType::OutRefund)
    }

    /// +1 when settling the document brings money in, -1 when it goes out
    pub fn direction_sign(&self) -> Decimal {
        match self {
            MoveType::OutInvoice | MoveType::InRefund => Decimal::ONE,
            MoveType::OutRefund | MoveType::InInvoice => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn payment_type(&self) -> PaymentType {
        if self.direction_sign().is_sign_positive() {
            PaymentType::Inbound
        } else {
            PaymentType::Outbound
        }
    }
}

/// how a discount deadline is derived from the invoice date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelayRule {
    DaysAfterIssue,
    DaysAfterEndOfMonth,
    DaysAfterEndOfNextMonth,
}

/// base the discount percentage applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DiscountComputation {
    /// percentage of the tax-inclusive total
    #[default]
    Included,
    /// percentage of the untaxed amount, taxes untouched
    Excluded,
    /// percentage of the untaxed amount, taxes computed on the discounted base
    Mixed,
}

/// money direction of a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentType {
    Inbound,
    Outbound,
}

impl PaymentType {
    pub fn sign(&self) -> Decimal {
        match self {
            PaymentType::Inbound => Decimal::ONE,
            PaymentType::Outbound => Decimal::NEGATIVE_ONE,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Inbound => "inbound",
            PaymentType::Outbound => "outbound",
        }
    }
}

/// what to do with the gap between the amount paid and the suggested amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DifferenceHandling {
    /// keep the invoice open for later payments
    Open,
    /// settle the invoice, writing off the discount
    Reconcile,
}

/// invoice lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvoiceState {
    Draft,
    Posted,
    Cancelled,
}

/// payment lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentState {
    Created,
    Posted,
    Reconciled,
    Aborted,
}

impl PaymentState {
    /// allowed forward transitions; `Aborted` is reachable from any non-final state
    pub fn can_transition_to(&self, next: PaymentState) -> bool {
        matches!(
            (self, next),
            (PaymentState::Created, PaymentState::Posted)
                | (PaymentState::Posted, PaymentState::Reconciled)
                | (PaymentState::Created, PaymentState::Aborted)
                | (PaymentState::Posted, PaymentState::Aborted)
                | (PaymentState::Reconciled, PaymentState::Aborted)
        )
    }

    pub fn is_final(&self) -> bool {
        matches!(self, PaymentState::Aborted)
    }
}

/// state of the next payment shown to the customer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallmentState {
    /// an early payment discount is on offer
    Epd,
    /// next installment is not yet due
    Next,
    /// next installment is past due
    Overdue,
    /// nothing left to pay
    Paid,
}

/// approval state of a due-date extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtensionState {
    Draft,
    Pending,
    Approved,
    Rejected,
}
