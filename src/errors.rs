use thiserror::Error;

use crate::decimal::Money;
use crate::types::{InvoiceId, PaymentId, PaymentState};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EpdError {
    #[error("invoice {invoice_id} is not eligible for an early payment discount: {reason}")]
    NotEligible {
        invoice_id: InvoiceId,
        reason: String,
    },

    #[error("amount mismatch: {message}")]
    AmountMismatch {
        message: String,
    },

    #[error("currency mismatch: expected {expected}, found {found}")]
    CurrencyMismatch {
        expected: String,
        found: String,
    },

    #[error("account mismatch: expected {expected}, found {found}")]
    AccountMismatch {
        expected: String,
        found: String,
    },

    #[error("no {direction} payment method configured on journal {journal}")]
    NoPaymentMethod {
        journal: String,
        direction: String,
    },

    #[error("reconciliation failed for payment {payment_id}: {message}")]
    ReconciliationFailed {
        payment_id: PaymentId,
        message: String,
    },

    #[error("invalid configuration: {message}")]
    ConfigurationError {
        message: String,
    },

    #[error("invalid discount tier: {message}")]
    InvalidDiscount {
        message: String,
    },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount {
        amount: Money,
    },

    #[error("invoice not found: {id}")]
    InvoiceNotFound {
        id: InvoiceId,
    },

    #[error("payment not found: {id}")]
    PaymentNotFound {
        id: PaymentId,
    },

    #[error("invoice {id} is not posted")]
    InvoiceNotPosted {
        id: InvoiceId,
    },

    #[error("invalid payment state: current {current:?}, expected {expected:?}")]
    InvalidState {
        current: PaymentState,
        expected: PaymentState,
    },

    #[error("no exchange rate from {from} to {to}")]
    MissingExchangeRate {
        from: String,
        to: String,
    },

    #[error("payment request has no target invoices")]
    EmptyRequest,
}

pub type Result<T> = std::result::Result<T, EpdError>;
