use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::currency::Currency;
use crate::decimal::Money;
use crate::errors::{EpdError, Result};
use crate::invoice::Invoice;
use crate::payments::Payment;
use crate::types::{InvoiceId, LineId, PaymentId, PaymentState};

/// record an audit message is attached to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageTarget {
    Invoice(InvoiceId),
    Payment(PaymentId),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub target: MessageTarget,
    pub body: String,
}

/// amount matched between a payment and one invoice line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialReconcile {
    pub invoice_id: InvoiceId,
    pub line_id: LineId,
    pub amount: Money,
}

pub trait Ledger {
    /// snapshot of an invoice
    fn invoice(&self, id: InvoiceId) -> Result<Invoice>;

    fn payment(&self, id: PaymentId) -> Result<Payment>;

    fn create_payment(&mut self, payment: Payment) -> Result<PaymentId>;

    fn post_payment(&mut self, id: PaymentId) -> Result<()>;

    /// match a posted payment against its invoices' receivable lines
    ///
    /// reconciling an already reconciled payment returns its existing partials.
    fn reconcile(&mut self, id: PaymentId) -> Result<Vec<PartialReconcile>>;

    /// abort a payment, undoing its reconciliation
    fn cancel_payment(&mut self, id: PaymentId) -> Result<()>;

    fn post_message(&mut self, target: MessageTarget, body: &str);
}

/// ledger kept in memory
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    company_currency: Currency,
    invoices: BTreeMap<InvoiceId, Invoice>,
    payments: BTreeMap<PaymentId, Payment>,
    partials: HashMap<PaymentId, Vec<PartialReconcile>>,
    messages: Vec<Message>,
    rejected: BTreeSet<InvoiceId>,
}

impl InMemoryLedger {
    pub fn new(company_currency: Currency) -> Self {
        Self {
            company_currency,
            invoices: BTreeMap::new(),
            payments: BTreeMap::new(),
            partials: HashMap::new(),
            messages: Vec::new(),
            rejected: BTreeSet::new(),
        }
    }

    pub fn insert_invoice(&mut self, invoice: Invoice) {
        self.invoices.insert(invoice.id, invoice);
    }

    pub fn with_invoice(mut self, invoice: Invoice) -> Self {
        self.insert_invoice(invoice);
        self
    }

    pub fn invoices(&self) -> impl Iterator<Item = &Invoice> {
        self.invoices.values()
    }

    pub fn payments(&self) -> impl Iterator<Item = &Payment> {
        self.payments.values()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn messages_for(&self, target: &MessageTarget) -> Vec<&Message> {
        self.messages.iter().filter(|m| &m.target == target).collect()
    }

    /// make every reconciliation touching `invoice_id` fail
    pub fn reject_reconciliation_for(&mut self, invoice_id: InvoiceId) {
        self.rejected.insert(invoice_id);
    }

    fn payment_mut(&mut self, id: PaymentId) -> Result<&mut Payment> {
        self.payments
            .get_mut(&id)
            .ok_or(EpdError::PaymentNotFound { id })
    }
}

impl Ledger for InMemoryLedger {
    fn invoice(&self, id: InvoiceId) -> Result<Invoice> {
        self.invoices
            .get(&id)
            .cloned()
            .ok_or(EpdError::InvoiceNotFound { id })
    }

    fn payment(&self, id: PaymentId) -> Result<Payment> {
        self.payments
            .get(&id)
            .cloned()
            .ok_or(EpdError::PaymentNotFound { id })
    }

    fn create_payment(&mut self, payment: Payment) -> Result<PaymentId> {
        if payment.state != PaymentState::Created {
            return Err(EpdError::InvalidState {
                current: payment.state,
                expected: PaymentState::Created,
            });
        }
        if !payment.total_balance().is_zero() {
            return Err(EpdError::AmountMismatch {
                message: format!("payment entry is unbalanced by {}", payment.total_balance()),
            });
        }

        let id = payment.id;
        debug!(payment_id = %id, amount = %payment.amount, "payment created");
        self.payments.insert(id, payment);
        Ok(id)
    }

    fn post_payment(&mut self, id: PaymentId) -> Result<()> {
        self.payment_mut(id)?.transition(PaymentState::Posted)
    }

    fn reconcile(&mut self, id: PaymentId) -> Result<Vec<PartialReconcile>> {
        let payment = self.payment(id)?;
        match payment.state {
            PaymentState::Reconciled => {
                return Ok(self.partials.get(&id).cloned().unwrap_or_default());
            }
            PaymentState::Posted => {}
            current => {
                return Err(EpdError::InvalidState {
                    current,
                    expected: PaymentState::Posted,
                })
            }
        }

        let refuse = |message: String| EpdError::ReconciliationFailed { payment_id: id, message };

        // check everything before touching a line
        for settlement in &payment.settlements {
            let invoice = self
                .invoices
                .get(&settlement.invoice_id)
                .ok_or(EpdError::InvoiceNotFound { id: settlement.invoice_id })?;
            if self.rejected.contains(&invoice.id) {
                return Err(refuse(format!("lines of {} cannot be matched", invoice.name)));
            }
            if !invoice.is_posted() {
                return Err(EpdError::InvoiceNotPosted { id: invoice.id });
            }
            let settled = settlement.settled();
            if settled.is_positive() && invoice.is_paid() {
                return Err(refuse(format!("{} is already reconciled", invoice.name)));
            }
            let residual = invoice.residual_gross().abs();
            if invoice.currency.compare(settled, residual).is_gt() {
                return Err(refuse(format!(
                    "{} exceeds the residual {} of {}",
                    invoice.currency.format(settled),
                    invoice.currency.format(residual),
                    invoice.name
                )));
            }
        }

        let mut partials = Vec::new();
        for settlement in &payment.settlements {
            let company = &self.company_currency;
            let invoice = match self.invoices.get_mut(&settlement.invoice_id) {
                Some(invoice) => invoice,
                None => continue,
            };

            let currency = invoice.currency.clone();
            let mut remaining = settlement.settled();
            let mut order: Vec<usize> = (0..invoice.term_lines.len()).collect();
            order.sort_by_key(|&i| (invoice.term_lines[i].date_maturity, invoice.term_lines[i].id));

            for i in order {
                if remaining.is_zero() {
                    break;
                }
                let line = &mut invoice.term_lines[i];
                let applied = line.settle(remaining, &currency, company);
                if applied.is_zero() {
                    continue;
                }
                remaining -= applied;
                partials.push(PartialReconcile {
                    invoice_id: invoice.id,
                    line_id: line.id,
                    amount: applied,
                });
            }
        }

        self.payment_mut(id)?.transition(PaymentState::Reconciled)?;
        info!(payment_id = %id, partials = partials.len(), "payment reconciled");
        self.partials.insert(id, partials.clone());
        Ok(partials)
    }

    fn cancel_payment(&mut self, id: PaymentId) -> Result<()> {
        let state = self.payment(id)?.state;
        if state == PaymentState::Reconciled {
            let partials = self.partials.remove(&id).unwrap_or_default();
            for partial in partials {
                if let Some(invoice) = self.invoices.get_mut(&partial.invoice_id) {
                    let currency = invoice.currency.clone();
                    if let Some(line) = invoice.term_lines.iter_mut().find(|l| l.id == partial.line_id) {
                        line.unsettle(partial.amount, &currency, &self.company_currency);
                    }
                }
            }
        }

        self.payment_mut(id)?.transition(PaymentState::Aborted)?;
        debug!(payment_id = %id, "payment cancelled");
        Ok(())
    }

    fn post_message(&mut self, target: MessageTarget, body: &str) {
        self.messages.push(Message {
            target,
            body: body.to_string(),
        });
    }
}
