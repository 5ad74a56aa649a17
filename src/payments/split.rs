use std::collections::{BTreeMap, BTreeSet};

use hourglass_rs::SafeTimeProvider;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::currency::ExchangeRates;
use crate::decimal::Money;
use crate::errors::{EpdError, Result};
use crate::events::{Event, EventStore};
use crate::invoice::Invoice;
use crate::ledger::{Ledger, MessageTarget};
use crate::types::{InvoiceId, PaymentId};

use super::wizard::PaymentWizard;
use super::{Payment, PaymentRequest};

/// turns one payment intent into one reconciled payment per invoice
pub struct MultiInvoiceSplitter<'a> {
    config: &'a EngineConfig,
    rates: &'a dyn ExchangeRates,
}

impl<'a> MultiInvoiceSplitter<'a> {
    pub fn new(config: &'a EngineConfig, rates: &'a dyn ExchangeRates) -> Self {
        Self { config, rates }
    }

    /// check the per-invoice amounts against the invoices, sorted by id
    pub fn validate(&self, request: &PaymentRequest, invoices: &[Invoice]) -> Result<BTreeMap<InvoiceId, Money>> {
        request.validate()?;
        let amounts = request
            .per_invoice_amounts
            .as_ref()
            .ok_or_else(|| EpdError::AmountMismatch {
                message: "no per-invoice amounts given".to_string(),
            })?;

        let targets: BTreeSet<InvoiceId> = request.invoice_ids.iter().copied().collect();
        let listed: BTreeSet<InvoiceId> = amounts.keys().copied().collect();
        if targets != listed || targets.len() != request.invoice_ids.len() {
            return Err(EpdError::AmountMismatch {
                message: "every target invoice must appear exactly once".to_string(),
            });
        }

        let first = invoices.first().ok_or(EpdError::EmptyRequest)?;
        let currency = &request.currency;

        for invoice in invoices {
            if invoice.currency != *currency {
                return Err(EpdError::CurrencyMismatch {
                    expected: currency.code.clone(),
                    found: invoice.currency.code.clone(),
                });
            }
            if invoice.receivable_account != first.receivable_account {
                return Err(EpdError::AccountMismatch {
                    expected: first.receivable_account.clone(),
                    found: invoice.receivable_account.clone(),
                });
            }

            let amount = amounts
                .get(&invoice.id)
                .copied()
                .ok_or(EpdError::InvoiceNotFound { id: invoice.id })?;
            if !amount.is_positive() {
                return Err(EpdError::InvalidPaymentAmount { amount });
            }
            let residual = invoice.residual_gross().abs();
            if currency.compare(amount, residual).is_gt() {
                return Err(EpdError::AmountMismatch {
                    message: format!(
                        "amount {} for {} exceeds its residual {}",
                        currency.format(amount),
                        invoice.name,
                        currency.format(residual)
                    ),
                });
            }
        }

        let total: Money = amounts.values().sum();
        if (total - request.amount).abs() > self.config.split_tolerance {
            return Err(EpdError::AmountMismatch {
                message: format!(
                    "split amounts add up to {} but the payment is {}",
                    currency.format(total),
                    currency.format(request.amount)
                ),
            });
        }

        Ok(amounts.clone())
    }

    /// create, post and reconcile one payment per invoice
    ///
    /// a failure at any step cancels every payment created so far.
    pub fn execute<L: Ledger + ?Sized>(
        &self,
        request: &PaymentRequest,
        ledger: &mut L,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) -> Result<Vec<Payment>> {
        let mut invoices = Vec::new();
        for id in request.sorted_invoice_ids() {
            invoices.push(ledger.invoice(id)?);
        }
        let amounts = self.validate(request, &invoices)?;

        let mut created: Vec<PaymentId> = Vec::new();
        for invoice in &invoices {
            let amount = amounts.get(&invoice.id).copied().unwrap_or(Money::ZERO);
            match self.settle_one(request, invoice, amount, ledger, time_provider, events, &mut created) {
                Ok(()) => {}
                Err(err) => {
                    self.rollback(&created, &invoices, &err, ledger, time_provider, events);
                    return Err(err);
                }
            }
        }

        events.emit(Event::SplitCompleted {
            payment_ids: created.clone(),
            total: request.amount,
            timestamp: time_provider.now(),
        });
        info!(payments = created.len(), total = %request.amount, "split payment completed");

        created.iter().map(|id| ledger.payment(*id)).collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn settle_one<L: Ledger + ?Sized>(
        &self,
        request: &PaymentRequest,
        invoice: &Invoice,
        amount: Money,
        ledger: &mut L,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
        created: &mut Vec<PaymentId>,
    ) -> Result<()> {
        let reference = if request.memo.is_empty() { "split" } else { request.memo.as_str() };
        let single = PaymentRequest {
            payment_date: request.payment_date,
            amount,
            currency: request.currency.clone(),
            invoice_ids: vec![invoice.id],
            per_invoice_amounts: None,
            memo: format!("{} - {}", reference, invoice.name),
        };

        let proposal = PaymentWizard::new(self.config, self.rates).propose(&single, std::slice::from_ref(invoice))?;
        let payment = proposal.payment;
        let discount = payment.total_discount();
        let write_off_count = payment.write_off_lines().count();
        let overpayment = payment.overpayment;

        let id = ledger.create_payment(payment)?;
        created.push(id);
        events.emit(Event::PaymentCreated {
            payment_id: id,
            invoice_ids: vec![invoice.id],
            amount,
            payment_date: request.payment_date,
            timestamp: time_provider.now(),
        });

        ledger.post_payment(id)?;
        events.emit(Event::PaymentPosted {
            payment_id: id,
            timestamp: time_provider.now(),
        });

        let partials = ledger.reconcile(id)?;
        let settled: Money = partials.iter().map(|p| p.amount).sum();
        events.emit(Event::PaymentReconciled {
            payment_id: id,
            invoice_ids: vec![invoice.id],
            settled,
            timestamp: time_provider.now(),
        });

        if discount.is_positive() {
            events.emit(Event::DiscountWrittenOff {
                payment_id: id,
                invoice_ids: vec![invoice.id],
                amount: discount,
                line_count: write_off_count,
                timestamp: time_provider.now(),
            });
        }
        if overpayment.is_positive() {
            events.emit(Event::OverpaymentLeftOpen {
                payment_id: id,
                amount: overpayment,
                timestamp: time_provider.now(),
            });
        }

        let body = format!(
            "The payment related to transaction {} has been posted: {} for {}",
            reference,
            request.currency.format(amount),
            invoice.name
        );
        ledger.post_message(MessageTarget::Invoice(invoice.id), &body);
        ledger.post_message(MessageTarget::Payment(id), &body);

        Ok(())
    }

    fn rollback<L: Ledger + ?Sized>(
        &self,
        created: &[PaymentId],
        invoices: &[Invoice],
        cause: &EpdError,
        ledger: &mut L,
        time_provider: &SafeTimeProvider,
        events: &mut EventStore,
    ) {
        for id in created.iter().rev() {
            if let Err(err) = ledger.cancel_payment(*id) {
                warn!(payment_id = %id, error = %err, "could not cancel split payment");
            }
        }

        let body = format!("Split payment rolled back: {}", cause);
        for invoice in invoices {
            ledger.post_message(MessageTarget::Invoice(invoice.id), &body);
        }

        warn!(payments = created.len(), error = %cause, "split payment rolled back");
        events.emit(Event::SplitRolledBack {
            payment_ids: created.to_vec(),
            reason: cause.to_string(),
            timestamp: time_provider.now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{Currency, RateTable};
    use crate::invoice::InvoiceBuilder;
    use crate::ledger::InMemoryLedger;
    use crate::types::{MoveType, PaymentState};
    use chrono::{NaiveDate, TimeZone, Utc};
    use hourglass_rs::TimeSource;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn time() -> SafeTimeProvider {
        SafeTimeProvider::new(TimeSource::Test(Utc.with_ymd_and_hms(2025, 1, 10, 9, 0, 0).unwrap()))
    }

    fn invoice(id: u64, amount: i64) -> Invoice {
        InvoiceBuilder::new(id, MoveType::OutInvoice, Currency::usd())
            .name(&format!("INV/2025/{:04}", id))
            .issue_date(d(2025, 1, 1))
            .line("413535", "frames", Money::from_major(amount))
            .post(d(2025, 1, 1), &Currency::usd(), &RateTable::new())
            .unwrap()
    }

    fn ledger() -> InMemoryLedger {
        InMemoryLedger::new(Currency::usd())
            .with_invoice(invoice(1, 300))
            .with_invoice(invoice(2, 700))
    }

    fn request(a: i64, b: i64, total: i64) -> PaymentRequest {
        let amounts = BTreeMap::from([(1, Money::from_major(a)), (2, Money::from_major(b))]);
        PaymentRequest::new(d(2025, 1, 10), Money::from_major(total), Currency::usd(), vec![1, 2])
            .with_memo("TX-900")
            .with_split(amounts)
    }

    #[test]
    fn test_split_creates_one_payment_per_invoice() {
        let config = EngineConfig::standard(Currency::usd());
        let rates = RateTable::new();
        let mut ledger = ledger();
        let mut events = EventStore::new();

        let payments = MultiInvoiceSplitter::new(&config, &rates)
            .execute(&request(200, 600, 800), &mut ledger, &time(), &mut events)
            .unwrap();

        assert_eq!(payments.len(), 2);
        assert!(payments.iter().all(|p| p.state == PaymentState::Reconciled));
        assert_eq!(payments[0].memo, "TX-900 - INV/2025/0001");
        assert_eq!(ledger.invoice(1).unwrap().residual_gross(), Money::from_major(100));
        assert_eq!(ledger.invoice(2).unwrap().residual_gross(), Money::from_major(100));
        assert_eq!(ledger.messages_for(&MessageTarget::Invoice(1)).len(), 1);
        assert_eq!(ledger.messages_for(&MessageTarget::Payment(payments[1].id)).len(), 1);
        assert_eq!(events.count_where(|e| matches!(e, Event::SplitCompleted { .. })), 1);
    }

    #[test]
    fn test_sum_mismatch_creates_nothing() {
        let config = EngineConfig::standard(Currency::usd());
        let rates = RateTable::new();
        let mut ledger = ledger();
        let mut events = EventStore::new();

        let err = MultiInvoiceSplitter::new(&config, &rates)
            .execute(&request(200, 500, 800), &mut ledger, &time(), &mut events)
            .unwrap_err();
        assert!(matches!(err, EpdError::AmountMismatch { .. }));
        assert_eq!(ledger.payments().count(), 0);
    }

    #[test]
    fn test_tolerance_accepts_one_cent() {
        let config = EngineConfig::standard(Currency::usd());
        let rates = RateTable::new();
        let splitter = MultiInvoiceSplitter::new(&config, &rates);
        let mut req = request(200, 600, 800);
        req.amount = Money::from_minor(80001, 2);
        assert!(splitter.validate(&req, &[invoice(1, 300), invoice(2, 700)]).is_ok());
    }

    #[test]
    fn test_amount_above_residual_rejected() {
        let config = EngineConfig::standard(Currency::usd());
        let rates = RateTable::new();
        let splitter = MultiInvoiceSplitter::new(&config, &rates);
        let err = splitter
            .validate(&request(400, 400, 800), &[invoice(1, 300), invoice(2, 700)])
            .unwrap_err();
        assert!(matches!(err, EpdError::AmountMismatch { .. }));
    }

    #[test]
    fn test_account_mismatch_rejected() {
        let config = EngineConfig::standard(Currency::usd());
        let rates = RateTable::new();
        let splitter = MultiInvoiceSplitter::new(&config, &rates);
        let mut other = invoice(2, 700);
        other.receivable_account = "130510".to_string();
        let err = splitter.validate(&request(200, 600, 800), &[invoice(1, 300), other]).unwrap_err();
        assert!(matches!(err, EpdError::AccountMismatch { .. }));
    }

    #[test]
    fn test_missing_target_rejected() {
        let config = EngineConfig::standard(Currency::usd());
        let rates = RateTable::new();
        let splitter = MultiInvoiceSplitter::new(&config, &rates);
        let mut req = request(200, 600, 800);
        req.invoice_ids = vec![1, 2, 3];
        assert!(splitter.validate(&req, &[invoice(1, 300), invoice(2, 700)]).is_err());
    }

    #[test]
    fn test_failed_reconciliation_rolls_back() {
        let config = EngineConfig::standard(Currency::usd());
        let rates = RateTable::new();
        let mut ledger = ledger();
        ledger.reject_reconciliation_for(2);
        let mut events = EventStore::new();

        let err = MultiInvoiceSplitter::new(&config, &rates)
            .execute(&request(200, 600, 800), &mut ledger, &time(), &mut events)
            .unwrap_err();

        assert!(matches!(err, EpdError::ReconciliationFailed { .. }));
        assert_eq!(ledger.invoice(1).unwrap().residual_gross(), Money::from_major(300));
        assert!(ledger.payments().all(|p| p.state == PaymentState::Aborted));
        assert_eq!(ledger.payments().count(), 2);
        assert_eq!(events.count_where(|e| matches!(e, Event::SplitRolledBack { .. })), 1);
    }
}
