use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::currency::{Currency, ExchangeRates};
use crate::decimal::Money;
use crate::eligibility::EligibilityGate;
use crate::errors::{EpdError, Result};
use crate::events::{Event, EventStore};
use crate::invoice::Invoice;
use crate::ledger::{Ledger, MessageTarget};
use crate::payments::{
    MultiInvoiceSplitter, Payment, PaymentRequest, PaymentWizard, ProportionalAllocator,
    WizardValues, WriteOffLine,
};
use crate::portal::{self, NextPaymentValues};
use crate::types::InvoiceId;

/// early payment discount settlement over a ledger
pub struct SettlementEngine<L: Ledger, R: ExchangeRates> {
    pub config: EngineConfig,
    pub events: EventStore,
    ledger: L,
    rates: R,
}

impl<L: Ledger, R: ExchangeRates> SettlementEngine<L, R> {
    pub fn new(config: EngineConfig, ledger: L, rates: R) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            events: EventStore::new(),
            ledger,
            rates,
        })
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut L {
        &mut self.ledger
    }

    pub fn rates(&self) -> &R {
        &self.rates
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        self.events.take_events()
    }

    /// whether the invoice can still take its discount on `ref_date`
    pub fn eligible(&self, invoice_id: InvoiceId, currency: &Currency, ref_date: Option<NaiveDate>) -> Result<bool> {
        let invoice = self.ledger.invoice(invoice_id)?;
        Ok(EligibilityGate::eligible(&invoice, currency, ref_date))
    }

    /// portal values for the next payment, as of the provider's today
    ///
    /// a proposed amount above the residual is clamped and a warning is left
    /// on the invoice.
    pub fn suggested_payment_values(
        &mut self,
        invoice_id: InvoiceId,
        proposed: Option<Money>,
        time_provider: &SafeTimeProvider,
    ) -> Result<NextPaymentValues> {
        let invoice = self.ledger.invoice(invoice_id)?;
        let now = time_provider.now();
        let values = portal::suggested_payment_values(&invoice, proposed, now.date_naive());

        if let Some(requested) = values.clamped_from {
            let residual = invoice.residual_gross().abs();
            self.ledger.post_message(
                MessageTarget::Invoice(invoice_id),
                &format!(
                    "Requested amount {} exceeds the residual {}; {} will be charged",
                    invoice.currency.format(requested),
                    invoice.currency.format(residual),
                    invoice.currency.format(residual)
                ),
            );
            self.events.emit(Event::AmountClamped {
                invoice_id,
                requested,
                residual,
                timestamp: now,
            });
        }

        Ok(values)
    }

    /// derived registration form values for a request
    pub fn wizard_derived(&self, request: &PaymentRequest) -> Result<WizardValues> {
        let invoices = self.load(request)?;
        PaymentWizard::new(&self.config, &self.rates).derive(request, &invoices)
    }

    /// write-off lines the request would book
    pub fn build_write_offs(&self, request: &PaymentRequest) -> Result<Vec<WriteOffLine>> {
        let invoices = self.load(request)?;
        PaymentWizard::new(&self.config, &self.rates).write_offs(request, &invoices)
    }

    /// register the payment: one payment for the batch, or one per invoice when
    /// per-invoice amounts are given
    pub fn execute(&mut self, request: &PaymentRequest, time_provider: &SafeTimeProvider) -> Result<Vec<Payment>> {
        let invoices = self.load(request)?;

        if request.per_invoice_amounts.is_some() {
            let splitter = MultiInvoiceSplitter::new(&self.config, &self.rates);
            splitter.validate(request, &invoices)?;
            Self::emit_tiers(&mut self.events, request, &invoices);
            return splitter.execute(request, &mut self.ledger, time_provider, &mut self.events);
        }

        let proposal = PaymentWizard::new(&self.config, &self.rates).propose(request, &invoices)?;
        Self::emit_tiers(&mut self.events, request, &invoices);
        let payment = proposal.payment;
        let discount = payment.total_discount();
        let write_off_count = payment.write_off_lines().count();
        let overpayment = payment.overpayment;
        let invoice_ids = payment.invoice_ids.clone();

        let id = self.ledger.create_payment(payment)?;
        self.events.emit(Event::PaymentCreated {
            payment_id: id,
            invoice_ids: invoice_ids.clone(),
            amount: request.amount,
            payment_date: request.payment_date,
            timestamp: time_provider.now(),
        });

        let reconciled = match self.ledger.post_payment(id) {
            Ok(()) => {
                self.events.emit(Event::PaymentPosted {
                    payment_id: id,
                    timestamp: time_provider.now(),
                });
                self.ledger.reconcile(id)
            }
            Err(err) => Err(err),
        };

        let partials = match reconciled {
            Ok(partials) => partials,
            Err(err) => {
                warn!(payment_id = %id, error = %err, "payment aborted");
                if let Err(cancel_err) = self.ledger.cancel_payment(id) {
                    warn!(payment_id = %id, error = %cancel_err, "could not cancel payment");
                }
                for invoice_id in &invoice_ids {
                    self.ledger.post_message(
                        MessageTarget::Invoice(*invoice_id),
                        &format!("Payment {} could not be reconciled: {}", request.memo, err),
                    );
                }
                return Err(err);
            }
        };

        let settled: Money = partials.iter().map(|p| p.amount).sum();
        self.events.emit(Event::PaymentReconciled {
            payment_id: id,
            invoice_ids: invoice_ids.clone(),
            settled,
            timestamp: time_provider.now(),
        });
        if discount.is_positive() {
            self.events.emit(Event::DiscountWrittenOff {
                payment_id: id,
                invoice_ids,
                amount: discount,
                line_count: write_off_count,
                timestamp: time_provider.now(),
            });
        }
        if overpayment.is_positive() {
            self.events.emit(Event::OverpaymentLeftOpen {
                payment_id: id,
                amount: overpayment,
                timestamp: time_provider.now(),
            });
        }

        info!(payment_id = %id, settled = %settled, discount = %discount, "payment registered");
        Ok(vec![self.ledger.payment(id)?])
    }

    /// target invoices sorted by id
    fn load(&self, request: &PaymentRequest) -> Result<Vec<Invoice>> {
        let ids = request.sorted_invoice_ids();
        if ids.is_empty() {
            return Err(EpdError::EmptyRequest);
        }
        ids.into_iter().map(|id| self.ledger.invoice(id)).collect()
    }

    fn emit_tiers(events: &mut EventStore, request: &PaymentRequest, invoices: &[Invoice]) {
        for invoice in invoices {
            let basis = ProportionalAllocator::basis(invoice, &request.currency, request.payment_date);
            if let Some(applicable) = basis.tier {
                events.emit(Event::TierSelected {
                    invoice_id: invoice.id,
                    percentage: applicable.tier.percentage,
                    deadline: applicable.deadline,
                    payment_date: request.payment_date,
                });
            }
        }
    }
}
