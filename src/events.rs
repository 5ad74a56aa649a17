use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Percentage};
use crate::types::{InvoiceId, PaymentId};

/// all events that can be emitted while settling payments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // discount events
    TierSelected {
        invoice_id: InvoiceId,
        percentage: Percentage,
        deadline: NaiveDate,
        payment_date: NaiveDate,
    },
    DiscountWrittenOff {
        payment_id: PaymentId,
        invoice_ids: Vec<InvoiceId>,
        amount: Money,
        line_count: usize,
        timestamp: DateTime<Utc>,
    },
    AmountClamped {
        invoice_id: InvoiceId,
        requested: Money,
        residual: Money,
        timestamp: DateTime<Utc>,
    },

    // payment lifecycle events
    PaymentCreated {
        payment_id: PaymentId,
        invoice_ids: Vec<InvoiceId>,
        amount: Money,
        payment_date: NaiveDate,
        timestamp: DateTime<Utc>,
    },
    PaymentPosted {
        payment_id: PaymentId,
        timestamp: DateTime<Utc>,
    },
    PaymentReconciled {
        payment_id: PaymentId,
        invoice_ids: Vec<InvoiceId>,
        settled: Money,
        timestamp: DateTime<Utc>,
    },
    OverpaymentLeftOpen {
        payment_id: PaymentId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    // split events
    SplitCompleted {
        payment_ids: Vec<PaymentId>,
        total: Money,
        timestamp: DateTime<Utc>,
    },
    SplitRolledBack {
        payment_ids: Vec<PaymentId>,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// event store for collecting events during operations
#[derive(Debug, Default)]
pub struct EventStore {
    events: Vec<Event>,
}

impl EventStore {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
        }
    }

    pub fn emit(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// number of events matching a predicate
    pub fn count_where<F: Fn(&Event) -> bool>(&self, predicate: F) -> usize {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}
