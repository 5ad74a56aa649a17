pub mod config;
pub mod currency;
pub mod decimal;
pub mod eligibility;
pub mod engine;
pub mod errors;
pub mod events;
pub mod invoice;
pub mod ledger;
pub mod payments;
pub mod portal;
pub mod schedule;
pub mod types;

// re-export key types
pub use config::{AccountsConfig, EngineConfig, JournalConfig};
pub use currency::{Currency, ExchangeRates, RateTable};
pub use decimal::{Money, Percentage};
pub use eligibility::EligibilityGate;
pub use engine::SettlementEngine;
pub use errors::{EpdError, Result};
pub use events::{Event, EventStore};
pub use invoice::{DueDateExtension, Invoice, InvoiceBuilder, InvoiceLine, ResidualView};
pub use ledger::{InMemoryLedger, Ledger, Message, MessageTarget, PartialReconcile};
pub use payments::{
    Allocation, DiscountBasis, MoveLine, MoveLineKind, MultiInvoiceSplitter, Payment,
    PaymentRequest, PaymentWizard, ProportionalAllocator, WizardValues, WriteOffBucket,
    WriteOffBuilder, WriteOffLine,
};
pub use portal::{suggested_payment_values, NextPaymentValues};
pub use schedule::{ApplicableTier, DiscountTier, Installment, PaymentTerm, TierSelector};
pub use types::{
    DelayRule, DifferenceHandling, DiscountComputation, ExtensionState, InstallmentState,
    InvoiceId, InvoiceState, MoveType, PaymentId, PaymentState, PaymentType,
};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
