use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::invoice::Invoice;
use crate::payments::ProportionalAllocator;
use crate::types::InstallmentState;

/// serializable view of what the customer should pay next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextPaymentValues {
    pub installment_state: InstallmentState,
    pub next_amount_to_pay: Money,
    pub amount_due: Money,
    pub next_due_date: Option<NaiveDate>,
    pub discount_date: Option<NaiveDate>,
    pub epd_days_left: Option<i64>,
    pub epd_discount_amount_currency: Option<Money>,
    pub epd_discount_msg: Option<String>,
    pub has_extension: bool,
    pub epd_disabled_by_extension: bool,
    pub epd_disabled_by_overdue: bool,
    /// requested amount when it had to be cut to the residual
    pub clamped_from: Option<Money>,
}

impl NextPaymentValues {
    fn paid() -> Self {
        Self {
            installment_state: InstallmentState::Paid,
            next_amount_to_pay: Money::ZERO,
            amount_due: Money::ZERO,
            next_due_date: None,
            discount_date: None,
            epd_days_left: None,
            epd_discount_amount_currency: None,
            epd_discount_msg: None,
            has_extension: false,
            epd_disabled_by_extension: false,
            epd_disabled_by_overdue: false,
            clamped_from: None,
        }
    }

    pub fn has_discount(&self) -> bool {
        self.installment_state == InstallmentState::Epd
    }

    /// back to plain installment values: residual due, original due date
    fn drop_discount(&mut self, amount: Money, residual: Money, due_date: Option<NaiveDate>) {
        self.installment_state = InstallmentState::Next;
        self.next_amount_to_pay = amount;
        self.amount_due = residual;
        self.next_due_date = due_date;
        self.discount_date = None;
        self.epd_days_left = None;
        self.epd_discount_amount_currency = None;
        self.epd_discount_msg = None;
    }
}

/// values for the next payment of `invoice` as seen on `today`
///
/// a proposed amount above the residual is cut to the residual; the caller
/// records the warning.
pub fn suggested_payment_values(invoice: &Invoice, proposed: Option<Money>, today: NaiveDate) -> NextPaymentValues {
    let currency = &invoice.currency;
    if !invoice.is_posted() || invoice.is_paid() {
        return NextPaymentValues::paid();
    }

    let residual = invoice.residual_gross().abs();
    let (custom, clamped_from) = match proposed {
        Some(amount) => {
            let (amount, clamped) = ProportionalAllocator::clamp(amount.abs(), residual, currency);
            (Some(amount), if clamped { proposed } else { None })
        }
        None => (None, None),
    };

    let next_line = invoice.next_open_line();
    let line_residual = next_line
        .map(|l| l.amount_residual_currency.abs())
        .unwrap_or(residual);
    let due_date = next_line.map(|l| l.date_maturity).or_else(|| invoice.due_date());
    let plain_amount = custom.unwrap_or(line_residual);

    let mut values = NextPaymentValues {
        installment_state: InstallmentState::Next,
        next_amount_to_pay: plain_amount,
        amount_due: residual,
        next_due_date: due_date,
        discount_date: None,
        epd_days_left: None,
        epd_discount_amount_currency: None,
        epd_discount_msg: None,
        has_extension: false,
        epd_disabled_by_extension: false,
        epd_disabled_by_overdue: false,
        clamped_from,
    };

    let basis = ProportionalAllocator::basis(invoice, currency, today);
    if basis.has_discount() {
        let deadline = basis
            .tier
            .map(|t| t.deadline)
            .or_else(|| invoice.stored_discount_date());
        let suggested = basis.suggested_net(currency);
        let (to_pay, discount) = match custom {
            Some(amount) => (amount, basis.allocate(amount, currency).discount),
            None => (suggested, currency.round(residual - suggested)),
        };
        let days_left = deadline.map(|d| (d - today).num_days().max(0));

        values.installment_state = InstallmentState::Epd;
        values.next_amount_to_pay = to_pay;
        values.amount_due = suggested;
        values.next_due_date = deadline.or(due_date);
        values.discount_date = deadline;
        values.epd_days_left = days_left;
        values.epd_discount_amount_currency = Some(discount);
        values.epd_discount_msg = Some(discount_message(&currency.format(discount), days_left.unwrap_or(0)));
    } else if due_date.map_or(false, |due| due < today) {
        values.installment_state = InstallmentState::Overdue;
    }

    match invoice.latest_extension() {
        Some(extension) => {
            values.has_extension = true;
            values.epd_disabled_by_extension = !extension.keep_discount;
            if !extension.keep_discount && values.has_discount() {
                values.drop_discount(plain_amount, residual, due_date);
            }
            values.next_due_date = invoice.effective_due_date();
            if extension.extended_due_date < today {
                values.installment_state = InstallmentState::Overdue;
            } else if values.installment_state == InstallmentState::Overdue {
                values.installment_state = InstallmentState::Next;
            }
        }
        None => {
            if values.has_discount() && due_date.map_or(false, |due| due < today) {
                values.drop_discount(plain_amount, residual, due_date);
                values.installment_state = InstallmentState::Overdue;
                values.epd_disabled_by_overdue = true;
            }
        }
    }

    values
}

fn discount_message(amount: &str, days_left: i64) -> String {
    if days_left > 0 {
        format!("Discount of {} if paid within {} days", amount, days_left)
    } else {
        format!("Discount of {} if paid today", amount)
    }
}
