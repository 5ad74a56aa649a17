use std::collections::BTreeMap;

use chrono::{NaiveDate, TimeZone, Utc};
use epd_settlement_rs::*;
use rust_decimal_macros::dec;

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn at(date: NaiveDate) -> SafeTimeProvider {
    SafeTimeProvider::new(TimeSource::Test(
        Utc.from_utc_datetime(&date.and_hms_opt(10, 0, 0).unwrap()),
    ))
}

fn money(s: &str) -> Money {
    Money::from_str_exact(s).unwrap()
}

fn ten_percent_term() -> PaymentTerm {
    PaymentTerm::net_days("30 days, 10% within 10 days", 30)
        .with_tier(DiscountTier::new(dec!(10), 10, DelayRule::DaysAfterIssue).unwrap())
}

fn two_tier_term() -> PaymentTerm {
    PaymentTerm::net_days("30 days, 10%/5%", 30)
        .with_tier(DiscountTier::new(dec!(10), 10, DelayRule::DaysAfterIssue).unwrap())
        .with_tier(DiscountTier::new(dec!(5), 20, DelayRule::DaysAfterIssue).unwrap())
}

fn post(id: InvoiceId, amount: i64, term: PaymentTerm) -> Invoice {
    InvoiceBuilder::new(id, MoveType::OutInvoice, Currency::usd())
        .name(&format!("INV/2025/{:04}", id))
        .issue_date(d(2025, 1, 1))
        .payment_term(term)
        .line("413535", "bicycles", Money::from_major(amount))
        .post(d(2025, 1, 1), &Currency::usd(), &RateTable::new())
        .unwrap()
}

fn engine(invoices: Vec<Invoice>) -> SettlementEngine<InMemoryLedger, RateTable> {
    let mut ledger = InMemoryLedger::new(Currency::usd());
    for invoice in invoices {
        ledger.insert_invoice(invoice);
    }
    SettlementEngine::new(EngineConfig::standard(Currency::usd()), ledger, RateTable::new()).unwrap()
}

fn pay(amount: &str, date: NaiveDate, ids: Vec<InvoiceId>) -> PaymentRequest {
    PaymentRequest::new(date, money(amount), Currency::usd(), ids).with_memo("BANK-TX")
}

fn residual(engine: &SettlementEngine<InMemoryLedger, RateTable>, id: InvoiceId) -> Money {
    engine.ledger().invoice(id).unwrap().residual_gross()
}

#[test]
fn test_scenario_a_single_partial_payment() {
    let mut engine = engine(vec![post(1, 1000, ten_percent_term())]);
    let date = d(2025, 1, 6);
    let request = pay("450", date, vec![1]);

    let values = engine.wizard_derived(&request).unwrap();
    assert_eq!(values.amount_by_default, money("900"));
    assert_eq!(values.payment_difference, money("50"));
    assert_eq!(values.difference_handling, DifferenceHandling::Open);
    assert!(values.epd_mode);

    let write_offs = engine.build_write_offs(&request).unwrap();
    let total: Money = write_offs.iter().map(|l| l.balance).sum();
    assert_eq!(total, money("50"));

    let payments = engine.execute(&request, &at(date)).unwrap();
    assert_eq!(payments[0].total_discount(), money("50"));
    assert!(payments[0].total_balance().is_zero());
    assert_eq!(residual(&engine, 1), money("500"));
}

#[test]
fn test_scenario_b_second_partial_settles() {
    let mut engine = engine(vec![post(1, 1000, ten_percent_term())]);
    engine.execute(&pay("450", d(2025, 1, 6), vec![1]), &at(d(2025, 1, 6))).unwrap();

    let date = d(2025, 1, 9);
    let second = pay("500", date, vec![1]);
    let values = engine.wizard_derived(&second).unwrap();
    assert_eq!(values.amount_by_default, money("450"));
    assert_eq!(values.difference_handling, DifferenceHandling::Reconcile);

    let payments = engine.execute(&second, &at(date)).unwrap();
    assert_eq!(payments[0].total_discount(), money("50"));
    assert_eq!(payments[0].overpayment, money("50"));
    assert!(residual(&engine, 1).is_zero());

    let discounts: Money = engine.ledger().payments().map(|p| p.total_discount()).sum();
    assert_eq!(discounts, money("100"));
    assert!(engine.ledger().invoice(1).unwrap().is_paid());
}

#[test]
fn test_scenario_c_tier_escalation_by_date() {
    let mut engine = engine(vec![post(1, 2000, two_tier_term())]);

    let first_date = d(2025, 1, 9);
    let first = engine.execute(&pay("1000", first_date, vec![1]), &at(first_date)).unwrap();
    // 10% tier: 200 × 1000 / 1800
    assert_eq!(first[0].total_discount(), money("111.11"));
    assert_eq!(first[0].settlements[0].tier.map(|t| t.tier.percentage), Some(Percentage::from_percent(10)));
    assert_eq!(residual(&engine, 1), money("888.89"));

    let second_date = d(2025, 1, 19);
    let remainder = pay("844.45", second_date, vec![1]);
    assert_eq!(engine.wizard_derived(&remainder).unwrap().amount_by_default, money("844.45"));

    let second = engine.execute(&remainder, &at(second_date)).unwrap();
    assert_eq!(second[0].settlements[0].tier.map(|t| t.tier.percentage), Some(Percentage::from_percent(5)));
    assert_eq!(second[0].total_discount(), money("44.44"));
    assert!(residual(&engine, 1).is_zero());

    let paid: Money = engine.ledger().payments().map(|p| p.amount).sum();
    let discounts: Money = engine.ledger().payments().map(|p| p.total_discount()).sum();
    assert_eq!(paid + discounts, money("2000"));
}

#[test]
fn test_scenario_d_multi_invoice_split() {
    let net = PaymentTerm::net_days("30 days", 30);
    let mut engine = engine(vec![post(1, 300, net.clone()), post(2, 700, net)]);
    let date = d(2025, 1, 10);
    let request = pay("800", date, vec![1, 2])
        .with_split(BTreeMap::from([(1, money("200")), (2, money("600"))]));

    let payments = engine.execute(&request, &at(date)).unwrap();
    assert_eq!(payments.len(), 2);
    assert_eq!(payments[0].amount, money("200"));
    assert_eq!(payments[1].amount, money("600"));
    assert!(payments.iter().all(|p| p.state == PaymentState::Reconciled && p.invoice_ids.len() == 1));
    assert_eq!(residual(&engine, 1), money("100"));
    assert_eq!(residual(&engine, 2), money("100"));
}

#[test]
fn test_scenario_e_split_sum_mismatch() {
    let net = PaymentTerm::net_days("30 days", 30);
    let mut engine = engine(vec![post(1, 300, net.clone()), post(2, 700, net)]);
    let date = d(2025, 1, 10);
    let request = pay("800", date, vec![1, 2])
        .with_split(BTreeMap::from([(1, money("200")), (2, money("500"))]));

    let err = engine.execute(&request, &at(date)).unwrap_err();
    assert!(matches!(err, EpdError::AmountMismatch { .. }));
    assert_eq!(engine.ledger().payments().count(), 0);
    assert_eq!(residual(&engine, 1), money("300"));
}

#[test]
fn test_scenario_f_no_tier_applicable() {
    let mut engine = engine(vec![post(1, 1000, two_tier_term())]);
    let date = d(2025, 1, 25);

    assert!(!engine.eligible(1, &Currency::usd(), Some(date)).unwrap());

    let request = pay("400", date, vec![1]);
    let values = engine.wizard_derived(&request).unwrap();
    assert_eq!(values.amount_by_default, money("1000"));
    assert!(!values.epd_mode);
    assert!(values.payment_difference.is_zero());
    assert!(engine.build_write_offs(&request).unwrap().is_empty());

    let payments = engine.execute(&request, &at(date)).unwrap();
    assert!(payments[0].total_discount().is_zero());
    assert_eq!(residual(&engine, 1), money("600"));
}

#[test]
fn test_credit_note_partial_refund() {
    let refund = InvoiceBuilder::new(5, MoveType::OutRefund, Currency::usd())
        .issue_date(d(2025, 1, 1))
        .payment_term(ten_percent_term())
        .line("417505", "returned wheels", Money::from_major(400))
        .post(d(2025, 1, 1), &Currency::usd(), &RateTable::new())
        .unwrap();
    let mut engine = engine(vec![refund]);
    let date = d(2025, 1, 3);

    let payments = engine.execute(&pay("180", date, vec![5]), &at(date)).unwrap();
    let payment = &payments[0];
    assert_eq!(payment.payment_type, PaymentType::Outbound);
    assert_eq!(payment.total_discount(), money("20"));
    assert!(payment.write_off_lines().all(|l| l.balance.is_negative()));
    assert!(payment.total_balance().is_zero());
    assert_eq!(residual(&engine, 5), money("-200"));
}

#[test]
fn test_foreign_currency_payment_balances_in_company_currency() {
    let eur = Currency::eur();
    let rates = RateTable::new().with_rate("EUR", dec!(0.9));
    let invoice = InvoiceBuilder::new(8, MoveType::OutInvoice, eur.clone())
        .issue_date(d(2025, 1, 1))
        .payment_term(ten_percent_term())
        .taxed_line("413535", "e-bike", Money::from_major(833), "VAT 19%", "240805", Percentage::from_percent(19))
        .post(d(2025, 1, 1), &Currency::usd(), &rates)
        .unwrap();

    let ledger = InMemoryLedger::new(Currency::usd()).with_invoice(invoice);
    let mut engine = SettlementEngine::new(EngineConfig::standard(Currency::usd()), ledger, rates).unwrap();

    let date = d(2025, 1, 4);
    let request = PaymentRequest::new(date, money("333.33"), eur, vec![8]);
    let payments = engine.execute(&request, &at(date)).unwrap();

    assert!(payments[0].total_balance().is_zero());
    assert!(payments[0].total_discount().is_positive());
}

#[test]
fn test_portal_values_follow_payments() {
    let mut engine = engine(vec![post(1, 1000, ten_percent_term())]);
    let date = d(2025, 1, 6);

    let before = engine.suggested_payment_values(1, None, &at(date)).unwrap();
    assert_eq!(before.installment_state, InstallmentState::Epd);
    assert_eq!(before.next_amount_to_pay, money("900"));
    assert_eq!(before.epd_discount_msg.as_deref(), Some("Discount of 100.00 USD if paid within 5 days"));

    engine.execute(&pay("450", date, vec![1]), &at(date)).unwrap();

    let after = engine.suggested_payment_values(1, None, &at(date)).unwrap();
    assert_eq!(after.next_amount_to_pay, money("450"));
    assert_eq!(after.epd_discount_amount_currency, Some(money("50")));
    assert_eq!(after.amount_due, money("450"));
    assert_eq!(after.next_due_date, Some(d(2025, 1, 11)));
}

#[test]
fn test_config_round_trips_through_json() {
    let config = EngineConfig::standard(Currency::new("COP", 2));
    let loaded = EngineConfig::from_json(&config.to_json()).unwrap();
    assert_eq!(loaded.journal.code, "BNK1");
    assert_eq!(loaded.company_currency, Currency::new("COP", 2));
}
