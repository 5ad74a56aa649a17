use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::decimal::Money;
use crate::errors::{EpdError, Result};

/// iso currency with its rounding precision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    pub decimal_places: u32,
}

impl Currency {
    pub fn new(code: &str, decimal_places: u32) -> Self {
        Self {
            code: code.to_string(),
            decimal_places,
        }
    }

    pub fn usd() -> Self {
        Self::new("USD", 2)
    }

    pub fn eur() -> Self {
        Self::new("EUR", 2)
    }

    /// round half away from zero at the currency precision
    pub fn round(&self, amount: Money) -> Money {
        Money::from_decimal(
            amount
                .as_decimal()
                .round_dp_with_strategy(self.decimal_places, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// zero once rounded to the currency precision
    pub fn is_zero(&self, amount: Money) -> bool {
        self.round(amount).is_zero()
    }

    /// compare two amounts at currency precision
    pub fn compare(&self, a: Money, b: Money) -> Ordering {
        let diff = self.round(a - b);
        if diff.is_zero() {
            Ordering::Equal
        } else if diff.is_negative() {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    /// smallest representable unit, e.g. 0.01
    pub fn unit(&self) -> Money {
        Money::from_decimal(Decimal::new(1, self.decimal_places))
    }

    /// `12.50 USD` style rendering used in audit messages
    pub fn format(&self, amount: Money) -> String {
        let rounded = self
            .round(amount)
            .as_decimal()
            .round_dp(self.decimal_places);
        format!("{:.*} {}", self.decimal_places as usize, rounded, self.code)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code)
    }
}

/// conversion between currencies on a given date
pub trait ExchangeRates {
    /// convert `amount` from one currency to another; the result is rounded to
    /// the target currency
    fn convert(&self, amount: Money, from: &Currency, to: &Currency, on: NaiveDate) -> Result<Money>;
}

/// static rate table: units of a currency per one unit of the company currency
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateTable {
    rates: HashMap<String, Decimal>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// register how many units of `code` buy one unit of the company currency
    pub fn with_rate(mut self, code: &str, units_per_company_unit: Decimal) -> Self {
        self.rates.insert(code.to_string(), units_per_company_unit);
        self
    }

    fn rate(&self, currency: &Currency) -> Option<Decimal> {
        self.rates.get(&currency.code).copied()
    }
}

impl ExchangeRates for RateTable {
    fn convert(&self, amount: Money, from: &Currency, to: &Currency, _on: NaiveDate) -> Result<Money> {
        if from == to {
            return Ok(to.round(amount));
        }

        // a currency missing from the table is the company currency (rate 1)
        let from_rate = self.rate(from).unwrap_or(Decimal::ONE);
        let to_rate = self.rate(to).unwrap_or(Decimal::ONE);
        if from_rate.is_zero() {
            return Err(EpdError::MissingExchangeRate {
                from: from.code.clone(),
                to: to.code.clone(),
            });
        }

        Ok(to.round(amount * (to_rate / from_rate)))
    }
}
