use serde::{Deserialize, Serialize};

use crate::currency::Currency;
use crate::decimal::Money;
use crate::errors::{EpdError, Result};
use crate::types::{AccountCode, PaymentType};

/// settlement engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub company_currency: Currency,
    pub journal: JournalConfig,
    pub accounts: AccountsConfig,
    /// accepted gap between the sum of split amounts and the payment total
    pub split_tolerance: Money,
}

/// bank journal the payments are registered in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalConfig {
    pub code: String,
    pub liquidity_account: AccountCode,
    pub inbound_methods: Vec<String>,
    pub outbound_methods: Vec<String>,
}

impl JournalConfig {
    /// first payment method usable for the given direction
    pub fn payment_method(&self, payment_type: PaymentType) -> Result<&str> {
        let methods = match payment_type {
            PaymentType::Inbound => &self.inbound_methods,
            PaymentType::Outbound => &self.outbound_methods,
        };

        methods
            .first()
            .map(String::as_str)
            .ok_or_else(|| EpdError::NoPaymentMethod {
                journal: self.code.clone(),
                direction: payment_type.as_str().to_string(),
            })
    }
}

/// accounts the engine posts to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// expense account absorbing the untaxed part of a customer discount
    pub early_payment_discount_account: AccountCode,
}

impl EngineConfig {
    /// single bank journal with manual in/out methods
    pub fn standard(company_currency: Currency) -> Self {
        let split_tolerance = company_currency.unit();
        Self {
            company_currency,
            journal: JournalConfig {
                code: "BNK1".to_string(),
                liquidity_account: "110510".to_string(),
                inbound_methods: vec!["manual_in".to_string()],
                outbound_methods: vec!["manual_out".to_string()],
            },
            accounts: AccountsConfig {
                early_payment_discount_account: "530535".to_string(),
            },
            split_tolerance,
        }
    }

    /// load from a json document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).map_err(|e| EpdError::ConfigurationError {
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn validate(&self) -> Result<()> {
        if self.split_tolerance.is_negative() {
            return Err(EpdError::ConfigurationError {
                message: "split tolerance cannot be negative".to_string(),
            });
        }
        if self.journal.liquidity_account.is_empty()
            || self.accounts.early_payment_discount_account.is_empty()
        {
            return Err(EpdError::ConfigurationError {
                message: "journal and discount accounts are required".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_config_roundtrips_through_json() {
        let config = EngineConfig::standard(Currency::usd());
        let loaded = EngineConfig::from_json(&config.to_json()).unwrap();
        assert_eq!(loaded.company_currency, Currency::usd());
        assert_eq!(loaded.split_tolerance, config.split_tolerance);
        assert_eq!(loaded.journal.inbound_methods, vec!["manual_in".to_string()]);
    }

    #[test]
    fn test_missing_inbound_method() {
        let mut config = EngineConfig::standard(Currency::usd());
        config.journal.inbound_methods.clear();
        let err = config.journal.payment_method(PaymentType::Inbound).unwrap_err();
        assert!(matches!(err, EpdError::NoPaymentMethod { .. }));
        assert_eq!(config.journal.payment_method(PaymentType::Outbound).unwrap(), "manual_out");
    }

    #[test]
    fn test_invalid_json_is_configuration_error() {
        let err = EngineConfig::from_json("{ not json").unwrap_err();
        assert!(matches!(err, EpdError::ConfigurationError { .. }));
    }

    #[test]
    fn test_tolerance_is_one_minor_unit() {
        let usd = EngineConfig::standard(Currency::usd());
        assert_eq!(usd.split_tolerance, Money::from_minor(1, 2));
        let jpy = EngineConfig::standard(Currency::new("JPY", 0));
        assert_eq!(jpy.split_tolerance, Money::ONE);
    }

    #[test]
    fn test_negative_tolerance_rejected() {
        let mut config = EngineConfig::standard(Currency::usd());
        config.split_tolerance = Money::from_major(-1);
        assert!(config.validate().is_err());
    }
}
