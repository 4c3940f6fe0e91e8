use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Three-letter ISO-4217-shaped currency code plus the metadata the core reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Currency {
    pub code: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    pub active: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MoneyError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unknown currency: {0}")]
    UnknownCurrency(String),

    #[error("currency mismatch: {0} vs {1}")]
    CurrencyMismatch(String, String),

    #[error("overflow computing money amount")]
    Overflow,
}

/// Looks up currency metadata. The core consumes `code_is_valid`/`decimals`;
/// loading the registry from an external source (e.g. a CSV file) is out of
/// scope for this crate.
pub trait CurrencyRegistry: Send + Sync {
    fn get(&self, code: &str) -> Option<Currency>;

    fn code_is_valid(&self, code: &str) -> bool {
        self.get(code).map(|c| c.active).unwrap_or(false)
    }

    fn decimals(&self, code: &str) -> Result<u32, MoneyError> {
        self.get(code)
            .map(|c| c.decimals)
            .ok_or_else(|| MoneyError::UnknownCurrency(code.to_string()))
    }
}

/// In-memory registry seeded with the currencies exercised by the test suite.
/// Stands in for the CSV-backed loader the wider system uses, which is out
/// of scope here.
#[derive(Debug, Clone)]
pub struct StaticCurrencyRegistry {
    currencies: HashMap<String, Currency>,
}

impl StaticCurrencyRegistry {
    pub fn new() -> Self {
        let seed = [
            ("USD", "US Dollar", "$", 2),
            ("EUR", "Euro", "\u{20ac}", 2),
            ("GBP", "British Pound", "\u{a3}", 2),
            ("JPY", "Japanese Yen", "\u{a5}", 0),
        ];

        let currencies = seed
            .into_iter()
            .map(|(code, name, symbol, decimals)| {
                (
                    code.to_string(),
                    Currency {
                        code: code.to_string(),
                        name: name.to_string(),
                        symbol: symbol.to_string(),
                        decimals,
                        active: true,
                    },
                )
            })
            .collect();

        Self { currencies }
    }

    pub fn with_currency(mut self, currency: Currency) -> Self {
        self.currencies.insert(currency.code.clone(), currency);
        self
    }
}

impl Default for StaticCurrencyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CurrencyRegistry for StaticCurrencyRegistry {
    fn get(&self, code: &str) -> Option<Currency> {
        self.currencies.get(code).cloned()
    }
}

/// Immutable pair of (amount in smallest currency unit, currency code).
///
/// Arithmetic requires matching currencies and never rounds; only the
/// decimal-main-unit constructor rounds, using the currency's decimal count.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Money {
    amount: i64,
    currency: [u8; 3],
}

impl Money {
    /// Builds a `Money` from a main-unit decimal value (e.g. `dec!(19.99)`, "USD").
    pub fn new(
        main_units: Decimal,
        code: &str,
        registry: &dyn CurrencyRegistry,
    ) -> Result<Self, MoneyError> {
        let decimals = registry.decimals(code)?;
        let scale = 10i64.checked_pow(decimals).ok_or(MoneyError::Overflow)?;

        let scaled = main_units
            .checked_mul(Decimal::from(scale))
            .ok_or(MoneyError::Overflow)?;

        if scaled.fract() != Decimal::ZERO {
            return Err(MoneyError::InvalidAmount(format!(
                "{} has more precision than {} decimals",
                main_units, decimals
            )));
        }

        let minor: i64 = scaled
            .trunc()
            .try_into()
            .map_err(|_| MoneyError::Overflow)?;

        Ok(Self::from_minor(minor, code)?)
    }

    /// Builds a `Money` directly from an integer count of minor units.
    pub fn from_minor(amount: i64, code: &str) -> Result<Self, MoneyError> {
        let currency = code_bytes(code)?;
        Ok(Self { amount, currency })
    }

    pub fn zero(code: &str) -> Result<Self, MoneyError> {
        Self::from_minor(0, code)
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }

    pub fn currency(&self) -> String {
        String::from_utf8_lossy(&self.currency).to_string()
    }

    /// Returns the value as a main-unit decimal, using `decimals` minor
    /// units per main unit (callers that need currency-aware scaling
    /// should look up the registry and call `amount_float_with_decimals`).
    pub fn amount_float(&self, decimals: u32) -> Decimal {
        let scale = 10i64.pow(decimals);
        Decimal::from(self.amount) / Decimal::from(scale)
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }

    pub fn is_negative(&self) -> bool {
        self.amount < 0
    }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        let amount = self
            .amount
            .checked_add(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money {
            amount,
            currency: self.currency,
        })
    }

    pub fn subtract(&self, other: &Money) -> Result<Money, MoneyError> {
        self.require_same_currency(other)?;
        let amount = self
            .amount
            .checked_sub(other.amount)
            .ok_or(MoneyError::Overflow)?;
        Ok(Money {
            amount,
            currency: self.currency,
        })
    }

    fn require_same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch(
                self.currency(),
                other.currency(),
            ));
        }
        Ok(())
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.amount == other.amount && self.currency == other.currency
    }
}
impl Eq for Money {}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.currency())
    }
}

fn code_bytes(code: &str) -> Result<[u8; 3], MoneyError> {
    let upper = code.trim().to_uppercase();
    let bytes = upper.as_bytes();
    if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
        return Err(MoneyError::UnknownCurrency(code.to_string()));
    }
    Ok([bytes[0], bytes[1], bytes[2]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn add_then_subtract_is_identity() {
        let x = Money::from_minor(1_000, "USD").unwrap();
        let y = Money::from_minor(250, "USD").unwrap();
        assert_eq!(x.add(&y).unwrap().subtract(&y).unwrap(), x);
    }

    #[test]
    fn mismatched_currency_add_fails() {
        let x = Money::from_minor(1_000, "USD").unwrap();
        let y = Money::from_minor(250, "EUR").unwrap();
        assert!(matches!(
            x.add(&y),
            Err(MoneyError::CurrencyMismatch(_, _))
        ));
    }

    #[test]
    fn new_rounds_using_currency_decimals() {
        let registry = StaticCurrencyRegistry::new();
        let money = Money::new(dec!(19.99), "USD", &registry).unwrap();
        assert_eq!(money.amount(), 1999);

        let yen = Money::new(dec!(500), "JPY", &registry).unwrap();
        assert_eq!(yen.amount(), 500);
    }

    #[test]
    fn new_rejects_sub_minor_precision() {
        let registry = StaticCurrencyRegistry::new();
        let result = Money::new(dec!(19.999), "USD", &registry);
        assert!(matches!(result, Err(MoneyError::InvalidAmount(_))));
    }

    #[test]
    fn overflow_on_add_is_rejected() {
        let x = Money::from_minor(i64::MAX, "USD").unwrap();
        let y = Money::from_minor(1, "USD").unwrap();
        assert_eq!(x.add(&y), Err(MoneyError::Overflow));
    }

    #[test]
    fn unknown_currency_is_rejected() {
        let registry = StaticCurrencyRegistry::new();
        assert!(matches!(
            Money::new(dec!(10), "ZZZ", &registry),
            Err(MoneyError::UnknownCurrency(_))
        ));
    }
}
