use async_trait::async_trait;
use common::money::Money;
use rust_decimal::Decimal;
use std::collections::HashMap;
use txn_core::context::Context;
use txn_core::contracts::fx_converter::{ConversionResult, FxConverter};
use txn_core::error::CoreError;

/// Fixed-rate converter for local development and integration tests,
/// standing in for a real FX rate provider until one is wired up.
pub struct FakeFxConverter {
    rates: HashMap<(String, String), Decimal>,
}

impl FakeFxConverter {
    pub fn new() -> Self {
        let mut rates = HashMap::new();
        rates.insert(("EUR".to_string(), "USD".to_string()), Decimal::new(110, 2));
        rates.insert(("USD".to_string(), "EUR".to_string()), Decimal::new(91, 2));
        rates.insert(("GBP".to_string(), "USD".to_string()), Decimal::new(127, 2));
        rates.insert(("USD".to_string(), "GBP".to_string()), Decimal::new(79, 2));
        Self { rates }
    }
}

impl Default for FakeFxConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FxConverter for FakeFxConverter {
    async fn convert(
        &self,
        _ctx: &Context,
        amount: Money,
        to: &str,
    ) -> Result<ConversionResult, CoreError> {
        let from = amount.currency();
        if from == to {
            return Ok(ConversionResult {
                original_amount: amount,
                converted_amount: amount,
                rate: Decimal::ONE,
            });
        }

        let rate = self.rate(_ctx, &from, to).await?;
        let converted_minor = (Decimal::from(amount.amount()) * rate)
            .round()
            .to_string()
            .parse::<i64>()
            .map_err(|_| CoreError::Transient("fx conversion overflowed i64".to_string()))?;

        Ok(ConversionResult {
            original_amount: amount,
            converted_amount: Money::from_minor(converted_minor, to)?,
            rate,
        })
    }

    async fn rate(&self, _ctx: &Context, from: &str, to: &str) -> Result<Decimal, CoreError> {
        self.rates
            .get(&(from.to_string(), to.to_string()))
            .copied()
            .ok_or_else(|| CoreError::InvalidRequest(format!("no fx rate from {from} to {to}")))
    }

    async fn is_supported(&self, from: &str, to: &str) -> bool {
        from == to || self.rates.contains_key(&(from.to_string(), to.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn converts_using_the_fixed_rate() {
        let converter = FakeFxConverter::new();
        let amount = Money::from_minor(10_000, "EUR").unwrap();
        let result = converter.convert(&Context::new(), amount, "USD").await.unwrap();
        assert_eq!(result.converted_amount, Money::from_minor(11_000, "USD").unwrap());
    }

    #[tokio::test]
    async fn same_currency_conversion_is_identity() {
        let converter = FakeFxConverter::new();
        let amount = Money::from_minor(500, "USD").unwrap();
        let result = converter.convert(&Context::new(), amount, "USD").await.unwrap();
        assert_eq!(result.converted_amount, amount);
        assert_eq!(result.rate, Decimal::ONE);
    }

    #[tokio::test]
    async fn unsupported_pair_is_rejected() {
        let converter = FakeFxConverter::new();
        let amount = Money::from_minor(500, "JPY").unwrap();
        assert!(converter.convert(&Context::new(), amount, "GBP").await.is_err());
    }
}
