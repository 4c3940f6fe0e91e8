use crate::context::Context;
use crate::error::CoreError;
use async_trait::async_trait;
use common::money::Money;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub original_amount: Money,
    pub converted_amount: Money,
    pub rate: Decimal,
}

/// External FX quoting/conversion service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FxConverter: Send + Sync {
    async fn convert(
        &self,
        ctx: &Context,
        amount: Money,
        to: &str,
    ) -> Result<ConversionResult, CoreError>;

    async fn rate(&self, ctx: &Context, from: &str, to: &str) -> Result<Decimal, CoreError>;

    async fn is_supported(&self, from: &str, to: &str) -> bool;
}
