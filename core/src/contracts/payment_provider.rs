use crate::context::Context;
use crate::error::CoreError;
use async_trait::async_trait;
use common::ids::{AccountId, PaymentId, TransactionId, UserId};
use common::money::Money;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone)]
pub struct InitiatePaymentRequest {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub amount: Money,
    pub transaction_id: TransactionId,
}

#[derive(Debug, Clone)]
pub struct InitiatePaymentResult {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone)]
pub struct BankAccountDestination {
    pub account_number: String,
    pub routing_number: String,
}

#[derive(Debug, Clone)]
pub struct InitiatePayoutRequest {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub provider_connect_account_id: String,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub description: String,
    pub metadata: HashMap<String, String>,
    pub destination: BankAccountDestination,
}

#[derive(Debug, Clone)]
pub struct InitiatePayoutResult {
    pub payout_id: PaymentId,
    pub payment_provider_id: String,
    pub status: PaymentStatus,
    pub fee_amount: Option<Money>,
    pub estimated_arrival_date: Option<chrono::DateTime<chrono::Utc>>,
}

/// The external payment/payout processor, modeled on a Stripe-shaped API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn initiate_payment(
        &self,
        ctx: &Context,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResult, CoreError>;

    async fn initiate_payout(
        &self,
        ctx: &Context,
        request: InitiatePayoutRequest,
    ) -> Result<InitiatePayoutResult, CoreError>;

    async fn get_payment_status(
        &self,
        ctx: &Context,
        payment_id: PaymentId,
    ) -> Result<PaymentStatus, CoreError>;
}
