use crate::entities::{Account, MoneySource, Transaction, TransactionStatus, User};
use crate::error::CoreError;
use async_trait::async_trait;
use common::ids::{AccountId, PaymentId, TransactionId, UserId};
use common::money::Money;
use rust_decimal::Decimal;

/// Partial-update descriptor for `Account`. Each field is an explicit
/// `Option`: `None` leaves the column untouched, `Some(value)` sets it.
/// Replaces the source's nullable-pointer-per-column convention.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub balance: Option<Money>,
    pub stripe_connect_account_id: Option<Option<String>>,
}

/// Partial-update descriptor for `Transaction`.
#[derive(Debug, Clone, Default)]
pub struct TransactionUpdate {
    pub status: Option<TransactionStatus>,
    pub payment_id: Option<Option<PaymentId>>,
    pub amount: Option<Money>,
    pub fee: Option<Option<Money>>,
    pub original_amount: Option<Option<Money>>,
    pub original_currency: Option<Option<String>>,
    pub converted_amount: Option<Option<Money>>,
    pub conversion_rate: Option<Option<Decimal>>,
    pub target_currency: Option<Option<String>>,
    pub external_target_masked: Option<Option<String>>,
}

/// Partial-update descriptor for `User`.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub stripe_connect_account_id: Option<Option<String>>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: UserId,
    pub account_id: AccountId,
    pub amount: Money,
    pub money_source: MoneySource,
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get(&self, id: AccountId) -> Result<Option<Account>, CoreError>;
    async fn update(&self, id: AccountId, update: AccountUpdate) -> Result<Account, CoreError>;
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Account>, CoreError>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn create(&self, new_transaction: NewTransaction) -> Result<Transaction, CoreError>;
    async fn update(
        &self,
        id: TransactionId,
        update: TransactionUpdate,
    ) -> Result<Transaction, CoreError>;
    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, CoreError>;
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Transaction>, CoreError>;
    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Transaction>, CoreError>;
    async fn get_by_payment_id(&self, payment_id: PaymentId)
        -> Result<Option<Transaction>, CoreError>;

    /// Inserts a new transaction bound to `payment_id` if none exists yet,
    /// otherwise updates the existing one. Used by the webhook path when a
    /// `Payment.Processed` event arrives for a transaction the core never
    /// persisted locally.
    async fn upsert_by_payment_id(
        &self,
        payment_id: PaymentId,
        new_transaction: NewTransaction,
        status: TransactionStatus,
    ) -> Result<Transaction, CoreError>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<User>, CoreError>;
    async fn update(&self, id: UserId, update: UserUpdate) -> Result<User, CoreError>;
}
