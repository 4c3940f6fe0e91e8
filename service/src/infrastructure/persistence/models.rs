use chrono::{DateTime, Utc};
use common::ids::{AccountId, PaymentId, TransactionId, UserId};
use common::money::Money;
use rust_decimal::Decimal;
use sqlx::FromRow;
use txn_core::entities::{Account, MoneySource, Transaction, TransactionStatus, User};
use txn_core::error::CoreError;

/// Database model for the `users` table (specific to sqlx).
#[derive(Debug, FromRow)]
pub struct UserModel {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub names: String,
    pub stripe_connect_account_id: Option<String>,
}

impl From<UserModel> for User {
    fn from(m: UserModel) -> Self {
        Self {
            id: m.id,
            username: m.username,
            email: m.email,
            names: m.names,
            stripe_connect_account_id: m.stripe_connect_account_id,
        }
    }
}

/// Database model for the `accounts` table. `balance_minor` is the money
/// type's minor-unit representation; `currency` reconstructs it on read.
#[derive(Debug, FromRow)]
pub struct AccountModel {
    pub id: AccountId,
    pub user_id: UserId,
    pub balance_minor: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stripe_connect_account_id: Option<String>,
}

impl TryFrom<AccountModel> for Account {
    type Error = CoreError;

    fn try_from(m: AccountModel) -> Result<Self, Self::Error> {
        Ok(Self {
            id: m.id,
            user_id: m.user_id,
            balance: Money::from_minor(m.balance_minor, &m.currency)?,
            currency: m.currency,
            created_at: m.created_at,
            updated_at: m.updated_at,
            stripe_connect_account_id: m.stripe_connect_account_id,
        })
    }
}

/// Database model for the `transactions` table. Money-valued columns are
/// split into a minor-unit integer plus a currency code; `original_amount`
/// and `converted_amount` reuse `original_currency`/`target_currency`
/// rather than duplicating a currency column, since the domain entity
/// already carries those alongside them.
#[derive(Debug, FromRow)]
pub struct TransactionModel {
    pub id: TransactionId,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub amount_minor: i64,
    pub currency: String,
    pub status: String,
    pub payment_id: Option<PaymentId>,
    pub fee_minor: Option<i64>,
    pub fee_currency: Option<String>,
    pub original_amount_minor: Option<i64>,
    pub original_currency: Option<String>,
    pub converted_amount_minor: Option<i64>,
    pub conversion_rate: Option<Decimal>,
    pub target_currency: Option<String>,
    pub money_source: String,
    pub external_target_masked: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<TransactionModel> for Transaction {
    type Error = CoreError;

    fn try_from(m: TransactionModel) -> Result<Self, Self::Error> {
        let fee = match (m.fee_minor, &m.fee_currency) {
            (Some(minor), Some(currency)) => Some(Money::from_minor(minor, currency)?),
            _ => None,
        };
        let original_amount = match (m.original_amount_minor, &m.original_currency) {
            (Some(minor), Some(currency)) => Some(Money::from_minor(minor, currency)?),
            _ => None,
        };
        let converted_amount = match (m.converted_amount_minor, &m.target_currency) {
            (Some(minor), Some(currency)) => Some(Money::from_minor(minor, currency)?),
            _ => None,
        };

        Ok(Self {
            id: m.id,
            user_id: m.user_id,
            account_id: m.account_id,
            amount: Money::from_minor(m.amount_minor, &m.currency)?,
            status: parse_status(&m.status)?,
            payment_id: m.payment_id,
            fee,
            original_amount,
            original_currency: m.original_currency,
            converted_amount,
            conversion_rate: m.conversion_rate,
            target_currency: m.target_currency,
            money_source: parse_money_source(&m.money_source)?,
            external_target_masked: m.external_target_masked,
            created_at: m.created_at,
        })
    }
}

pub fn status_str(status: TransactionStatus) -> &'static str {
    match status {
        TransactionStatus::Created => "created",
        TransactionStatus::Pending => "pending",
        TransactionStatus::Processed => "processed",
        TransactionStatus::Completed => "completed",
        TransactionStatus::Failed => "failed",
    }
}

fn parse_status(raw: &str) -> Result<TransactionStatus, CoreError> {
    match raw {
        "created" => Ok(TransactionStatus::Created),
        "pending" => Ok(TransactionStatus::Pending),
        "processed" => Ok(TransactionStatus::Processed),
        "completed" => Ok(TransactionStatus::Completed),
        "failed" => Ok(TransactionStatus::Failed),
        other => Err(CoreError::ProgrammerError(format!(
            "unknown transaction status in database row: {other}"
        ))),
    }
}

pub fn money_source_str(source: MoneySource) -> &'static str {
    match source {
        MoneySource::Card => "card",
        MoneySource::BankTransfer => "bank_transfer",
        MoneySource::InternalTransfer => "internal_transfer",
    }
}

fn parse_money_source(raw: &str) -> Result<MoneySource, CoreError> {
    match raw {
        "card" => Ok(MoneySource::Card),
        "bank_transfer" => Ok(MoneySource::BankTransfer),
        "internal_transfer" => Ok(MoneySource::InternalTransfer),
        other => Err(CoreError::ProgrammerError(format!(
            "unknown money source in database row: {other}"
        ))),
    }
}
