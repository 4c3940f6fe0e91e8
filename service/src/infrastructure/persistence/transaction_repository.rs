use async_trait::async_trait;
use common::ids::{AccountId, PaymentId, TransactionId, UserId};
use txn_core::contracts::repository::{NewTransaction, TransactionRepository, TransactionUpdate};
use txn_core::entities::{Transaction, TransactionStatus};
use txn_core::error::CoreError;

use super::models::{money_source_str, status_str, TransactionModel};
use crate::infrastructure::uow::SharedTx;

/// `TransactionRepository` scoped to a single in-flight `sqlx::Postgres`
/// transaction. `update` treats every field as an explicit partial
/// update: plain fields use `COALESCE` against the existing row, nullable
/// fields (`fee`, `payment_id`, the conversion columns) use an
/// `is_set`/value pair so "leave untouched" and "set to NULL" stay
/// distinguishable, matching `TransactionUpdate`'s `Option<Option<T>>` shape.
pub struct PostgresTransactionRepository {
    tx: SharedTx,
}

impl PostgresTransactionRepository {
    pub fn new(tx: SharedTx) -> Self {
        Self { tx }
    }
}

const SELECT_COLUMNS: &str = r#"
    id, user_id, account_id, amount_minor, currency, status, payment_id,
    fee_minor, fee_currency, original_amount_minor, original_currency,
    converted_amount_minor, conversion_rate, target_currency, money_source,
    external_target_masked, created_at
"#;

#[async_trait]
impl TransactionRepository for PostgresTransactionRepository {
    async fn create(&self, new_transaction: NewTransaction) -> Result<Transaction, CoreError> {
        let mut guard = self.tx.lock().await;
        let id = TransactionId::new();

        let model = sqlx::query_as::<_, TransactionModel>(&format!(
            r#"
            INSERT INTO transactions (
                id, user_id, account_id, amount_minor, currency, status, money_source, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new_transaction.user_id)
        .bind(new_transaction.account_id)
        .bind(new_transaction.amount.amount())
        .bind(new_transaction.amount.currency())
        .bind(status_str(TransactionStatus::Created))
        .bind(money_source_str(new_transaction.money_source))
        .fetch_one(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?;

        Transaction::try_from(model)
    }

    async fn update(
        &self,
        id: TransactionId,
        update: TransactionUpdate,
    ) -> Result<Transaction, CoreError> {
        let mut guard = self.tx.lock().await;

        let (fee_set, fee_minor, fee_currency) = match update.fee {
            Some(Some(money)) => (true, Some(money.amount()), Some(money.currency())),
            Some(None) => (true, None, None),
            None => (false, None, None),
        };
        let (payment_id_set, payment_id) = match update.payment_id {
            Some(value) => (true, value),
            None => (false, None),
        };
        let (original_amount_set, original_amount_minor) = match update.original_amount {
            Some(value) => (true, value.map(|m| m.amount())),
            None => (false, None),
        };
        let (original_currency_set, original_currency) = match update.original_currency {
            Some(value) => (true, value),
            None => (false, None),
        };
        let (converted_amount_set, converted_amount_minor) = match update.converted_amount {
            Some(value) => (true, value.map(|m| m.amount())),
            None => (false, None),
        };
        let (conversion_rate_set, conversion_rate) = match update.conversion_rate {
            Some(value) => (true, value),
            None => (false, None),
        };
        let (target_currency_set, target_currency) = match update.target_currency {
            Some(value) => (true, value),
            None => (false, None),
        };
        let (masked_set, masked) = match update.external_target_masked {
            Some(value) => (true, value),
            None => (false, None),
        };

        let model = sqlx::query_as::<_, TransactionModel>(&format!(
            r#"
            UPDATE transactions
            SET status = COALESCE($2, status),
                amount_minor = COALESCE($3, amount_minor),
                currency = COALESCE($4, currency),
                payment_id = CASE WHEN $5 THEN $6 ELSE payment_id END,
                fee_minor = CASE WHEN $7 THEN $8 ELSE fee_minor END,
                fee_currency = CASE WHEN $7 THEN $9 ELSE fee_currency END,
                original_amount_minor = CASE WHEN $10 THEN $11 ELSE original_amount_minor END,
                original_currency = CASE WHEN $12 THEN $13 ELSE original_currency END,
                converted_amount_minor = CASE WHEN $14 THEN $15 ELSE converted_amount_minor END,
                conversion_rate = CASE WHEN $16 THEN $17 ELSE conversion_rate END,
                target_currency = CASE WHEN $18 THEN $19 ELSE target_currency END,
                external_target_masked = CASE WHEN $20 THEN $21 ELSE external_target_masked END
            WHERE id = $1
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(update.status.map(status_str))
        .bind(update.amount.map(|m| m.amount()))
        .bind(update.amount.map(|m| m.currency()))
        .bind(payment_id_set)
        .bind(payment_id)
        .bind(fee_set)
        .bind(fee_minor)
        .bind(fee_currency)
        .bind(original_amount_set)
        .bind(original_amount_minor)
        .bind(original_currency_set)
        .bind(original_currency)
        .bind(converted_amount_set)
        .bind(converted_amount_minor)
        .bind(conversion_rate_set)
        .bind(conversion_rate)
        .bind(target_currency_set)
        .bind(target_currency)
        .bind(masked_set)
        .bind(masked)
        .fetch_optional(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?
        .ok_or_else(|| CoreError::NotFound(format!("transaction {id}")))?;

        Transaction::try_from(model)
    }

    async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, CoreError> {
        let mut guard = self.tx.lock().await;
        let model = sqlx::query_as::<_, TransactionModel>(&format!(
            "SELECT {SELECT_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?;

        model.map(Transaction::try_from).transpose()
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Transaction>, CoreError> {
        let mut guard = self.tx.lock().await;
        let models = sqlx::query_as::<_, TransactionModel>(&format!(
            "SELECT {SELECT_COLUMNS} FROM transactions WHERE user_id = $1 ORDER BY created_at ASC"
        ))
        .bind(user_id)
        .fetch_all(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?;

        models.into_iter().map(Transaction::try_from).collect()
    }

    async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Transaction>, CoreError> {
        let mut guard = self.tx.lock().await;
        let models = sqlx::query_as::<_, TransactionModel>(&format!(
            "SELECT {SELECT_COLUMNS} FROM transactions WHERE account_id = $1 ORDER BY created_at ASC"
        ))
        .bind(account_id)
        .fetch_all(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?;

        models.into_iter().map(Transaction::try_from).collect()
    }

    async fn get_by_payment_id(
        &self,
        payment_id: PaymentId,
    ) -> Result<Option<Transaction>, CoreError> {
        let mut guard = self.tx.lock().await;
        let model = sqlx::query_as::<_, TransactionModel>(&format!(
            "SELECT {SELECT_COLUMNS} FROM transactions WHERE payment_id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?;

        model.map(Transaction::try_from).transpose()
    }

    async fn upsert_by_payment_id(
        &self,
        payment_id: PaymentId,
        new_transaction: NewTransaction,
        status: TransactionStatus,
    ) -> Result<Transaction, CoreError> {
        let mut guard = self.tx.lock().await;
        let id = TransactionId::new();

        let model = sqlx::query_as::<_, TransactionModel>(&format!(
            r#"
            INSERT INTO transactions (
                id, user_id, account_id, amount_minor, currency, status, payment_id, money_source, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, now())
            ON CONFLICT (payment_id) DO UPDATE
            SET status = EXCLUDED.status,
                amount_minor = EXCLUDED.amount_minor,
                currency = EXCLUDED.currency
            RETURNING {SELECT_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(new_transaction.user_id)
        .bind(new_transaction.account_id)
        .bind(new_transaction.amount.amount())
        .bind(new_transaction.amount.currency())
        .bind(status_str(status))
        .bind(payment_id)
        .bind(money_source_str(new_transaction.money_source))
        .fetch_one(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?;

        Transaction::try_from(model)
    }
}
