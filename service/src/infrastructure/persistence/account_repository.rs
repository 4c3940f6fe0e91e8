use async_trait::async_trait;
use common::ids::{AccountId, UserId};
use txn_core::contracts::repository::{AccountRepository, AccountUpdate};
use txn_core::entities::Account;
use txn_core::error::CoreError;

use super::models::AccountModel;
use crate::infrastructure::uow::SharedTx;

/// `AccountRepository` scoped to a single in-flight `sqlx::Postgres`
/// transaction, shared with whichever other repositories the same unit
/// of work opened.
pub struct PostgresAccountRepository {
    tx: SharedTx,
}

impl PostgresAccountRepository {
    pub fn new(tx: SharedTx) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn get(&self, id: AccountId) -> Result<Option<Account>, CoreError> {
        let mut guard = self.tx.lock().await;
        let model = sqlx::query_as::<_, AccountModel>(
            r#"
            SELECT id, user_id, balance_minor, currency, created_at, updated_at, stripe_connect_account_id
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?;

        model.map(Account::try_from).transpose()
    }

    async fn update(&self, id: AccountId, update: AccountUpdate) -> Result<Account, CoreError> {
        let mut guard = self.tx.lock().await;

        let model = sqlx::query_as::<_, AccountModel>(
            r#"
            UPDATE accounts
            SET balance_minor = COALESCE($2, balance_minor),
                currency = COALESCE($3, currency),
                stripe_connect_account_id = CASE WHEN $4 THEN $5 ELSE stripe_connect_account_id END,
                updated_at = now()
            WHERE id = $1
            RETURNING id, user_id, balance_minor, currency, created_at, updated_at, stripe_connect_account_id
            "#,
        )
        .bind(id)
        .bind(update.balance.map(|m| m.amount()))
        .bind(update.balance.map(|m| m.currency()))
        .bind(update.stripe_connect_account_id.is_some())
        .bind(update.stripe_connect_account_id.flatten())
        .fetch_optional(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?
        .ok_or_else(|| CoreError::NotFound(format!("account {id}")))?;

        Account::try_from(model)
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Account>, CoreError> {
        let mut guard = self.tx.lock().await;
        let models = sqlx::query_as::<_, AccountModel>(
            r#"
            SELECT id, user_id, balance_minor, currency, created_at, updated_at, stripe_connect_account_id
            FROM accounts
            WHERE user_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?;

        models.into_iter().map(Account::try_from).collect()
    }
}
