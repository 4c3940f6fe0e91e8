use async_trait::async_trait;
use common::ids::UserId;
use txn_core::contracts::repository::{UserRepository, UserUpdate};
use txn_core::entities::User;
use txn_core::error::CoreError;

use super::models::UserModel;
use crate::infrastructure::uow::SharedTx;

pub struct PostgresUserRepository {
    tx: SharedTx,
}

impl PostgresUserRepository {
    pub fn new(tx: SharedTx) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl UserRepository for PostgresUserRepository {
    async fn get(&self, id: UserId) -> Result<Option<User>, CoreError> {
        let mut guard = self.tx.lock().await;
        let model = sqlx::query_as::<_, UserModel>(
            "SELECT id, username, email, names, stripe_connect_account_id FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?;

        Ok(model.map(User::from))
    }

    async fn update(&self, id: UserId, update: UserUpdate) -> Result<User, CoreError> {
        let mut guard = self.tx.lock().await;
        let model = sqlx::query_as::<_, UserModel>(
            r#"
            UPDATE users
            SET stripe_connect_account_id = CASE WHEN $2 THEN $3 ELSE stripe_connect_account_id END
            WHERE id = $1
            RETURNING id, username, email, names, stripe_connect_account_id
            "#,
        )
        .bind(id)
        .bind(update.stripe_connect_account_id.is_some())
        .bind(update.stripe_connect_account_id.flatten())
        .fetch_optional(&mut **guard)
        .await
        .map_err(|e| CoreError::Transient(e.to_string()))?
        .ok_or_else(|| CoreError::NotFound(format!("user {id}")))?;

        Ok(model.into())
    }
}
