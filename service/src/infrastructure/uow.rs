use async_trait::async_trait;
use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction as SqlxTransaction};
use std::sync::Arc;
use tokio::sync::Mutex;
use txn_core::contracts::repository::{AccountRepository, TransactionRepository, UserRepository};
use txn_core::error::CoreError;
use txn_core::uow::{Scope, UnitOfWork};

use super::persistence::account_repository::PostgresAccountRepository;
use super::persistence::transaction_repository::PostgresTransactionRepository;
use super::persistence::user_repository::PostgresUserRepository;

/// `UnitOfWork` backed by a single `sqlx::Postgres` transaction per
/// `do_in_scope` call. The transaction is owned by the scope (not
/// borrowed from the pool), so it can cross the `'static` closure
/// boundary `do_in_scope` requires; it commits on `Ok`, rolls back on
/// `Err` (sqlx's default `Drop` behavior if we don't commit).
pub struct SqlxUnitOfWork {
    pool: PgPool,
}

impl SqlxUnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UnitOfWork for SqlxUnitOfWork {
    async fn do_in_scope(
        &self,
        f: Box<dyn FnOnce(Arc<dyn Scope>) -> BoxFuture<'static, Result<(), CoreError>> + Send>,
    ) -> Result<(), CoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Transient(e.to_string()))?;
        let tx = Arc::new(Mutex::new(tx));

        let scope: Arc<dyn Scope> = Arc::new(SqlxScope { tx: tx.clone() });
        let result = f(scope).await;

        let tx = Arc::try_unwrap(tx)
            .unwrap_or_else(|_| panic!("UoW scope outlived do_in_scope"))
            .into_inner();

        match result {
            Ok(()) => {
                tx.commit()
                    .await
                    .map_err(|e| CoreError::Transient(e.to_string()))?;
                Ok(())
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }
}

pub(crate) type SharedTx = Arc<Mutex<SqlxTransaction<'static, Postgres>>>;

struct SqlxScope {
    tx: SharedTx,
}

impl Scope for SqlxScope {
    fn accounts(&self) -> Arc<dyn AccountRepository> {
        Arc::new(PostgresAccountRepository::new(self.tx.clone()))
    }

    fn transactions(&self) -> Arc<dyn TransactionRepository> {
        Arc::new(PostgresTransactionRepository::new(self.tx.clone()))
    }

    fn users(&self) -> Arc<dyn UserRepository> {
        Arc::new(PostgresUserRepository::new(self.tx.clone()))
    }
}
