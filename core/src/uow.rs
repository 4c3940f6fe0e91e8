use crate::contracts::repository::{AccountRepository, TransactionRepository, UserRepository};
use crate::error::CoreError;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// A bound set of typed repositories, scoped to one `do_in_scope` call.
/// Handlers acquire repositories only through a `Scope`; nothing lets them
/// leak a repository handle outside it.
pub trait Scope: Send + Sync {
    fn accounts(&self) -> Arc<dyn AccountRepository>;
    fn transactions(&self) -> Arc<dyn TransactionRepository>;
    fn users(&self) -> Arc<dyn UserRepository>;
}

/// Scoped transactional access to the typed repositories. `do_in_scope`
/// opens a scope, runs `f`, commits on `Ok`, and rolls back on `Err`.
/// Reads inside the closure observe writes made earlier in the same call;
/// once committed, they're visible to the next `do_in_scope` call.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn do_in_scope(
        &self,
        f: Box<dyn FnOnce(Arc<dyn Scope>) -> BoxFuture<'static, Result<(), CoreError>> + Send>,
    ) -> Result<(), CoreError>;
}

pub mod in_memory {
    use super::*;
    use crate::entities::{Account, Transaction, User};
    use common::ids::{AccountId, PaymentId, TransactionId, UserId};
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    use crate::contracts::repository::{
        AccountUpdate, NewTransaction, TransactionUpdate, UserUpdate,
    };
    use crate::entities::TransactionStatus;

    #[derive(Default, Clone)]
    struct StoreData {
        accounts: HashMap<AccountId, Account>,
        transactions: HashMap<TransactionId, Transaction>,
        users: HashMap<UserId, User>,
        transactions_by_payment: HashMap<PaymentId, TransactionId>,
    }

    /// An in-memory `UnitOfWork` used by the handler test suite. Takes a
    /// full snapshot of the store for the duration of `do_in_scope` and
    /// writes it back atomically on success, giving the same
    /// read-your-writes-then-commit-or-rollback semantics a real
    /// transactional store provides.
    #[derive(Clone, Default)]
    pub struct InMemoryUnitOfWork {
        store: Arc<Mutex<StoreData>>,
    }

    impl InMemoryUnitOfWork {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn seed_account(&self, account: Account) {
            self.store.lock().await.accounts.insert(account.id, account);
        }

        pub async fn seed_user(&self, user: User) {
            self.store.lock().await.users.insert(user.id, user);
        }

        pub async fn seed_transaction(&self, transaction: Transaction) {
            let mut store = self.store.lock().await;
            if let Some(payment_id) = transaction.payment_id {
                store
                    .transactions_by_payment
                    .insert(payment_id, transaction.id);
            }
            store.transactions.insert(transaction.id, transaction);
        }

        pub async fn get_account(&self, id: AccountId) -> Option<Account> {
            self.store.lock().await.accounts.get(&id).cloned()
        }

        pub async fn get_transaction(&self, id: TransactionId) -> Option<Transaction> {
            self.store.lock().await.transactions.get(&id).cloned()
        }

        pub async fn get_transaction_by_payment_id(&self, payment_id: PaymentId) -> Option<Transaction> {
            let store = self.store.lock().await;
            let id = store.transactions_by_payment.get(&payment_id)?;
            store.transactions.get(id).cloned()
        }
    }

    #[async_trait]
    impl UnitOfWork for InMemoryUnitOfWork {
        async fn do_in_scope(
            &self,
            f: Box<dyn FnOnce(Arc<dyn Scope>) -> BoxFuture<'static, Result<(), CoreError>> + Send>,
        ) -> Result<(), CoreError> {
            let mut guard = self.store.lock().await;
            let working_copy = Arc::new(Mutex::new(guard.clone()));
            let scope: Arc<dyn Scope> = Arc::new(InMemoryScope {
                data: working_copy.clone(),
            });

            let result = f(scope).await;

            if result.is_ok() {
                *guard = working_copy.lock().await.clone();
            }
            result
        }
    }

    struct InMemoryScope {
        data: Arc<Mutex<StoreData>>,
    }

    impl Scope for InMemoryScope {
        fn accounts(&self) -> Arc<dyn AccountRepository> {
            Arc::new(InMemoryAccountRepository {
                data: self.data.clone(),
            })
        }

        fn transactions(&self) -> Arc<dyn TransactionRepository> {
            Arc::new(InMemoryTransactionRepository {
                data: self.data.clone(),
            })
        }

        fn users(&self) -> Arc<dyn UserRepository> {
            Arc::new(InMemoryUserRepository {
                data: self.data.clone(),
            })
        }
    }

    struct InMemoryAccountRepository {
        data: Arc<Mutex<StoreData>>,
    }

    #[async_trait]
    impl AccountRepository for InMemoryAccountRepository {
        async fn get(&self, id: AccountId) -> Result<Option<Account>, CoreError> {
            Ok(self.data.lock().await.accounts.get(&id).cloned())
        }

        async fn update(&self, id: AccountId, update: AccountUpdate) -> Result<Account, CoreError> {
            let mut guard = self.data.lock().await;
            let account = guard
                .accounts
                .get_mut(&id)
                .ok_or_else(|| CoreError::NotFound(format!("account {id}")))?;

            if let Some(balance) = update.balance {
                account.balance = balance;
            }
            if let Some(stripe_id) = update.stripe_connect_account_id {
                account.stripe_connect_account_id = stripe_id;
            }
            Ok(account.clone())
        }

        async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Account>, CoreError> {
            Ok(self
                .data
                .lock()
                .await
                .accounts
                .values()
                .filter(|a| a.user_id == user_id)
                .cloned()
                .collect())
        }
    }

    struct InMemoryTransactionRepository {
        data: Arc<Mutex<StoreData>>,
    }

    fn apply_transaction_update(tx: &mut Transaction, update: TransactionUpdate) {
        if let Some(status) = update.status {
            tx.status = status;
        }
        if let Some(payment_id) = update.payment_id {
            tx.payment_id = payment_id;
        }
        if let Some(amount) = update.amount {
            tx.amount = amount;
        }
        if let Some(fee) = update.fee {
            tx.fee = fee;
        }
        if let Some(original_amount) = update.original_amount {
            tx.original_amount = original_amount;
        }
        if let Some(original_currency) = update.original_currency {
            tx.original_currency = original_currency;
        }
        if let Some(converted_amount) = update.converted_amount {
            tx.converted_amount = converted_amount;
        }
        if let Some(conversion_rate) = update.conversion_rate {
            tx.conversion_rate = conversion_rate;
        }
        if let Some(target_currency) = update.target_currency {
            tx.target_currency = target_currency;
        }
        if let Some(masked) = update.external_target_masked {
            tx.external_target_masked = masked;
        }
    }

    #[async_trait]
    impl TransactionRepository for InMemoryTransactionRepository {
        async fn create(&self, new_transaction: NewTransaction) -> Result<Transaction, CoreError> {
            let tx = Transaction::new(
                new_transaction.user_id,
                new_transaction.account_id,
                new_transaction.amount,
                new_transaction.money_source,
            );
            self.data.lock().await.transactions.insert(tx.id, tx.clone());
            Ok(tx)
        }

        async fn update(
            &self,
            id: TransactionId,
            update: TransactionUpdate,
        ) -> Result<Transaction, CoreError> {
            let mut guard = self.data.lock().await;
            let tx = guard
                .transactions
                .get_mut(&id)
                .ok_or_else(|| CoreError::NotFound(format!("transaction {id}")))?;

            if let Some(status) = update.status {
                tx.transition_to(status)?;
            }
            let mut update = update;
            update.status = None; // already applied via transition_to above
            apply_transaction_update(tx, update);

            let snapshot = tx.clone();
            if let Some(payment_id) = snapshot.payment_id {
                guard.transactions_by_payment.insert(payment_id, id);
            }
            Ok(snapshot)
        }

        async fn get(&self, id: TransactionId) -> Result<Option<Transaction>, CoreError> {
            Ok(self.data.lock().await.transactions.get(&id).cloned())
        }

        async fn list_by_user(&self, user_id: UserId) -> Result<Vec<Transaction>, CoreError> {
            Ok(self
                .data
                .lock()
                .await
                .transactions
                .values()
                .filter(|t| t.user_id == user_id)
                .cloned()
                .collect())
        }

        async fn list_by_account(&self, account_id: AccountId) -> Result<Vec<Transaction>, CoreError> {
            Ok(self
                .data
                .lock()
                .await
                .transactions
                .values()
                .filter(|t| t.account_id == account_id)
                .cloned()
                .collect())
        }

        async fn get_by_payment_id(
            &self,
            payment_id: PaymentId,
        ) -> Result<Option<Transaction>, CoreError> {
            let guard = self.data.lock().await;
            Ok(guard
                .transactions_by_payment
                .get(&payment_id)
                .and_then(|id| guard.transactions.get(id))
                .cloned())
        }

        async fn upsert_by_payment_id(
            &self,
            payment_id: PaymentId,
            new_transaction: NewTransaction,
            status: TransactionStatus,
        ) -> Result<Transaction, CoreError> {
            let mut guard = self.data.lock().await;
            if let Some(id) = guard.transactions_by_payment.get(&payment_id).copied() {
                let tx = guard
                    .transactions
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| CoreError::NotFound(format!("transaction {id}")))?;
                return Ok(tx);
            }

            let mut tx = Transaction::new(
                new_transaction.user_id,
                new_transaction.account_id,
                new_transaction.amount,
                new_transaction.money_source,
            );
            tx.payment_id = Some(payment_id);
            // upsert inserts directly at the target status (e.g. `processed`)
            // rather than replaying the DAG from `created`, since there was
            // no local row to have transitioned.
            tx.status = status;
            guard.transactions.insert(tx.id, tx.clone());
            guard.transactions_by_payment.insert(payment_id, tx.id);
            Ok(tx)
        }
    }

    struct InMemoryUserRepository {
        data: Arc<Mutex<StoreData>>,
    }

    #[async_trait]
    impl UserRepository for InMemoryUserRepository {
        async fn get(&self, id: UserId) -> Result<Option<User>, CoreError> {
            Ok(self.data.lock().await.users.get(&id).cloned())
        }

        async fn update(&self, id: UserId, update: UserUpdate) -> Result<User, CoreError> {
            let mut guard = self.data.lock().await;
            let user = guard
                .users
                .get_mut(&id)
                .ok_or_else(|| CoreError::NotFound(format!("user {id}")))?;
            if let Some(stripe_id) = update.stripe_connect_account_id {
                user.stripe_connect_account_id = stripe_id;
            }
            Ok(user.clone())
        }
    }

}
