use crate::error::CoreError;
use chrono::{DateTime, Utc};
use common::ids::{AccountId, PaymentId, TransactionId, UserId};
use common::money::Money;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user of the system. The core reads `names` (space-split into
/// first/last) and `stripe_connect_account_id` when building a payout
/// request, then writes `stripe_connect_account_id` back with the
/// provider's connect account id once the payout completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub names: String,
    pub stripe_connect_account_id: Option<String>,
}

impl User {
    /// Splits `names` on whitespace into (first, last). A single-word name
    /// yields an empty last name rather than failing; the core never
    /// rejects a user for an unusual name shape.
    pub fn first_and_last_name(&self) -> (String, String) {
        let mut parts = self.names.split_whitespace();
        let first = parts.next().unwrap_or_default().to_string();
        let last = parts.collect::<Vec<_>>().join(" ");
        (first, last)
    }
}

/// A money-holding account. Mutated only inside a unit of work, by the
/// payment-completed and fee handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub user_id: UserId,
    pub balance: Money,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stripe_connect_account_id: Option<String>,
}

impl Account {
    /// Checks `balance.currency == account.currency`, required before any
    /// mutation is applied.
    pub fn check_currency_invariant(&self) -> Result<(), CoreError> {
        if self.balance.currency() != self.currency {
            return Err(CoreError::InvariantViolation(format!(
                "account {} balance currency {} does not match account currency {}",
                self.id,
                self.balance.currency(),
                self.currency
            )));
        }
        Ok(())
    }

    /// Checks that `caller` owns this account, as required on any mutating operation.
    pub fn check_owner(&self, caller: UserId) -> Result<(), CoreError> {
        if self.user_id != caller {
            return Err(CoreError::InvariantViolation(format!(
                "user {caller} does not own account {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Adds `amount` to the balance. Currency mismatches and overflow
    /// surface as invariant violations since they indicate a bug upstream,
    /// not a retryable condition.
    pub fn credit(&mut self, amount: &Money) -> Result<(), CoreError> {
        self.balance = self.balance.add(amount)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Subtracts `amount` from the balance. Rejects the mutation if it
    /// would drive a deposit-only account negative.
    pub fn debit(&mut self, amount: &Money) -> Result<(), CoreError> {
        let next = self.balance.subtract(amount)?;
        if next.is_negative() {
            return Err(CoreError::InvariantViolation(format!(
                "account {} would go negative",
                self.id
            )));
        }
        self.balance = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn has_sufficient_funds(&self, amount: &Money) -> bool {
        match self.balance.subtract(amount) {
            Ok(result) => !result.is_negative(),
            Err(_) => false,
        }
    }
}

/// The transaction lifecycle state. Transitions are monotonic along the
/// DAG enforced by `transition_to`; `completed` and `failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Created,
    Pending,
    Processed,
    Completed,
    Failed,
}

impl TransactionStatus {
    fn allowed_next(self) -> &'static [TransactionStatus] {
        use TransactionStatus::*;
        match self {
            Created => &[Pending, Failed],
            Pending => &[Processed, Failed],
            Processed => &[Completed, Failed],
            Completed => &[],
            Failed => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }
}

/// Describes the origin of the funds behind a transaction (e.g. a deposit
/// from a card, a withdrawal payout, a transfer leg).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoneySource {
    Card,
    BankTransfer,
    InternalTransfer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    pub account_id: AccountId,
    pub amount: Money,
    pub status: TransactionStatus,
    pub payment_id: Option<PaymentId>,
    pub fee: Option<Money>,
    pub original_amount: Option<Money>,
    pub original_currency: Option<String>,
    pub converted_amount: Option<Money>,
    pub conversion_rate: Option<Decimal>,
    pub target_currency: Option<String>,
    pub money_source: MoneySource,
    pub external_target_masked: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        user_id: UserId,
        account_id: AccountId,
        amount: Money,
        money_source: MoneySource,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            user_id,
            account_id,
            amount,
            status: TransactionStatus::Created,
            payment_id: None,
            fee: None,
            original_amount: None,
            original_currency: None,
            converted_amount: None,
            conversion_rate: None,
            target_currency: None,
            money_source,
            external_target_masked: None,
            created_at: Utc::now(),
        }
    }

    /// Enforces the transaction status DAG: `created -> pending ->
    /// processed -> completed | failed`, plus the early `created ->
    /// failed` and `pending -> failed` escapes. Any other transition is
    /// rejected as an invariant violation rather than silently applied.
    pub fn transition_to(&mut self, next: TransactionStatus) -> Result<(), CoreError> {
        if self.status == next {
            return Ok(());
        }
        if !self.status.allowed_next().contains(&next) {
            return Err(CoreError::InvariantViolation(format!(
                "illegal transaction status transition {:?} -> {:?} for {}",
                self.status, next, self.id
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Sets `payment_id` if unset; once set non-empty it is immutable, so a
    /// mismatched incoming id is an invariant violation rather than a
    /// silent overwrite.
    pub fn assign_payment_id(&mut self, payment_id: PaymentId) -> Result<(), CoreError> {
        match self.payment_id {
            None => {
                self.payment_id = Some(payment_id);
                Ok(())
            }
            Some(existing) if existing == payment_id => Ok(()),
            Some(existing) => Err(CoreError::InvariantViolation(format!(
                "transaction {} already bound to payment {existing}, refusing to rebind to {payment_id}",
                self.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ids::{AccountId, UserId};
    use rstest::rstest;

    fn money(minor: i64) -> Money {
        Money::from_minor(minor, "USD").unwrap()
    }

    fn sample_transaction() -> Transaction {
        Transaction::new(UserId::new(), AccountId::new(), money(1000), MoneySource::Card)
    }

    #[rstest]
    #[case(TransactionStatus::Created, TransactionStatus::Pending, true)]
    #[case(TransactionStatus::Created, TransactionStatus::Failed, true)]
    #[case(TransactionStatus::Created, TransactionStatus::Processed, false)]
    #[case(TransactionStatus::Pending, TransactionStatus::Processed, true)]
    #[case(TransactionStatus::Pending, TransactionStatus::Failed, true)]
    #[case(TransactionStatus::Processed, TransactionStatus::Completed, true)]
    #[case(TransactionStatus::Processed, TransactionStatus::Failed, true)]
    #[case(TransactionStatus::Completed, TransactionStatus::Failed, false)]
    #[case(TransactionStatus::Failed, TransactionStatus::Pending, false)]
    fn transitions_follow_the_dag(
        #[case] from: TransactionStatus,
        #[case] to: TransactionStatus,
        #[case] allowed: bool,
    ) {
        let mut tx = sample_transaction();
        tx.status = from;
        assert_eq!(tx.transition_to(to).is_ok(), allowed);
    }

    #[test]
    fn payment_id_is_immutable_once_set() {
        let mut tx = sample_transaction();
        let first = PaymentId::new();
        tx.assign_payment_id(first).unwrap();
        assert!(tx.assign_payment_id(first).is_ok());
        assert!(tx.assign_payment_id(PaymentId::new()).is_err());
    }

    #[test]
    fn debit_below_zero_is_rejected() {
        let mut account = Account {
            id: AccountId::new(),
            user_id: UserId::new(),
            balance: money(500),
            currency: "USD".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            stripe_connect_account_id: None,
        };
        assert!(account.debit(&money(1000)).is_err());
        assert_eq!(account.balance, money(500));
    }

    #[test]
    fn names_split_into_first_and_last() {
        let user = User {
            id: UserId::new(),
            username: "jdoe".to_string(),
            email: "j@example.com".to_string(),
            names: "Jane Doe".to_string(),
            stripe_connect_account_id: None,
        };
        assert_eq!(user.first_and_last_name(), ("Jane".to_string(), "Doe".to_string()));
    }
}
