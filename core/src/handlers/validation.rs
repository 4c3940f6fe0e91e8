use crate::entities::Account;
use crate::error::CoreError;
use common::ids::UserId;
use common::money::Money;

fn check_positive(amount: &Money) -> Result<(), CoreError> {
    if amount.is_zero() || amount.is_negative() {
        return Err(CoreError::InvalidRequest(format!(
            "amount {amount} must be strictly positive"
        )));
    }
    Ok(())
}

fn check_currency_matches(amount: &Money, account: &Account) -> Result<(), CoreError> {
    if amount.currency() != account.currency {
        return Err(CoreError::InvariantViolation(format!(
            "amount currency {} does not match account currency {}",
            amount.currency(),
            account.currency
        )));
    }
    Ok(())
}

/// Ownership, positivity, and currency-match checks applied before a
/// deposit amount (converted or same-currency) is credited to an account.
pub fn validate_deposit(
    user_id: UserId,
    account: &Account,
    amount: &Money,
) -> Result<(), CoreError> {
    account.check_owner(user_id)?;
    check_positive(amount)?;
    check_currency_matches(amount, account)
}

/// As `validate_deposit`, plus a sufficient-funds check against the
/// account's current balance.
pub fn validate_withdraw(
    user_id: UserId,
    account: &Account,
    amount: &Money,
) -> Result<(), CoreError> {
    account.check_owner(user_id)?;
    check_positive(amount)?;
    check_currency_matches(amount, account)?;
    if !account.has_sufficient_funds(amount) {
        return Err(CoreError::InvariantViolation(format!(
            "account {} has insufficient funds for withdrawal of {amount}",
            account.id
        )));
    }
    Ok(())
}

/// Checks both legs of a transfer: distinct accounts, positive amount,
/// caller owns the source account, and the source account can cover it.
/// `from_amount` is always denominated in `from`'s currency — the debit
/// side of the leg, never the post-conversion credit amount.
pub fn validate_transfer(
    user_id: UserId,
    from: &Account,
    to: &Account,
    from_amount: &Money,
) -> Result<(), CoreError> {
    if from.id == to.id {
        return Err(CoreError::InvalidRequest(
            "transfer source and destination accounts must differ".to_string(),
        ));
    }
    from.check_owner(user_id)?;
    check_positive(from_amount)?;
    check_currency_matches(from_amount, from)?;
    if !from.has_sufficient_funds(from_amount) {
        return Err(CoreError::InvariantViolation(format!(
            "account {} has insufficient funds for transfer of {from_amount}",
            from.id
        )));
    }
    let _ = to;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::ids::AccountId;

    fn account(currency: &str, balance_minor: i64) -> Account {
        Account {
            id: AccountId::new(),
            user_id: UserId::new(),
            balance: Money::from_minor(balance_minor, currency).unwrap(),
            currency: currency.to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            stripe_connect_account_id: None,
        }
    }

    #[test]
    fn rejects_zero_and_negative_amounts() {
        let acc = account("USD", 1_000);
        assert!(validate_deposit(acc.user_id, &acc, &Money::zero("USD").unwrap()).is_err());
    }

    #[test]
    fn rejects_mismatched_owner() {
        let acc = account("USD", 1_000);
        let other = UserId::new();
        let result = validate_deposit(other, &acc, &Money::from_minor(500, "USD").unwrap());
        assert!(matches!(result, Err(CoreError::InvariantViolation(_))));
    }

    #[test]
    fn withdraw_rejects_insufficient_funds() {
        let acc = account("USD", 5_000);
        let result =
            validate_withdraw(acc.user_id, &acc, &Money::from_minor(10_000, "USD").unwrap());
        assert!(matches!(result, Err(CoreError::InvariantViolation(_))));
    }

    #[test]
    fn transfer_rejects_same_account() {
        let acc = account("USD", 5_000);
        let result = validate_transfer(
            acc.user_id,
            &acc,
            &acc,
            &Money::from_minor(100, "USD").unwrap(),
        );
        assert!(matches!(result, Err(CoreError::InvalidRequest(_))));
    }
}
