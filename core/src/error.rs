use common::money::MoneyError;
use thiserror::Error;

/// Error taxonomy for the orchestration core.
///
/// Handlers propagate everything except `NotFound` on idempotent paths
/// and the "already processed" skip, both of which are handled inline
/// by the caller instead of turning into this type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Caller-supplied data is wrong: negative amount, nil ids, mismatched currency.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Entity missing. A write-path error; idempotent/webhook paths treat it as a skip instead.
    #[error("not found: {0}")]
    NotFound(String),

    /// A domain rule broke: insufficient funds, wrong owner, illegal state transition.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Repository/provider temporarily unavailable; safe to retry.
    #[error("transient error: {0}")]
    Transient(String),

    /// A concurrent update lost the race; a retry typically succeeds.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Unexpected event type or invalid repository cast; indicates a wiring bug.
    #[error("programmer error: {0}")]
    ProgrammerError(String),
}

impl From<MoneyError> for CoreError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::InvalidAmount(_) | MoneyError::UnknownCurrency(_) => {
                CoreError::InvalidRequest(err.to_string())
            }
            MoneyError::CurrencyMismatch(_, _) => CoreError::InvariantViolation(err.to_string()),
            MoneyError::Overflow => CoreError::Transient(err.to_string()),
        }
    }
}

impl CoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound(_))
    }
}
