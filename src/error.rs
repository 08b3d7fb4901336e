// ============================================================================
// Error taxonomy for the market core
// ============================================================================
//
// Every failure that leaves the core is a `CoreError`. Callers branch on
// `kind()` (validation, transient, ledger rejection, race) and show
// `user_message()` to the person who triggered the action. A low allowance
// never surfaces as an error: the orchestrator inserts an Authorize step.
//
// ============================================================================

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad class of a failure, used to decide whether anything is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Detected locally before submission; never retried.
    Validation,
    /// Endpoint unreachable or malformed response; retried by the reader.
    Transient,
    /// The remote ledger refused the action (revert).
    LedgerRejection,
    /// Conditions changed between check and submission.
    ConcurrencyRace,
    /// Local persistence failed.
    Storage,
    Internal,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoreError {
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("duration {requested}s outside allowed window [{min}s, {max}s]")]
    InvalidDuration { requested: u64, min: u64, max: u64 },

    #[error("insufficient balance: have {available}, need {requested}")]
    InsufficientBalance { available: u128, requested: u128 },

    #[error("market {0} not found")]
    MarketNotFound(u64),

    #[error("trading has ended for market {0}")]
    MarketTradingEnded(u64),

    #[error("market {0} is already resolved")]
    MarketAlreadyResolved(u64),

    #[error("market {0} has not reached its end time")]
    MarketNotEnded(u64),

    #[error("market {0} is not resolved")]
    MarketNotResolved(u64),

    #[error("no winnings to claim in market {0}")]
    NoWinningsToClaim(u64),

    #[error("winnings already claimed in market {0}")]
    AlreadyClaimed(u64),

    #[error("{actor} is not allowed to {action}")]
    Unauthorized { actor: String, action: String },

    #[error("a spend-bearing action is already in flight for {0}")]
    ActionAlreadyInFlight(String),

    #[error("request abandoned before signature")]
    UserRejected,

    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    #[error("rejected by ledger: {0}")]
    LedgerRejected(String),

    #[error("conditions changed: {0}")]
    ConditionsChanged(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidAmount(_)
            | CoreError::InvalidInput(_)
            | CoreError::InvalidDuration { .. }
            | CoreError::InsufficientBalance { .. }
            | CoreError::MarketNotFound(_)
            | CoreError::MarketTradingEnded(_)
            | CoreError::MarketAlreadyResolved(_)
            | CoreError::MarketNotEnded(_)
            | CoreError::MarketNotResolved(_)
            | CoreError::NoWinningsToClaim(_)
            | CoreError::AlreadyClaimed(_)
            | CoreError::Unauthorized { .. }
            | CoreError::ActionAlreadyInFlight(_)
            | CoreError::UserRejected
            | CoreError::Config(_) => ErrorKind::Validation,
            CoreError::DataUnavailable(_) => ErrorKind::Transient,
            CoreError::LedgerRejected(_) => ErrorKind::LedgerRejection,
            CoreError::ConditionsChanged(_) => ErrorKind::ConcurrencyRace,
            CoreError::Storage(_) => ErrorKind::Storage,
            CoreError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message suitable for showing to the person who initiated the action.
    pub fn user_message(&self) -> String {
        match self {
            CoreError::ConditionsChanged(detail) => {
                format!("Conditions changed, please retry ({})", detail)
            }
            CoreError::DataUnavailable(_) => {
                "Ledger data is temporarily unavailable, please retry shortly".to_string()
            }
            CoreError::LedgerRejected(reason) => format!("Transaction reverted: {}", reason),
            CoreError::ActionAlreadyInFlight(_) => {
                "Another transaction is still pending for this wallet".to_string()
            }
            other => {
                let text = other.to_string();
                let mut chars = text.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => text,
                }
            }
        }
    }

    /// Tagged form handed to the intent layer.
    pub fn to_tagged(&self) -> TaggedError {
        TaggedError {
            kind: self.kind(),
            message: self.user_message(),
        }
    }
}

impl From<sled::Error> for CoreError {
    fn from(err: sled::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}

impl From<bincode::Error> for CoreError {
    fn from(err: bincode::Error) -> Self {
        CoreError::Storage(format!("record encoding: {}", err))
    }
}

/// `{kind, message}` pair returned across the core API boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaggedError {
    pub kind: ErrorKind,
    pub message: String,
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(CoreError::MarketNotEnded(1).kind(), ErrorKind::Validation);
        assert_eq!(
            CoreError::InsufficientBalance { available: 1, requested: 2 }.kind(),
            ErrorKind::Validation
        );
        assert_eq!(CoreError::DataUnavailable("x".into()).kind(), ErrorKind::Transient);
        assert_eq!(CoreError::LedgerRejected("x".into()).kind(), ErrorKind::LedgerRejection);
        assert_eq!(CoreError::ConditionsChanged("x".into()).kind(), ErrorKind::ConcurrencyRace);
    }

    #[test]
    fn test_race_message_asks_for_retry() {
        let tagged = CoreError::ConditionsChanged("market expired".into()).to_tagged();
        assert_eq!(tagged.kind, ErrorKind::ConcurrencyRace);
        assert!(tagged.message.starts_with("Conditions changed, please retry"));
    }

    #[test]
    fn test_default_message_is_capitalised() {
        assert_eq!(
            CoreError::AlreadyClaimed(4).user_message(),
            "Winnings already claimed in market 4"
        );
    }
}
