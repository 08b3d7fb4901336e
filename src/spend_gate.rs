/// Spend Authorization Gate
///
/// Decides whether a spend-bearing action can go straight to submission,
/// needs an Authorize step first, or cannot be funded at all. The decision is
/// pure; callers must feed it a freshly fetched `AllowanceState` on every
/// attempt because an allowance can be revoked outside this process.

use serde::{Deserialize, Serialize};

/// Allowances at or above this are treated as unlimited.
pub const UNLIMITED_ALLOWANCE_THRESHOLD: u128 = u128::MAX / 2;

/// Amount submitted by an "unlimited" Authorize action.
pub const UNLIMITED_AUTHORIZATION: u128 = u128::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    Proceed,
    RequireAuthorization,
    InsufficientBalance,
}

/// Balance must cover the amount first; allowance only matters once it does.
pub fn evaluate(requested: u128, allowance: u128, balance: u128) -> GateDecision {
    if requested > balance {
        GateDecision::InsufficientBalance
    } else if !is_unlimited(allowance) && allowance < requested {
        GateDecision::RequireAuthorization
    } else {
        GateDecision::Proceed
    }
}

pub fn is_unlimited(allowance: u128) -> bool {
    allowance >= UNLIMITED_ALLOWANCE_THRESHOLD
}

/// Cached token balance and allowance toward the market contract.
/// Always replaced as a whole on refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowanceState {
    pub balance: u128,
    pub allowance: u128,
    /// Unix seconds of the read that produced this snapshot
    pub refreshed_at: u64,
}

impl AllowanceState {
    pub fn new(balance: u128, allowance: u128, refreshed_at: u64) -> Self {
        Self { balance, allowance, refreshed_at }
    }

    pub fn has_unlimited_allowance(&self) -> bool {
        is_unlimited(self.allowance)
    }

    pub fn evaluate(&self, requested: u128) -> GateDecision {
        evaluate(requested, self.allowance, self.balance)
    }
}
