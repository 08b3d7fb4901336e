// ============================================================================
// Orchestrator Module - Write-Side Transaction Lifecycle
// ============================================================================
//
// Everything that changes remote ledger state goes through here:
//   - action: PendingAction records, their status machine, the history
//   - wallet: the signing capability and contract call builders
//   - engine: composite flows (authorize, then act) and confirmation polling
//
// ============================================================================

pub mod action;
pub mod engine;
pub mod wallet;

pub use action::{ActionKind, ActionStatus, ActionTracker, PendingAction};
pub use engine::{Authorization, Orchestrator, OrchestratorConfig, Submission};
pub use wallet::{RpcWallet, TxRequest, Wallet, WalletError};
