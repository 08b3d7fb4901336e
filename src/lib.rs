/// Binary Markets - AMM prediction market core
/// Exports all modules for use as a library crate

pub mod amount;
pub mod app_state;
pub mod chain_reader;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod market_resolve;
pub mod models;
pub mod orchestrator;
pub mod sim_store;
pub mod spend_gate;

#[path = "../rpc/mod.rs"]
pub mod rpc;

pub use amount::AmountCodec;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{CoreError, CoreResult, ErrorKind, TaggedError};

// Pricing and registry
pub use market_resolve::{
    ClaimReceipt, Market, MarketManager, MarketStatus, Outcome, Position, RegistryConfig, Side,
    TradeQuote, TradeReceipt,
};

// Remote ledger
pub use chain_reader::{ChainReader, LedgerView, Read, RemoteMarket, RemoteShares};
pub use orchestrator::{
    ActionKind, ActionStatus, Authorization, Orchestrator, OrchestratorConfig, PendingAction,
    Submission, Wallet,
};
pub use spend_gate::{AllowanceState, GateDecision};

pub use sim_store::{SimReceipt, SimStore};
