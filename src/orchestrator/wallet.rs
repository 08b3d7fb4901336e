/// Wallet capability
///
/// The orchestrator only ever sees this interface. Which signer sits behind
/// it (node-managed account, external signer, custodial service) is decided
/// once at start-up.

use super::action::ActionKind;
use crate::error::CoreError;
use crate::market_resolve::{Outcome, Side};
use crate::rpc::abi::{self, AbiError, Token};
use crate::rpc::{EndpointSet, TransportError};
use async_trait::async_trait;
use serde_json::json;
use thiserror::Error;
use tracing::info;

pub const SIG_APPROVE: &str = "approve(address,uint256)";
pub const SIG_CREATE_MARKET: &str = "createMarket(string,string,string,uint256)";
pub const SIG_BUY_SHARES: &str = "buyShares(uint256,bool,uint256)";
pub const SIG_CLAIM_WINNINGS: &str = "claimWinnings(uint256)";
pub const SIG_RESOLVE_MARKET: &str = "resolveMarket(uint256,uint8)";

#[derive(Debug, Clone, Error, PartialEq)]
pub enum WalletError {
    #[error("request rejected by the signer")]
    UserRejected,
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("wallet transport: {0}")]
    Transport(String),
}

impl From<WalletError> for CoreError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::UserRejected => CoreError::UserRejected,
            WalletError::Rejected(reason) => CoreError::LedgerRejected(reason),
            WalletError::Transport(reason) => CoreError::DataUnavailable(reason),
        }
    }
}

impl From<TransportError> for WalletError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected(reason) if reason.to_lowercase().contains("user denied") => {
                WalletError::UserRejected
            }
            TransportError::Rejected(reason) => WalletError::Rejected(reason),
            other => WalletError::Transport(other.to_string()),
        }
    }
}

/// A state-changing call ready for signing.
#[derive(Debug, Clone, PartialEq)]
pub struct TxRequest {
    pub kind: ActionKind,
    pub to: String,
    pub data: String,
}

impl TxRequest {
    pub fn approve(token: &str, spender: &str, amount: u128) -> Result<Self, AbiError> {
        Ok(Self {
            kind: ActionKind::Authorize,
            to: token.to_string(),
            data: abi::encode_call(SIG_APPROVE, &[Token::Address(spender.to_string()), Token::Uint(amount)])?,
        })
    }

    pub fn create_market(
        market_contract: &str,
        question: &str,
        option_a: &str,
        option_b: &str,
        duration_secs: u64,
    ) -> Result<Self, AbiError> {
        Ok(Self {
            kind: ActionKind::CreateMarket,
            to: market_contract.to_string(),
            data: abi::encode_call(
                SIG_CREATE_MARKET,
                &[
                    Token::Str(question.to_string()),
                    Token::Str(option_a.to_string()),
                    Token::Str(option_b.to_string()),
                    Token::Uint(duration_secs as u128),
                ],
            )?,
        })
    }

    pub fn buy(market_contract: &str, market_id: u64, side: Side, amount: u128) -> Result<Self, AbiError> {
        Ok(Self {
            kind: ActionKind::Buy,
            to: market_contract.to_string(),
            data: abi::encode_call(
                SIG_BUY_SHARES,
                &[
                    Token::Uint(market_id as u128),
                    Token::Bool(side.is_option_a()),
                    Token::Uint(amount),
                ],
            )?,
        })
    }

    pub fn claim(market_contract: &str, market_id: u64) -> Result<Self, AbiError> {
        Ok(Self {
            kind: ActionKind::Claim,
            to: market_contract.to_string(),
            data: abi::encode_call(SIG_CLAIM_WINNINGS, &[Token::Uint(market_id as u128)])?,
        })
    }

    /// Cancellation is resolution with the Cancelled code.
    pub fn resolve(market_contract: &str, market_id: u64, outcome: Outcome) -> Result<Self, AbiError> {
        let kind = if outcome == Outcome::Cancelled {
            ActionKind::Cancel
        } else {
            ActionKind::Resolve
        };
        Ok(Self {
            kind,
            to: market_contract.to_string(),
            data: abi::encode_call(
                SIG_RESOLVE_MARKET,
                &[Token::Uint(market_id as u128), Token::Uint(outcome.code() as u128)],
            )?,
        })
    }
}

#[async_trait]
pub trait Wallet: Send + Sync {
    fn address(&self) -> &str;

    /// Sign and submit; returns the ledger handle.
    async fn submit_action(&self, request: &TxRequest) -> Result<String, WalletError>;

    async fn sign_message(&self, message: &str) -> Result<String, WalletError>;
}

/// Account managed by the node behind the RPC endpoints.
pub struct RpcWallet {
    address: String,
    endpoints: EndpointSet,
}

impl RpcWallet {
    /// `endpoints` should use a single-shot policy so a submission is never
    /// replayed.
    pub fn new(address: impl Into<String>, endpoints: EndpointSet) -> Self {
        Self {
            address: address.into(),
            endpoints,
        }
    }
}

#[async_trait]
impl Wallet for RpcWallet {
    fn address(&self) -> &str {
        &self.address
    }

    async fn submit_action(&self, request: &TxRequest) -> Result<String, WalletError> {
        let result = self
            .endpoints
            .call(
                "eth_sendTransaction",
                json!([{ "from": self.address, "to": request.to, "data": request.data }]),
            )
            .await?;
        let handle = result
            .as_str()
            .ok_or_else(|| WalletError::Transport(format!("unexpected handle {}", result)))?
            .to_string();
        info!("✍️ [Wallet] {} submitted as {}", request.kind.as_str(), handle);
        Ok(handle)
    }

    async fn sign_message(&self, message: &str) -> Result<String, WalletError> {
        let payload = format!("0x{}", hex::encode(message.as_bytes()));
        let result = self
            .endpoints
            .call("eth_sign", json!([self.address, payload]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WalletError::Transport(format!("unexpected signature {}", result)))
    }
}
