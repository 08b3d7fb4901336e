/// Chain Reader
///
/// Read-side client for the remote ledger. Every query goes through the
/// ranked `EndpointSet`, so transient failures are retried once on the same
/// endpoint and then on the next one. Exhausted retries come back as
/// `Read::Unavailable`, which callers must treat as "try again later" and
/// never as "the entity does not exist".

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::market_resolve::{MarketStatus, Outcome};
use crate::rpc::abi::{self, AbiError, Decoder, Token};
use crate::rpc::transport::{call_params, params, TransportError};
use crate::rpc::EndpointSet;
use crate::spend_gate::AllowanceState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ============================================================================
// CONTRACT SURFACE
// ============================================================================

pub const SIG_MARKET_COUNT: &str = "marketCount()";
pub const SIG_MARKET_INFO: &str = "getMarketInfo(uint256)";
pub const SIG_SHARES_BALANCE: &str = "getSharesBalance(uint256,address)";
pub const SIG_BALANCE_OF: &str = "balanceOf(address)";
pub const SIG_ALLOWANCE: &str = "allowance(address,address)";

/// Counts above this are treated as a garbled answer, not a market list.
pub const MAX_BULK_MARKETS: u64 = 100_000;

/// Preallocation cap for a bulk load; the vector grows past it if needed.
const BULK_PREALLOC: u64 = 1_024;

// ============================================================================
// READ RESULT
// ============================================================================

/// Outcome of a single read.
#[derive(Debug, Clone, PartialEq)]
pub enum Read<T> {
    Ready(T),
    /// The ledger answered and the entity does not exist
    NotFound,
    /// No usable answer after retries; say nothing about existence
    Unavailable,
}

impl<T> Read<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Read::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Read::Unavailable)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Read<U> {
        match self {
            Read::Ready(value) => Read::Ready(f(value)),
            Read::NotFound => Read::NotFound,
            Read::Unavailable => Read::Unavailable,
        }
    }

    /// Collapse to a `CoreResult`, naming what was being read.
    pub fn require(self, what: &str) -> CoreResult<T> {
        match self {
            Read::Ready(value) => Ok(value),
            Read::NotFound => Err(CoreError::InvalidInput(format!("{} does not exist", what))),
            Read::Unavailable => Err(CoreError::DataUnavailable(what.to_string())),
        }
    }
}

// ============================================================================
// REMOTE RECORDS
// ============================================================================

/// Market as the remote ledger reports it (pari-mutuel share totals).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteMarket {
    pub id: u64,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub end_time: u64,
    pub outcome: Outcome,
    pub total_shares_a: u128,
    pub total_shares_b: u128,
    pub resolved: bool,
}

impl RemoteMarket {
    pub fn status(&self, now: u64) -> MarketStatus {
        match (self.resolved, self.outcome) {
            (true, Outcome::Cancelled) => MarketStatus::Cancelled,
            (true, _) => MarketStatus::Resolved,
            (false, _) if now >= self.end_time => MarketStatus::Expired,
            _ => MarketStatus::Active,
        }
    }

    fn decode(id: u64, data: &[u8]) -> Result<Self, AbiError> {
        let mut d = Decoder::new(data);
        let question = d.string()?;
        let option_a = d.string()?;
        let option_b = d.string()?;
        let end_time = d.uint()?.min(u64::MAX as u128) as u64;
        let code = d.uint8()?;
        let outcome = Outcome::from_code(code)
            .ok_or_else(|| AbiError::InvalidHex(format!("outcome code {}", code)))?;
        Ok(Self {
            id,
            question,
            option_a,
            option_b,
            end_time,
            outcome,
            total_shares_a: d.uint()?,
            total_shares_b: d.uint()?,
            resolved: d.boolean()?,
        })
    }
}

/// A user's share holdings in one remote market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteShares {
    pub shares_a: u128,
    pub shares_b: u128,
}

/// Mined status of a submitted action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted(String),
}

/// Result of loading every market.
#[derive(Debug, Clone, Default)]
pub struct BulkLoad {
    pub markets: Vec<RemoteMarket>,
    /// Count the ledger reported
    pub expected: u64,
    /// Indices that were unavailable after retries
    pub missing: Vec<u64>,
}

impl BulkLoad {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty() && self.markets.len() as u64 == self.expected
    }

    pub fn summary(&self) -> String {
        format!("{} of {} loaded", self.markets.len(), self.expected)
    }
}

/// Result of the connectivity probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    pub block_height: u64,
}

// ============================================================================
// LEDGER VIEW
// ============================================================================

/// Read capabilities the orchestrator depends on.
#[async_trait]
pub trait LedgerView: Send + Sync {
    async fn allowance_state(&self, owner: &str) -> Read<AllowanceState>;
    async fn market(&self, market_id: u64) -> Read<RemoteMarket>;
    async fn market_count(&self) -> Read<u64>;
    async fn user_shares(&self, market_id: u64, user: &str) -> Read<RemoteShares>;
    async fn receipt(&self, handle: &str) -> Read<ReceiptStatus>;
    fn now(&self) -> u64;
}

// ============================================================================
// CHAIN READER
// ============================================================================

pub struct ChainReader {
    endpoints: EndpointSet,
    market_contract: String,
    token_contract: String,
    bulk_read_delay: Duration,
    clock: Arc<dyn Clock>,
}

impl ChainReader {
    pub fn new(
        endpoints: EndpointSet,
        market_contract: impl Into<String>,
        token_contract: impl Into<String>,
        bulk_read_delay: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoints,
            market_contract: market_contract.into(),
            token_contract: token_contract.into(),
            bulk_read_delay,
            clock,
        }
    }

    pub fn market_contract(&self) -> &str {
        &self.market_contract
    }

    pub fn token_contract(&self) -> &str {
        &self.token_contract
    }

    /// Fail fast before bulk work: the chain must answer and the market
    /// contract must have code deployed.
    pub async fn probe(&self) -> CoreResult<ProbeReport> {
        let height = self
            .endpoints
            .call("eth_blockNumber", json!([]))
            .await
            .map_err(|e| CoreError::DataUnavailable(format!("block height: {}", e)))?;
        let block_height = quantity(&height)
            .map_err(|e| CoreError::DataUnavailable(format!("block height: {}", e)))?
            .min(u64::MAX as u128) as u64;

        let code = self
            .endpoints
            .call(
                "eth_getCode",
                params([json!(self.market_contract), json!("latest")]),
            )
            .await
            .map_err(|e| CoreError::DataUnavailable(format!("contract code: {}", e)))?;
        let code = code.as_str().unwrap_or("0x");
        if code.trim_start_matches("0x").is_empty() {
            return Err(CoreError::DataUnavailable(format!(
                "no contract deployed at {}",
                self.market_contract
            )));
        }

        debug!("[ChainReader] probe ok at block {}", block_height);
        Ok(ProbeReport { block_height })
    }

    pub async fn get_market_count(&self) -> Read<u64> {
        self.eth_call(&self.market_contract, SIG_MARKET_COUNT, &[])
            .await
            .and_then_decode(|bytes| Decoder::new(bytes).uint())
            .map(|count| count.min(u64::MAX as u128) as u64)
    }

    /// A revert here means the index is out of range, reported as `NotFound`.
    pub async fn get_market_info(&self, market_id: u64) -> Read<RemoteMarket> {
        self.eth_call(&self.market_contract, SIG_MARKET_INFO, &[Token::Uint(market_id as u128)])
            .await
            .not_found_on_revert()
            .and_then_decode(|bytes| RemoteMarket::decode(market_id, bytes))
    }

    pub async fn get_user_shares(&self, market_id: u64, user: &str) -> Read<RemoteShares> {
        self.eth_call(
            &self.market_contract,
            SIG_SHARES_BALANCE,
            &[Token::Uint(market_id as u128), Token::Address(user.to_string())],
        )
        .await
        .not_found_on_revert()
        .and_then_decode(|bytes| {
            let mut d = Decoder::new(bytes);
            Ok(RemoteShares {
                shares_a: d.uint()?,
                shares_b: d.uint()?,
            })
        })
    }

    pub async fn get_balance(&self, owner: &str) -> Read<u128> {
        self.eth_call(&self.token_contract, SIG_BALANCE_OF, &[Token::Address(owner.to_string())])
            .await
            .and_then_decode(|bytes| Decoder::new(bytes).uint())
    }

    /// Allowance granted by `owner` to the market contract.
    pub async fn get_allowance(&self, owner: &str) -> Read<u128> {
        self.eth_call(
            &self.token_contract,
            SIG_ALLOWANCE,
            &[
                Token::Address(owner.to_string()),
                Token::Address(self.market_contract.clone()),
            ],
        )
        .await
        .and_then_decode(|bytes| Decoder::new(bytes).uint())
    }

    /// Balance and allowance read together into one snapshot.
    pub async fn get_allowance_state(&self, owner: &str) -> Read<AllowanceState> {
        let balance = match self.get_balance(owner).await {
            Read::Ready(balance) => balance,
            Read::NotFound => return Read::NotFound,
            Read::Unavailable => return Read::Unavailable,
        };
        self.get_allowance(owner)
            .await
            .map(|allowance| AllowanceState::new(balance, allowance, self.clock.now()))
    }

    /// `NotFound` while the action is still pending.
    pub async fn get_receipt(&self, handle: &str) -> Read<ReceiptStatus> {
        let value = match self
            .endpoints
            .call("eth_getTransactionReceipt", params([json!(handle)]))
            .await
        {
            Ok(value) => value,
            Err(e) => {
                warn!("⚠️ [ChainReader] receipt {} unavailable: {}", handle, e);
                return Read::Unavailable;
            }
        };
        if value.is_null() {
            return Read::NotFound;
        }
        match value.get("status").and_then(Value::as_str) {
            Some("0x1") => Read::Ready(ReceiptStatus::Success),
            Some(_) => {
                let reason = value
                    .get("revertReason")
                    .and_then(Value::as_str)
                    .unwrap_or("execution reverted")
                    .to_string();
                Read::Ready(ReceiptStatus::Reverted(reason))
            }
            None => {
                warn!("⚠️ [ChainReader] receipt {} has no status field", handle);
                Read::Unavailable
            }
        }
    }

    /// Load every market sequentially after a probe. A failed index never
    /// aborts the rest.
    pub async fn load_all_markets(&self) -> CoreResult<BulkLoad> {
        self.probe().await?;
        let expected = self.get_market_count().await.require("market count")?;
        if expected > MAX_BULK_MARKETS {
            return Err(CoreError::DataUnavailable(format!(
                "market count {} exceeds bulk limit {}",
                expected, MAX_BULK_MARKETS
            )));
        }

        let mut load = BulkLoad {
            markets: Vec::with_capacity(expected.min(BULK_PREALLOC) as usize),
            expected,
            missing: Vec::new(),
        };

        for market_id in 0..expected {
            if market_id > 0 && !self.bulk_read_delay.is_zero() {
                tokio::time::sleep(self.bulk_read_delay).await;
            }
            match self.get_market_info(market_id).await {
                Read::Ready(market) => load.markets.push(market),
                Read::NotFound | Read::Unavailable => {
                    warn!("⚠️ [ChainReader] market {} could not be loaded", market_id);
                    load.missing.push(market_id);
                }
            }
        }

        info!("📥 [ChainReader] {}", load.summary());
        Ok(load)
    }

    async fn eth_call(&self, to: &str, signature: &str, args: &[Token]) -> RawRead {
        let data = match abi::encode_call(signature, args) {
            Ok(data) => data,
            Err(e) => {
                warn!("⚠️ [ChainReader] cannot encode {}: {}", signature, e);
                return RawRead(Err(TransportError::Malformed(e.to_string())), signature.to_string());
            }
        };
        RawRead(
            self.endpoints.call("eth_call", call_params(to, &data)).await,
            signature.to_string(),
        )
    }
}

/// Raw `eth_call` result awaiting decoding.
struct RawRead(Result<Value, TransportError>, String);

/// Intermediate after mapping reverts.
enum Mapped {
    Value(Value),
    NotFound,
    Unavailable,
}

impl RawRead {
    fn not_found_on_revert(self) -> MappedRead {
        let RawRead(result, signature) = self;
        let mapped = match result {
            Ok(value) => Mapped::Value(value),
            Err(TransportError::Rejected(_)) => Mapped::NotFound,
            Err(e) => {
                warn!("⚠️ [ChainReader] {} unavailable: {}", signature, e);
                Mapped::Unavailable
            }
        };
        MappedRead(mapped, signature)
    }

    fn and_then_decode<T>(self, decode: impl FnOnce(&[u8]) -> Result<T, AbiError>) -> Read<T> {
        let RawRead(result, signature) = self;
        let mapped = match result {
            Ok(value) => Mapped::Value(value),
            Err(e) => {
                warn!("⚠️ [ChainReader] {} unavailable: {}", signature, e);
                Mapped::Unavailable
            }
        };
        MappedRead(mapped, signature).and_then_decode(decode)
    }
}

struct MappedRead(Mapped, String);

impl MappedRead {
    fn and_then_decode<T>(self, decode: impl FnOnce(&[u8]) -> Result<T, AbiError>) -> Read<T> {
        let MappedRead(mapped, signature) = self;
        let value = match mapped {
            Mapped::Value(value) => value,
            Mapped::NotFound => return Read::NotFound,
            Mapped::Unavailable => return Read::Unavailable,
        };
        let decoded = value
            .as_str()
            .ok_or_else(|| AbiError::InvalidHex(value.to_string()))
            .and_then(abi::decode_hex)
            .and_then(|bytes| decode(&bytes));
        match decoded {
            Ok(result) => Read::Ready(result),
            Err(e) => {
                warn!("⚠️ [ChainReader] {} returned undecodable data: {}", signature, e);
                Read::Unavailable
            }
        }
    }
}

fn quantity(value: &Value) -> Result<u128, AbiError> {
    let text = value
        .as_str()
        .ok_or_else(|| AbiError::InvalidHex(value.to_string()))?;
    abi::parse_quantity(text)
}

#[async_trait]
impl LedgerView for ChainReader {
    async fn allowance_state(&self, owner: &str) -> Read<AllowanceState> {
        self.get_allowance_state(owner).await
    }

    async fn market(&self, market_id: u64) -> Read<RemoteMarket> {
        self.get_market_info(market_id).await
    }

    async fn market_count(&self) -> Read<u64> {
        self.get_market_count().await
    }

    async fn user_shares(&self, market_id: u64, user: &str) -> Read<RemoteShares> {
        self.get_user_shares(market_id, user).await
    }

    async fn receipt(&self, handle: &str) -> Read<ReceiptStatus> {
        self.get_receipt(handle).await
    }

    fn now(&self) -> u64 {
        self.clock.now()
    }
}
