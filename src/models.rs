// Data models shared by the intent API, the simulation store and the
// orchestrator's outbound metadata channel

use crate::amount::AmountCodec;
use crate::market_resolve::{
    ClaimReceipt, Market, MarketStatus, Outcome, Position, Prices, Side, TradeQuote, TradeReceipt,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Off-chain references emitted when a market is created, persisted by the
/// metadata collaborator keyed by `(market_id, contract_address)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketMetadata {
    pub market_id: u64,
    pub contract_address: String,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub description_ref: Option<String>,
    #[serde(default)]
    pub category_ref: Option<String>,
    /// Unix seconds when stored; drives retention cleanup
    #[serde(default)]
    pub stored_at: u64,
}

/// Metadata references supplied alongside a create request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRefs {
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub description_ref: Option<String>,
    #[serde(default)]
    pub category_ref: Option<String>,
}

impl MetadataRefs {
    pub fn is_empty(&self) -> bool {
        self.image_ref.is_none() && self.description_ref.is_none() && self.category_ref.is_none()
    }

    pub fn into_metadata(self, market_id: u64, contract_address: &str, stored_at: u64) -> MarketMetadata {
        MarketMetadata {
            market_id,
            contract_address: contract_address.to_string(),
            image_ref: self.image_ref,
            description_ref: self.description_ref,
            category_ref: self.category_ref,
            stored_at,
        }
    }
}

// ===== REQUESTS =====

/// POST /markets
#[derive(Debug, Deserialize)]
pub struct CreateMarketRequest {
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub duration_secs: u64,
    pub creator: String,
    #[serde(default, flatten)]
    pub metadata: MetadataRefs,
}

/// POST /markets/:id/buy
#[derive(Debug, Deserialize)]
pub struct BuyRequest {
    pub user: String,
    pub side: Side,
    /// Human decimal, e.g. "25.50"
    pub amount: String,
}

/// GET /markets/:id/quote
#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub side: Side,
    pub amount: String,
}

/// POST /markets/:id/resolve
#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub actor: String,
    pub outcome: Outcome,
}

/// POST /markets/:id/cancel
#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub actor: String,
}

/// POST /markets/:id/claim
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub user: String,
}

/// POST /ledger/authorize; no amount means unlimited
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeRequest {
    #[serde(default)]
    pub amount: Option<String>,
}

/// POST /ledger/markets (the session wallet is the creator)
#[derive(Debug, Deserialize)]
pub struct LedgerCreateMarketRequest {
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub duration_secs: u64,
    #[serde(default, flatten)]
    pub metadata: MetadataRefs,
}

/// POST /ledger/markets/:id/buy (the session wallet is the buyer)
#[derive(Debug, Deserialize)]
pub struct LedgerBuyRequest {
    pub side: Side,
    pub amount: String,
}

/// POST /ledger/markets/:id/resolve
#[derive(Debug, Deserialize)]
pub struct LedgerResolveRequest {
    pub outcome: Outcome,
}

// ===== RESPONSES =====

#[derive(Debug, Serialize)]
pub struct MarketView {
    pub id: u64,
    pub question: String,
    pub option_a: String,
    pub option_b: String,
    pub creator: String,
    pub end_time: u64,
    pub status: MarketStatus,
    pub outcome: Outcome,
    pub pool_a: String,
    pub pool_b: String,
    pub prices: Option<Prices>,
    pub total_invested: String,
}

impl MarketView {
    pub fn from_market(market: &Market, codec: &AmountCodec, now: u64) -> Self {
        Self {
            id: market.id,
            question: market.question.clone(),
            option_a: market.option_a_label.clone(),
            option_b: market.option_b_label.clone(),
            creator: market.creator.clone(),
            end_time: market.end_time,
            status: market.status(now),
            outcome: market.outcome,
            pool_a: codec.to_display_string(market.pools.pool_a),
            pool_b: codec.to_display_string(market.pools.pool_b),
            prices: market.prices().ok(),
            total_invested: codec.to_display_string(market.total_invested),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PositionView {
    pub market_id: u64,
    pub user: String,
    pub shares_a: String,
    pub shares_b: String,
    pub invested: String,
    pub claimed: bool,
    pub payout: Option<String>,
}

impl PositionView {
    pub fn from_position(position: &Position, codec: &AmountCodec) -> Self {
        Self {
            market_id: position.market_id,
            user: position.user.clone(),
            shares_a: codec.to_display_string(position.shares_a),
            shares_b: codec.to_display_string(position.shares_b),
            invested: codec.to_display_string(position.invested),
            claimed: position.claimed,
            payout: position.payout.map(|p| codec.to_display_string(p)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuoteView {
    pub side: Side,
    pub deposit: Decimal,
    pub shares: Decimal,
    pub prices_before: Prices,
    pub prices_after: Prices,
}

impl QuoteView {
    pub fn from_quote(quote: &TradeQuote, codec: &AmountCodec) -> Self {
        Self {
            side: quote.side,
            deposit: codec.to_decimal(quote.deposit),
            shares: codec.to_decimal(quote.shares),
            prices_before: quote.prices_before,
            prices_after: quote.prices_after,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TradeView {
    pub market: MarketView,
    pub position: PositionView,
    pub shares_issued: String,
    pub prices_after: Prices,
}

impl TradeView {
    pub fn from_receipt(receipt: &TradeReceipt, codec: &AmountCodec, now: u64) -> Self {
        Self {
            market: MarketView::from_market(&receipt.market, codec, now),
            position: PositionView::from_position(&receipt.position, codec),
            shares_issued: codec.to_display_string(receipt.shares_issued),
            prices_after: receipt.prices_after,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ClaimView {
    pub position: PositionView,
    pub payout: String,
    pub refund: bool,
}

impl ClaimView {
    pub fn from_receipt(receipt: &ClaimReceipt, codec: &AmountCodec) -> Self {
        Self {
            position: PositionView::from_position(&receipt.position, codec),
            payout: codec.to_display_string(receipt.payout),
            refund: receipt.refund,
        }
    }
}

/// Envelope for every mutating call: the simulation receipt handle plus the
/// resulting record.
#[derive(Debug, Serialize)]
pub struct ActionResponse<T: Serialize> {
    pub success: bool,
    pub handle: String,
    pub result: T,
}
