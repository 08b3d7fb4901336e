use crate::error::{CoreError, CoreResult};
use crate::market_resolve::cpmm::{self, PoolState, Prices, Side, TradeQuote};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::info;

/// Market registry for binary-outcome markets
/// Owns Market and Position records and enforces their lifecycle:
///
/// Created → Active (now < end_time) → Expired (now ≥ end_time)
///        → Resolved | Cancelled (terminal, only after end_time)

// ============================================================================
// OUTCOME
// ============================================================================

/// Market outcome. Wire codes: 0=Unresolved, 1=OptionA, 2=OptionB, 3=Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Unresolved,
    OptionA,
    OptionB,
    Cancelled,
}

impl Outcome {
    pub fn code(&self) -> u8 {
        match self {
            Outcome::Unresolved => 0,
            Outcome::OptionA => 1,
            Outcome::OptionB => 2,
            Outcome::Cancelled => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Outcome::Unresolved),
            1 => Some(Outcome::OptionA),
            2 => Some(Outcome::OptionB),
            3 => Some(Outcome::Cancelled),
            _ => None,
        }
    }

    /// Winning side, if the outcome names one.
    pub fn winning_side(&self) -> Option<Side> {
        match self {
            Outcome::OptionA => Some(Side::OptionA),
            Outcome::OptionB => Some(Side::OptionB),
            _ => None,
        }
    }
}

impl Default for Outcome {
    fn default() -> Self {
        Outcome::Unresolved
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Outcome::Unresolved => "unresolved",
            Outcome::OptionA => "option_a",
            Outcome::OptionB => "option_b",
            Outcome::Cancelled => "cancelled",
        };
        write!(f, "{}", text)
    }
}

/// Derived lifecycle status at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    /// Trading open
    Active,
    /// Past end time, awaiting resolution
    Expired,
    Resolved,
    Cancelled,
}

impl MarketStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MarketStatus::Resolved | MarketStatus::Cancelled)
    }
}

// ============================================================================
// MARKET & POSITION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    /// Monotonically assigned identifier
    pub id: u64,

    pub question: String,
    pub option_a_label: String,
    pub option_b_label: String,

    /// Account allowed to resolve or cancel (besides the registry admin)
    pub creator: String,

    pub created_at: u64,

    /// New trades are rejected from this instant on
    pub end_time: u64,

    /// Pool balances and the preserved constant product
    pub pools: PoolState,

    /// Outstanding shares per option, used for pro-rata payouts
    pub total_shares_a: u128,
    pub total_shares_b: u128,

    /// Sum of all deposits
    pub total_invested: u128,

    /// Monotonic false → true
    pub resolved: bool,
    pub outcome: Outcome,
    pub resolved_at: Option<u64>,
}

impl Market {
    pub fn status(&self, now: u64) -> MarketStatus {
        match (self.resolved, self.outcome) {
            (true, Outcome::Cancelled) => MarketStatus::Cancelled,
            (true, _) => MarketStatus::Resolved,
            (false, _) if now >= self.end_time => MarketStatus::Expired,
            _ => MarketStatus::Active,
        }
    }

    pub fn is_trading_open(&self, now: u64) -> bool {
        self.status(now) == MarketStatus::Active
    }

    pub fn total_shares(&self, side: Side) -> u128 {
        match side {
            Side::OptionA => self.total_shares_a,
            Side::OptionB => self.total_shares_b,
        }
    }

    pub fn label(&self, side: Side) -> &str {
        match side {
            Side::OptionA => &self.option_a_label,
            Side::OptionB => &self.option_b_label,
        }
    }

    pub fn prices(&self) -> CoreResult<Prices> {
        self.pools.prices()
    }
}

/// A user's holdings in one market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub market_id: u64,
    pub user: String,
    pub shares_a: u128,
    pub shares_b: u128,
    /// Display only; refunds on cancellation use it, payouts do not
    pub invested: u128,
    /// Logically closed once winnings are claimed
    pub claimed: bool,
    pub payout: Option<u128>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Position {
    pub fn new(market_id: u64, user: &str, now: u64) -> Self {
        Self {
            market_id,
            user: user.to_string(),
            shares_a: 0,
            shares_b: 0,
            invested: 0,
            claimed: false,
            payout: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn shares(&self, side: Side) -> u128 {
        match side {
            Side::OptionA => self.shares_a,
            Side::OptionB => self.shares_b,
        }
    }

    fn add_shares(&mut self, side: Side, shares: u128) {
        match side {
            Side::OptionA => self.shares_a += shares,
            Side::OptionB => self.shares_b += shares,
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Limits applied to every market in a registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub min_duration_secs: u64,
    pub max_duration_secs: u64,
    /// Smallest accepted deposit, minor units
    pub min_stake: u128,
    /// Liquidity split across both pools on creation, minor units
    pub seed_liquidity: u128,
    /// Account allowed to resolve/cancel any market
    pub admin: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            min_duration_secs: 60 * 60,
            max_duration_secs: 30 * 24 * 60 * 60,
            min_stake: 1_000_000,
            seed_liquidity: 1_000_000_000,
            admin: None,
        }
    }
}

/// Result of a successful trade, carrying the records that changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeReceipt {
    pub market: Market,
    pub position: Position,
    pub shares_issued: u128,
    pub prices_after: Prices,
}

/// Result of a successful claim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimReceipt {
    pub position: Position,
    pub payout: u128,
    pub refund: bool,
}

/// Prior state of the records one operation may touch.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    market_id: u64,
    market: Option<Market>,
    position: Option<(String, Option<Position>)>,
    next_id: u64,
}

/// Market manager
///
/// Every operation validates fully before mutating, so a failed call leaves
/// both markets and positions exactly as they were.
#[derive(Debug, Clone)]
pub struct MarketManager {
    config: RegistryConfig,
    markets: BTreeMap<u64, Market>,
    positions: HashMap<(u64, String), Position>,
    next_id: u64,
}

impl MarketManager {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            markets: BTreeMap::new(),
            positions: HashMap::new(),
            next_id: 0,
        }
    }

    /// Rebuild a registry from persisted records.
    pub fn from_records(
        config: RegistryConfig,
        markets: Vec<Market>,
        positions: Vec<Position>,
    ) -> Self {
        let next_id = markets.iter().map(|m| m.id + 1).max().unwrap_or(0);
        Self {
            config,
            markets: markets.into_iter().map(|m| (m.id, m)).collect(),
            positions: positions
                .into_iter()
                .map(|p| ((p.market_id, p.user.clone()), p))
                .collect(),
            next_id,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn market(&self, market_id: u64) -> CoreResult<&Market> {
        self.markets
            .get(&market_id)
            .ok_or(CoreError::MarketNotFound(market_id))
    }

    pub fn markets(&self) -> Vec<&Market> {
        self.markets.values().collect()
    }

    pub fn position(&self, market_id: u64, user: &str) -> Option<&Position> {
        self.positions.get(&(market_id, user.to_string()))
    }

    pub fn positions_for(&self, user: &str) -> Vec<&Position> {
        let mut positions: Vec<&Position> =
            self.positions.values().filter(|p| p.user == user).collect();
        positions.sort_by_key(|p| p.market_id);
        positions
    }

    /// Remember the market (and optionally one user's position) so a
    /// mutation on them can be undone with `rollback`.
    pub fn checkpoint(&self, market_id: u64, user: Option<&str>) -> Checkpoint {
        Checkpoint {
            market_id,
            market: self.markets.get(&market_id).cloned(),
            position: user.map(|u| (u.to_string(), self.position(market_id, u).cloned())),
            next_id: self.next_id,
        }
    }

    /// Creation checkpoint: the id the next market will take.
    pub fn checkpoint_create(&self) -> Checkpoint {
        self.checkpoint(self.next_id, None)
    }

    pub fn rollback(&mut self, checkpoint: Checkpoint) {
        let Checkpoint { market_id, market, position, next_id } = checkpoint;
        match market {
            Some(market) => {
                self.markets.insert(market_id, market);
            }
            None => {
                self.markets.remove(&market_id);
            }
        }
        if let Some((user, position)) = position {
            let key = (market_id, user);
            match position {
                Some(position) => {
                    self.positions.insert(key, position);
                }
                None => {
                    self.positions.remove(&key);
                }
            }
        }
        self.next_id = next_id;
    }

    /// Open a market with evenly split seed pools.
    pub fn create_market(
        &mut self,
        question: &str,
        option_a: &str,
        option_b: &str,
        duration_secs: u64,
        creator: &str,
        now: u64,
    ) -> CoreResult<Market> {
        if duration_secs < self.config.min_duration_secs
            || duration_secs > self.config.max_duration_secs
        {
            return Err(CoreError::InvalidDuration {
                requested: duration_secs,
                min: self.config.min_duration_secs,
                max: self.config.max_duration_secs,
            });
        }
        for (field, value) in [("question", question), ("option A", option_a), ("option B", option_b)] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidInput(format!("{} must not be empty", field)));
            }
        }
        if option_a.trim() == option_b.trim() {
            return Err(CoreError::InvalidInput("options must differ".to_string()));
        }

        let pools = PoolState::seeded(self.config.seed_liquidity)?;
        let end_time = now
            .checked_add(duration_secs)
            .ok_or_else(|| CoreError::InvalidInput("end time overflows".to_string()))?;

        let market = Market {
            id: self.next_id,
            question: question.trim().to_string(),
            option_a_label: option_a.trim().to_string(),
            option_b_label: option_b.trim().to_string(),
            creator: creator.to_string(),
            created_at: now,
            end_time,
            pools,
            total_shares_a: 0,
            total_shares_b: 0,
            total_invested: 0,
            resolved: false,
            outcome: Outcome::Unresolved,
            resolved_at: None,
        };

        self.next_id += 1;
        self.markets.insert(market.id, market.clone());
        info!(market_id = market.id, end_time, "📊 market created: {}", market.question);
        Ok(market)
    }

    /// Preview a deposit without changing anything.
    pub fn quote(&self, market_id: u64, side: Side, deposit: u128, now: u64) -> CoreResult<TradeQuote> {
        let market = self.market(market_id)?;
        self.check_tradable(market, deposit, now)?;
        cpmm::quote_trade(&market.pools, side, deposit)
    }

    /// Buy shares of `side` with `deposit` minor units.
    pub fn record_trade(
        &mut self,
        market_id: u64,
        user: &str,
        side: Side,
        deposit: u128,
        now: u64,
    ) -> CoreResult<TradeReceipt> {
        let quote = self.quote(market_id, side, deposit, now)?;

        let mut market = self.market(market_id)?.clone();
        market.pools.pool_a = quote.new_pool_a;
        market.pools.pool_b = quote.new_pool_b;
        match side {
            Side::OptionA => market.total_shares_a += quote.shares,
            Side::OptionB => market.total_shares_b += quote.shares,
        }
        market.total_invested += deposit;

        let key = (market_id, user.to_string());
        let mut position = self
            .positions
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Position::new(market_id, user, now));
        position.add_shares(side, quote.shares);
        position.invested += deposit;
        position.updated_at = now;

        self.markets.insert(market_id, market.clone());
        self.positions.insert(key, position.clone());

        info!(
            market_id,
            user,
            side = %side,
            deposit,
            shares = quote.shares,
            "🎯 trade recorded"
        );

        Ok(TradeReceipt {
            market,
            position,
            shares_issued: quote.shares,
            prices_after: quote.prices_after,
        })
    }

    /// Settle a market. Only after its end time, only once, only by the
    /// creator or the registry admin.
    pub fn resolve(
        &mut self,
        market_id: u64,
        outcome: Outcome,
        actor: &str,
        now: u64,
    ) -> CoreResult<Market> {
        if outcome == Outcome::Unresolved {
            return Err(CoreError::InvalidInput(
                "cannot resolve a market to Unresolved".to_string(),
            ));
        }

        let market = self.market(market_id)?;
        let is_admin = self.config.admin.as_deref() == Some(actor);
        if market.creator != actor && !is_admin {
            return Err(CoreError::Unauthorized {
                actor: actor.to_string(),
                action: format!("resolve market {}", market_id),
            });
        }
        if market.resolved {
            return Err(CoreError::MarketAlreadyResolved(market_id));
        }
        if now < market.end_time {
            return Err(CoreError::MarketNotEnded(market_id));
        }

        let mut market = market.clone();
        market.resolved = true;
        market.outcome = outcome;
        market.resolved_at = Some(now);
        self.markets.insert(market_id, market.clone());

        info!(market_id, outcome = %outcome, actor, "✅ market settled");
        Ok(market)
    }

    /// Cancel a market; same gate as `resolve`.
    pub fn cancel(&mut self, market_id: u64, actor: &str, now: u64) -> CoreResult<Market> {
        self.resolve(market_id, Outcome::Cancelled, actor, now)
    }

    /// Pay out a user's winning shares, or refund their stake on a cancelled
    /// market.
    pub fn claim(&mut self, market_id: u64, user: &str, now: u64) -> CoreResult<ClaimReceipt> {
        let market = self.market(market_id)?;
        if !market.resolved {
            return Err(CoreError::MarketNotResolved(market_id));
        }

        let key = (market_id, user.to_string());
        let position = self
            .positions
            .get(&key)
            .ok_or(CoreError::NoWinningsToClaim(market_id))?;
        if position.claimed {
            return Err(CoreError::AlreadyClaimed(market_id));
        }

        let (payout, refund) = match market.outcome.winning_side() {
            Some(side) => {
                let held = position.shares(side);
                if held == 0 {
                    return Err(CoreError::NoWinningsToClaim(market_id));
                }
                (winning_payout(market, side, held)?, false)
            }
            None => {
                if position.invested == 0 {
                    return Err(CoreError::NoWinningsToClaim(market_id));
                }
                (position.invested, true)
            }
        };

        let mut position = position.clone();
        position.claimed = true;
        position.payout = Some(payout);
        position.updated_at = now;
        self.positions.insert(key, position.clone());

        info!(market_id, user, payout, refund, "💸 claim paid");
        Ok(ClaimReceipt { position, payout, refund })
    }

    fn check_tradable(&self, market: &Market, deposit: u128, now: u64) -> CoreResult<()> {
        if market.resolved {
            return Err(CoreError::MarketAlreadyResolved(market.id));
        }
        if now >= market.end_time {
            return Err(CoreError::MarketTradingEnded(market.id));
        }
        if deposit < self.config.min_stake {
            return Err(CoreError::InvalidAmount(format!(
                "deposit {} below minimum stake {}",
                deposit, self.config.min_stake
            )));
        }
        Ok(())
    }
}

/// Pro-rata share of the combined pool for `held` winning shares.
fn winning_payout(market: &Market, side: Side, held: u128) -> CoreResult<u128> {
    let total = market.total_shares(side);
    if total == 0 {
        return Err(CoreError::Internal(format!(
            "market {} has no outstanding shares on the winning side",
            market.id
        )));
    }
    held.checked_mul(market.pools.tvl())
        .map(|x| x / total)
        .ok_or_else(|| CoreError::Internal("payout overflow".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: u128 = 1_000_000;
    const DAY: u64 = 24 * 60 * 60;
    const T0: u64 = 1_700_000_000;

    fn registry() -> MarketManager {
        MarketManager::new(RegistryConfig {
            admin: Some("ADMIN".to_string()),
            ..RegistryConfig::default()
        })
    }

    fn with_market() -> (MarketManager, u64) {
        let mut reg = registry();
        let m = reg
            .create_market("Will it rain?", "Yes", "No", DAY, "ALICE", T0)
            .unwrap();
        (reg, m.id)
    }

    #[test]
    fn test_create_market_seeds_pools() {
        let (reg, id) = with_market();
        let market = reg.market(id).unwrap();
        assert_eq!(market.pools.pool_a, 500 * UNIT);
        assert_eq!(market.pools.pool_b, 500 * UNIT);
        assert_eq!(market.end_time, T0 + DAY);
        assert_eq!(market.status(T0), MarketStatus::Active);
        assert_eq!(market.status(T0 + DAY), MarketStatus::Expired);
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut reg = registry();
        let a = reg.create_market("Q1", "Yes", "No", DAY, "ALICE", T0).unwrap();
        let b = reg.create_market("Q2", "Yes", "No", DAY, "ALICE", T0).unwrap();
        assert_eq!(b.id, a.id + 1);
    }

    #[test]
    fn test_duration_window() {
        let mut reg = registry();
        let too_short = reg.create_market("Q", "Yes", "No", 60, "ALICE", T0);
        assert!(matches!(too_short, Err(CoreError::InvalidDuration { .. })));
        let too_long = reg.create_market("Q", "Yes", "No", 31 * DAY, "ALICE", T0);
        assert!(matches!(too_long, Err(CoreError::InvalidDuration { .. })));
        assert!(reg.markets().is_empty());
    }

    #[test]
    fn test_trade_updates_pools_and_position() {
        let (mut reg, id) = with_market();
        let receipt = reg.record_trade(id, "BOB", Side::OptionA, 100 * UNIT, T0 + 10).unwrap();

        assert_eq!(receipt.shares_issued, 83_333_334);
        assert_eq!(receipt.market.pools.pool_a, 600 * UNIT);
        assert_eq!(receipt.market.pools.pool_b, 416_666_666);
        assert_eq!(receipt.market.total_shares_a, 83_333_334);

        let pos = reg.position(id, "BOB").unwrap();
        assert_eq!(pos.shares_a, 83_333_334);
        assert_eq!(pos.invested, 100 * UNIT);

        reg.record_trade(id, "BOB", Side::OptionB, 10 * UNIT, T0 + 20).unwrap();
        let pos = reg.position(id, "BOB").unwrap();
        assert_eq!(pos.shares_a, 83_333_334);
        assert!(pos.shares_b > 0);
        assert_eq!(pos.invested, 110 * UNIT);
    }

    #[test]
    fn test_trade_gates() {
        let (mut reg, id) = with_market();
        let below_min = reg.record_trade(id, "BOB", Side::OptionA, UNIT - 1, T0);
        assert!(matches!(below_min, Err(CoreError::InvalidAmount(_))));

        let ended = reg.record_trade(id, "BOB", Side::OptionA, 10 * UNIT, T0 + DAY);
        assert_eq!(ended, Err(CoreError::MarketTradingEnded(id)));

        let missing = reg.record_trade(99, "BOB", Side::OptionA, 10 * UNIT, T0);
        assert_eq!(missing, Err(CoreError::MarketNotFound(99)));

        // Failed trades leave no trace
        assert!(reg.position(id, "BOB").is_none());
        assert_eq!(reg.market(id).unwrap().pools.pool_a, 500 * UNIT);
    }

    #[test]
    fn test_resolve_time_gate_and_once() {
        let (mut reg, id) = with_market();
        assert_eq!(
            reg.resolve(id, Outcome::OptionA, "ALICE", T0 + DAY - 1),
            Err(CoreError::MarketNotEnded(id))
        );
        assert_eq!(reg.cancel(id, "ALICE", T0), Err(CoreError::MarketNotEnded(id)));

        let resolved = reg.resolve(id, Outcome::OptionA, "ALICE", T0 + DAY).unwrap();
        assert_eq!(resolved.outcome, Outcome::OptionA);

        assert_eq!(
            reg.resolve(id, Outcome::OptionB, "ALICE", T0 + DAY + 1),
            Err(CoreError::MarketAlreadyResolved(id))
        );
        assert_eq!(reg.cancel(id, "ADMIN", T0 + DAY + 1), Err(CoreError::MarketAlreadyResolved(id)));

        let market = reg.market(id).unwrap();
        assert!(market.resolved);
        assert_eq!(market.outcome, Outcome::OptionA);
        assert_eq!(market.status(T0 + DAY * 2), MarketStatus::Resolved);
    }

    #[test]
    fn test_trade_after_resolution_rejected() {
        let (mut reg, id) = with_market();
        reg.resolve(id, Outcome::OptionB, "ADMIN", T0 + DAY).unwrap();
        let res = reg.record_trade(id, "BOB", Side::OptionA, 10 * UNIT, T0 + DAY + 5);
        assert_eq!(res, Err(CoreError::MarketAlreadyResolved(id)));
    }

    #[test]
    fn test_only_creator_or_admin_resolves() {
        let (mut reg, id) = with_market();
        let res = reg.resolve(id, Outcome::OptionA, "MALLORY", T0 + DAY);
        assert!(matches!(res, Err(CoreError::Unauthorized { .. })));
        assert!(reg.resolve(id, Outcome::OptionA, "ADMIN", T0 + DAY).is_ok());
    }

    #[test]
    fn test_cannot_resolve_to_unresolved() {
        let (mut reg, id) = with_market();
        let res = reg.resolve(id, Outcome::Unresolved, "ALICE", T0 + DAY);
        assert!(matches!(res, Err(CoreError::InvalidInput(_))));
    }

    #[test]
    fn test_claim_winning_side_pro_rata() {
        let (mut reg, id) = with_market();
        let bob = reg.record_trade(id, "BOB", Side::OptionA, 100 * UNIT, T0).unwrap();
        let carol = reg.record_trade(id, "CAROL", Side::OptionA, 50 * UNIT, T0).unwrap();
        reg.record_trade(id, "DAVE", Side::OptionB, 40 * UNIT, T0).unwrap();

        assert_eq!(reg.claim(id, "BOB", T0), Err(CoreError::MarketNotResolved(id)));

        reg.resolve(id, Outcome::OptionA, "ALICE", T0 + DAY).unwrap();
        let market = reg.market(id).unwrap().clone();
        let total_a = market.total_shares_a;
        let tvl = market.pools.tvl();

        let bob_claim = reg.claim(id, "BOB", T0 + DAY).unwrap();
        assert_eq!(bob_claim.payout, bob.shares_issued * tvl / total_a);
        assert!(!bob_claim.refund);

        let carol_claim = reg.claim(id, "CAROL", T0 + DAY).unwrap();
        assert_eq!(carol_claim.payout, carol.shares_issued * tvl / total_a);
        assert!(bob_claim.payout + carol_claim.payout <= tvl);

        assert_eq!(reg.claim(id, "DAVE", T0 + DAY), Err(CoreError::NoWinningsToClaim(id)));
        assert_eq!(reg.claim(id, "BOB", T0 + DAY), Err(CoreError::AlreadyClaimed(id)));
        assert_eq!(reg.claim(id, "NOBODY", T0 + DAY), Err(CoreError::NoWinningsToClaim(id)));
    }

    #[test]
    fn test_claim_cancelled_refunds_invested_once() {
        let (mut reg, id) = with_market();
        reg.record_trade(id, "BOB", Side::OptionA, 30 * UNIT, T0).unwrap();
        reg.record_trade(id, "BOB", Side::OptionB, 20 * UNIT, T0).unwrap();
        reg.cancel(id, "ALICE", T0 + DAY).unwrap();

        let claim = reg.claim(id, "BOB", T0 + DAY).unwrap();
        assert!(claim.refund);
        assert_eq!(claim.payout, 50 * UNIT);
        assert!(claim.position.claimed);

        assert_eq!(reg.claim(id, "BOB", T0 + DAY), Err(CoreError::AlreadyClaimed(id)));
    }

    #[test]
    fn test_outcome_codes() {
        for outcome in [Outcome::Unresolved, Outcome::OptionA, Outcome::OptionB, Outcome::Cancelled] {
            assert_eq!(Outcome::from_code(outcome.code()), Some(outcome));
        }
        assert_eq!(Outcome::from_code(4), None);
        assert_eq!(Outcome::Cancelled.code(), 3);
    }

    #[test]
    fn test_from_records_continues_ids() {
        let (reg, id) = with_market();
        let markets: Vec<Market> = reg.markets().into_iter().cloned().collect();
        let rebuilt = MarketManager::from_records(reg.config().clone(), markets, Vec::new());
        assert_eq!(rebuilt.next_id(), id + 1);
    }

    #[test]
    fn test_positions_for_user() {
        let mut reg = registry();
        let m1 = reg.create_market("Q1", "Yes", "No", DAY, "ALICE", T0).unwrap();
        let m2 = reg.create_market("Q2", "Yes", "No", DAY, "ALICE", T0).unwrap();
        reg.record_trade(m2.id, "BOB", Side::OptionA, 5 * UNIT, T0).unwrap();
        reg.record_trade(m1.id, "BOB", Side::OptionB, 5 * UNIT, T0).unwrap();
        reg.record_trade(m1.id, "CAROL", Side::OptionB, 5 * UNIT, T0).unwrap();

        let ids: Vec<u64> = reg.positions_for("BOB").iter().map(|p| p.market_id).collect();
        assert_eq!(ids, vec![m1.id, m2.id]);
    }

    #[test]
    fn test_rollback_restores_touched_records() {
        let mut reg = registry();
        let id = reg.create_market("Rain?", "Yes", "No", DAY, "ALICE", T0).unwrap().id;
        reg.record_trade(id, "BOB", Side::OptionA, 10 * UNIT, T0).unwrap();
        let market_before = reg.market(id).unwrap().clone();
        let bob_before = reg.position(id, "BOB").cloned();

        let checkpoint = reg.checkpoint(id, Some("BOB"));
        reg.record_trade(id, "BOB", Side::OptionB, 20 * UNIT, T0).unwrap();
        reg.rollback(checkpoint);
        assert_eq!(reg.market(id).unwrap(), &market_before);
        assert_eq!(reg.position(id, "BOB").cloned(), bob_before);

        // a first trade's position disappears again
        let checkpoint = reg.checkpoint(id, Some("CAROL"));
        reg.record_trade(id, "CAROL", Side::OptionB, 5 * UNIT, T0).unwrap();
        reg.rollback(checkpoint);
        assert!(reg.position(id, "CAROL").is_none());

        let checkpoint = reg.checkpoint_create();
        let next = reg.create_market("Snow?", "Yes", "No", DAY, "ALICE", T0).unwrap().id;
        reg.rollback(checkpoint);
        assert!(reg.market(next).is_err());
        assert_eq!(reg.next_id(), next);
    }
}
