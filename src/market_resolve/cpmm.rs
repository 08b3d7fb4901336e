use crate::error::{CoreError, CoreResult};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CONSTANT-PRODUCT PRICING
// ============================================================================

/// Constant Product Market Maker over two integer pools
///
/// Formula: poolA * poolB = K
///
/// A deposit on one option is added to that option's pool; the other pool is
/// recomputed from the preserved K and the difference is issued to the
/// trader as shares of the chosen option:
///
/// - newSame  = poolSame + deposit
/// - newOther = floor(K / newSame)
/// - shares   = poolOther - newOther
///
/// All pool and share math is integer minor units. Prices and probabilities
/// are derived for display only and never written back into a pool.

/// Prices never drop below one cent, avoiding division artifacts on
/// heavily skewed pools.
pub const MIN_PRICE: Decimal = dec!(0.01);

/// Decimal places kept on derived prices.
pub const PRICE_DP: u32 = 6;

/// Decimal places kept on probabilities (percent).
pub const PROBABILITY_DP: u32 = 2;

/// Which option a trade or position refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    OptionA,
    OptionB,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::OptionA => Side::OptionB,
            Side::OptionB => Side::OptionA,
        }
    }

    /// Wire flag used by `buyShares(uint256,bool,uint256)`.
    pub fn is_option_a(&self) -> bool {
        matches!(self, Side::OptionA)
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::OptionA => write!(f, "A"),
            Side::OptionB => write!(f, "B"),
        }
    }
}

/// The two pool balances and the invariant they must preserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolState {
    pub pool_a: u128,
    pub pool_b: u128,
    pub invariant_k: u128,
}

impl PoolState {
    /// Split a seed amount evenly across both options (any odd minor unit
    /// stays with the creator) and fix K.
    pub fn seeded(seed_liquidity: u128) -> CoreResult<Self> {
        let half = seed_liquidity / 2;
        if half == 0 {
            return Err(CoreError::InvalidAmount(
                "seed liquidity too small to split across two pools".to_string(),
            ));
        }
        let invariant_k = half
            .checked_mul(half)
            .ok_or_else(|| CoreError::InvalidAmount("seed liquidity overflows invariant".into()))?;
        Ok(Self {
            pool_a: half,
            pool_b: half,
            invariant_k,
        })
    }

    pub fn pool(&self, side: Side) -> u128 {
        match side {
            Side::OptionA => self.pool_a,
            Side::OptionB => self.pool_b,
        }
    }

    /// Total value held by both pools.
    pub fn tvl(&self) -> u128 {
        self.pool_a.saturating_add(self.pool_b)
    }

    pub fn prices(&self) -> CoreResult<Prices> {
        current_prices(self.pool_a, self.pool_b, self.invariant_k)
    }
}

/// Shares issued for `deposit` on the side whose pool is `pool_same_side`.
///
/// Never negative. Returns zero only for near-empty pools, which callers
/// must reject before applying a trade.
pub fn shares_for_deposit(
    deposit: u128,
    pool_same_side: u128,
    pool_other_side: u128,
    invariant_k: u128,
) -> CoreResult<u128> {
    let new_same = pool_same_side
        .checked_add(deposit)
        .ok_or_else(|| CoreError::InvalidAmount("deposit overflows pool".to_string()))?;
    if new_same == 0 {
        return Ok(0);
    }
    let new_other = invariant_k / new_same;
    Ok(pool_other_side.saturating_sub(new_other))
}

/// Pool balances after depositing on `side`. K is left untouched.
pub fn apply_trade(deposit: u128, side: Side, pools: &PoolState) -> CoreResult<(u128, u128)> {
    let same = pools.pool(side);
    let new_same = same
        .checked_add(deposit)
        .ok_or_else(|| CoreError::InvalidAmount("deposit overflows pool".to_string()))?;
    if new_same == 0 {
        return Err(CoreError::InvalidAmount("trade against an empty pool".to_string()));
    }
    let new_other = pools.invariant_k / new_same;

    Ok(match side {
        Side::OptionA => (new_same, new_other),
        Side::OptionB => (new_other, new_same),
    })
}

/// Display prices and implied probabilities (percent) for both options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prices {
    pub price_a: Decimal,
    pub price_b: Decimal,
    pub prob_a: Decimal,
    pub prob_b: Decimal,
}

/// priceX = K / poolOpposite², floored at `MIN_PRICE`.
///
/// probX = poolOpposite / (poolA + poolB) * 100: a deposit on A shrinks pool
/// B and with it probA. probB is taken as the complement of probA so the
/// pair always sums to exactly 100.
pub fn current_prices(pool_a: u128, pool_b: u128, invariant_k: u128) -> CoreResult<Prices> {
    if pool_a == 0 || pool_b == 0 {
        return Err(CoreError::Internal("cannot price an empty pool".to_string()));
    }

    let price_a = unit_price(invariant_k, pool_b)?;
    let price_b = unit_price(invariant_k, pool_a)?;

    let a = to_decimal(pool_a)?;
    let b = to_decimal(pool_b)?;
    let total = a
        .checked_add(b)
        .ok_or_else(|| CoreError::Internal("pool total exceeds decimal range".to_string()))?;
    let prob_a = (b / total * dec!(100)).round_dp(PROBABILITY_DP);
    let prob_b = dec!(100) - prob_a;

    Ok(Prices {
        price_a,
        price_b,
        prob_a,
        prob_b,
    })
}

/// K / opposite² with the first division done on integers, so K itself never
/// has to fit in a `Decimal` (at 12+ token decimals it does not).
fn unit_price(invariant_k: u128, opposite: u128) -> CoreResult<Decimal> {
    let quotient = to_decimal(invariant_k / opposite)?;
    let remainder = to_decimal(invariant_k % opposite)?;
    let opposite = to_decimal(opposite)?;
    let price = remainder
        .checked_div(opposite)
        .and_then(|fraction| quotient.checked_add(fraction))
        .and_then(|per_unit| per_unit.checked_div(opposite))
        .ok_or_else(|| CoreError::Internal("price exceeds decimal range".to_string()))?;
    Ok(price.round_dp(PRICE_DP).max(MIN_PRICE))
}

fn to_decimal(value: u128) -> CoreResult<Decimal> {
    Decimal::from_u128(value)
        .ok_or_else(|| CoreError::Internal(format!("{} exceeds decimal range", value)))
}

/// Preview of a trade, computed without touching any market.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeQuote {
    pub side: Side,
    pub deposit: u128,
    pub shares: u128,
    pub new_pool_a: u128,
    pub new_pool_b: u128,
    pub prices_before: Prices,
    pub prices_after: Prices,
}

/// Quote a deposit, rejecting trades that would issue no shares.
pub fn quote_trade(pools: &PoolState, side: Side, deposit: u128) -> CoreResult<TradeQuote> {
    let shares = shares_for_deposit(
        deposit,
        pools.pool(side),
        pools.pool(side.opposite()),
        pools.invariant_k,
    )?;
    if shares == 0 {
        return Err(CoreError::InvalidAmount(
            "deposit too small for current pool sizes, no shares would be issued".to_string(),
        ));
    }

    let (new_pool_a, new_pool_b) = apply_trade(deposit, side, pools)?;
    let prices_before = pools.prices()?;
    let prices_after = current_prices(new_pool_a, new_pool_b, pools.invariant_k)?;

    Ok(TradeQuote {
        side,
        deposit,
        shares,
        new_pool_a,
        new_pool_b,
        prices_before,
        prices_after,
    })
}

// ============================================================================
// UNIT TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: u128 = 1_000_000;

    fn seeded_1000() -> PoolState {
        PoolState::seeded(1000 * UNIT).unwrap()
    }

    /// Deterministic pseudo-random stream for trade sequences.
    fn lcg(seed: &mut u64) -> u64 {
        *seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        *seed >> 33
    }

    /// newA * newB sits within one minor unit of K on the recomputed pool.
    fn assert_invariant(pools: &PoolState) {
        let (a, b, k) = (pools.pool_a, pools.pool_b, pools.invariant_k);
        assert!(a * b <= k, "product {} exceeds K {}", a * b, k);
        assert!(a * (b + 1) > k || b * (a + 1) > k, "pool drifted more than 1 unit");
    }

    #[test]
    fn test_seeded_pool_split() {
        let pools = seeded_1000();
        assert_eq!(pools.pool_a, 500 * UNIT);
        assert_eq!(pools.pool_b, 500 * UNIT);
        assert_eq!(pools.invariant_k, 500 * UNIT * 500 * UNIT);
        assert_eq!(pools.tvl(), 1000 * UNIT);
    }

    #[test]
    fn test_seed_too_small() {
        assert!(PoolState::seeded(1).is_err());
    }

    #[test]
    fn test_deposit_scenario_100_on_a() {
        let pools = seeded_1000();
        let shares =
            shares_for_deposit(100 * UNIT, pools.pool_a, pools.pool_b, pools.invariant_k).unwrap();
        // new pool B = K / 600 = 416.666666 (truncated), shares = 83.333334
        assert_eq!(shares, 83_333_334);

        let (a, b) = apply_trade(100 * UNIT, Side::OptionA, &pools).unwrap();
        assert_eq!(a, 600 * UNIT);
        assert_eq!(b, 416_666_666);
        assert_eq!(pools.pool_b - b, shares);

        let prices = current_prices(a, b, pools.invariant_k).unwrap();
        // 416.666666 / 1016.666666
        assert_eq!(prices.prob_a, dec!(40.98));
        assert_eq!(prices.prob_b, dec!(59.02));
        assert_eq!(prices.prob_a + prices.prob_b, dec!(100));
        assert!(prices.price_a > prices.price_b);
    }

    #[test]
    fn test_equal_pools_price_one_each() {
        let prices = seeded_1000().prices().unwrap();
        assert_eq!(prices.price_a, dec!(1));
        assert_eq!(prices.price_b, dec!(1));
        assert_eq!(prices.prob_a, dec!(50));
        assert_eq!(prices.prob_b, dec!(50));
    }

    #[test]
    fn test_price_floor() {
        // Tiny K relative to pools drives raw price to ~0
        let prices = current_prices(1_000 * UNIT, 1_000 * UNIT, 1).unwrap();
        assert_eq!(prices.price_a, MIN_PRICE);
        assert_eq!(prices.price_b, MIN_PRICE);
    }

    #[test]
    fn test_empty_pool_cannot_be_priced() {
        assert!(current_prices(0, 10, 0).is_err());
    }

    #[test]
    fn test_shares_strictly_increase_with_deposit() {
        let pools = seeded_1000();
        let mut last = 0;
        for deposit in [1 * UNIT, 2 * UNIT, 10 * UNIT, 50 * UNIT, 400 * UNIT, 5_000 * UNIT] {
            let shares =
                shares_for_deposit(deposit, pools.pool_a, pools.pool_b, pools.invariant_k).unwrap();
            assert!(shares > last, "shares {} not above {}", shares, last);
            assert!(shares < pools.pool_b);
            last = shares;
        }
    }

    #[test]
    fn test_zero_shares_at_degenerate_pools() {
        // Other pool already at its floor: nothing left to issue
        let shares = shares_for_deposit(1, 10, 0, 100).unwrap();
        assert_eq!(shares, 0);

        let pools = PoolState { pool_a: 1_000_000, pool_b: 1, invariant_k: 1_999_999 };
        assert!(quote_trade(&pools, Side::OptionA, 1).is_err());
    }

    #[test]
    fn test_invariant_preserved_across_random_trades() {
        let mut seed = 42u64;
        let mut pools = seeded_1000();
        let original_k = pools.invariant_k;

        for _ in 0..500 {
            let side = if lcg(&mut seed) % 2 == 0 { Side::OptionA } else { Side::OptionB };
            let deposit = (lcg(&mut seed) % (50 * UNIT as u64)) as u128 + 1;
            let quote = match quote_trade(&pools, side, deposit) {
                Ok(q) => q,
                Err(_) => continue,
            };
            pools.pool_a = quote.new_pool_a;
            pools.pool_b = quote.new_pool_b;

            assert_eq!(pools.invariant_k, original_k);
            assert_invariant(&pools);

            let prices = pools.prices().unwrap();
            assert_eq!(prices.prob_a + prices.prob_b, dec!(100));
        }
    }

    #[test]
    fn test_quote_matches_apply() {
        let pools = seeded_1000();
        let quote = quote_trade(&pools, Side::OptionB, 25 * UNIT).unwrap();
        let (a, b) = apply_trade(25 * UNIT, Side::OptionB, &pools).unwrap();
        assert_eq!((quote.new_pool_a, quote.new_pool_b), (a, b));
        assert_eq!(quote.shares, pools.pool_a - a);
        assert!(quote.prices_after.prob_b < quote.prices_before.prob_b);
        assert!(quote.prices_after.price_b > quote.prices_before.price_b);
    }

    #[test]
    fn test_prices_when_invariant_exceeds_decimal_range() {
        // 12-decimal token, seed 1000: K = 2.5e29, beyond Decimal::MAX
        let pools = PoolState::seeded(1_000 * 1_000_000_000_000).unwrap();
        assert!(Decimal::from_u128(pools.invariant_k).is_none());

        let prices = pools.prices().unwrap();
        assert_eq!(prices.price_a, dec!(1));
        assert_eq!(prices.prob_a, dec!(50));

        let quote = quote_trade(&pools, Side::OptionA, 100 * 1_000_000_000_000).unwrap();
        assert_eq!(quote.prices_after.prob_a, dec!(40.98));
    }

    #[test]
    fn test_seed_overflowing_invariant_rejected() {
        // 18-decimal token, seed 1000: 500e18 squared exceeds u128
        let seed = 1_000 * 10u128.pow(18);
        assert!(matches!(PoolState::seeded(seed), Err(CoreError::InvalidAmount(_))));
    }

    #[test]
    fn test_side_helpers() {
        assert_eq!(Side::OptionA.opposite(), Side::OptionB);
        assert!(Side::OptionA.is_option_a());
        assert!(!Side::OptionB.is_option_a());
        assert_eq!(Side::OptionB.to_string(), "B");
    }
}
