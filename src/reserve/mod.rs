use std::str::FromStr;

use alloy::primitives::U256;
use bigdecimal::BigDecimal;
use sqlx::PgPool;

use crate::db::repository;

/// Seconds in the interest-accrual year.
pub const SECONDS_PER_YEAR: u64 = 365 * 24 * 60 * 60;

/// One ray: the 27-decimal fixed-point unit the lending pool's indices use.
pub fn ray() -> U256 {
    U256::from(10u64).pow(U256::from(27u64))
}

/// Initial liquidity rate mirrored from the pool contract: 1265 * 10^21,
/// i.e. 0.1265% in ray terms.
pub fn initial_liquidity_rate() -> U256 {
    U256::from(1265u64) * U256::from(10u64).pow(U256::from(21u64))
}

/// Ray-scaled multiplication with half-up rounding.
pub fn ray_mul(a: U256, b: U256) -> U256 {
    (a * b + ray() / U256::from(2u64)) / ray()
}

/// Ray-scaled division with half-up rounding.
pub fn ray_div(a: U256, b: U256) -> U256 {
    (a * ray() + b / U256::from(2u64)) / b
}

/// Linearly accumulated interest over `elapsed_secs` at `rate` (ray),
/// expressed as a ray-scaled multiplier `1 + rate * t / year`.
pub fn linear_interest(rate: U256, elapsed_secs: u64) -> U256 {
    ray() + rate * U256::from(elapsed_secs) / U256::from(SECONDS_PER_YEAR)
}

/// Mirror of the external lending pool's reserve accounting.
///
/// Invariant: `liquidity_index` and `last_update_timestamp` never decrease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReserveState {
    pub liquidity_index: U256,
    pub current_liquidity_rate: U256,
    pub last_update_timestamp: u64,
}

impl ReserveState {
    pub fn init(now: u64) -> Self {
        Self {
            liquidity_index: ray(),
            current_liquidity_rate: initial_liquidity_rate(),
            last_update_timestamp: now,
        }
    }

    /// The index a depositor's scaled balance would be multiplied by right
    /// now: the stored index compounded linearly since the last update.
    pub fn normalized_income(&self, now: u64) -> U256 {
        if now <= self.last_update_timestamp {
            return self.liquidity_index;
        }
        let elapsed = now - self.last_update_timestamp;
        ray_mul(
            linear_interest(self.current_liquidity_rate, elapsed),
            self.liquidity_index,
        )
    }

    /// Fold accrued interest into the stored index. A stale `now` is a
    /// no-op, keeping both fields monotonic under redelivered updates.
    pub fn accrue(&mut self, now: u64) {
        if now <= self.last_update_timestamp {
            return;
        }
        self.liquidity_index = self.normalized_income(now);
        self.last_update_timestamp = now;
    }
}

fn u256_to_decimal(value: U256) -> eyre::Result<BigDecimal> {
    BigDecimal::from_str(&value.to_string()).map_err(|e| eyre::eyre!("decimal conversion: {}", e))
}

fn decimal_to_u256(value: &BigDecimal) -> eyre::Result<U256> {
    U256::from_str(&value.with_scale(0).to_string())
        .map_err(|e| eyre::eyre!("u256 conversion: {}", e))
}

/// Load the persisted snapshot, seeding the initial state on first run.
pub async fn load_or_seed(pool: &PgPool, now: u64) -> eyre::Result<ReserveState> {
    if let Some((index, rate, ts)) = repository::get_reserve_state(pool).await? {
        return Ok(ReserveState {
            liquidity_index: decimal_to_u256(&index)?,
            current_liquidity_rate: decimal_to_u256(&rate)?,
            last_update_timestamp: ts as u64,
        });
    }

    let state = ReserveState::init(now);
    persist(pool, &state).await?;
    tracing::info!("Reserve state seeded");
    Ok(state)
}

/// Persist a snapshot. The store's GREATEST-based upsert enforces the
/// monotonic invariant even if two replicas race.
pub async fn persist(pool: &PgPool, state: &ReserveState) -> eyre::Result<()> {
    repository::upsert_reserve_state(
        pool,
        &u256_to_decimal(state.liquidity_index)?,
        &u256_to_decimal(state.current_liquidity_rate)?,
        state.last_update_timestamp as i64,
    )
    .await
}
