//! AMM liquidity available to absorb liquidated collateral.
//!
//! Pools are modelled as constant-product (`x * y = k`) pools. The supply of
//! the debt token obtainable at a collateral price `p` is
//! `sqrt(p * k) * (1 - sqrt(0.95))`, i.e. what a 5% price impact would buy.

use anyhow::{Context, Result};
use async_trait::async_trait;
use derisk_chain::TOKEN_SETTINGS;
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::path::Path;
use tracing::{debug, warn};

use crate::read_json;

/// AMMs reported in the main chart.
pub const AMMS: &[&str] = &["10kSwap", "MySwap", "SithSwap", "JediSwap"];

/// Trait for AMM supply providers.
#[async_trait]
pub trait AmmSupplyProvider: Send + Sync + Debug {
    /// Provider identifier used in logs.
    fn provider_id(&self) -> &str;

    /// Debt-token supply available at `collateral_price` on `amm`, or summed
    /// over every AMM when `amm` is `None`.
    async fn debt_token_supply(
        &self,
        collateral_symbol: &str,
        collateral_price: Decimal,
        debt_symbol: &str,
        amm: Option<&str>,
    ) -> Result<Decimal>;
}

/// One pool balance as stored on disk, raw token units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmmPoolRecord {
    pub token_a: String,
    pub token_b: String,
    pub balance_a: Decimal,
    pub balance_b: Decimal,
}

/// Converted balances of one pair across AMMs.
#[derive(Debug, Clone, Default)]
struct Pool {
    /// AMM -> (balance of first token, balance of second token)
    balances: BTreeMap<String, (Decimal, Decimal)>,
}

impl Pool {
    fn supply_at_price(&self, price: Decimal, amm: Option<&str>) -> Decimal {
        let constant = match amm {
            None => {
                let (a, b) = self
                    .balances
                    .values()
                    .fold((Decimal::ZERO, Decimal::ZERO), |(a, b), (x, y)| (a + x, b + y));
                a * b
            }
            Some(amm) => match self.balances.get(amm) {
                Some((a, b)) => a * b,
                None => return Decimal::ZERO,
            },
        };
        let slippage = Decimal::ONE - Decimal::new(95, 2).sqrt().unwrap_or(Decimal::ONE);
        (price * constant).sqrt().unwrap_or(Decimal::ZERO) * slippage
    }
}

/// Both DAI deployments share the DAI pools.
fn pool_symbol(symbol: &str) -> &str {
    if symbol == "DAI V2" {
        "DAI"
    } else {
        symbol
    }
}

/// Sorted `A/B` pool id.
pub(crate) fn pool_id(symbol_a: &str, symbol_b: &str) -> String {
    let a = pool_symbol(symbol_a);
    let b = pool_symbol(symbol_b);
    if a <= b {
        format!("{a}/{b}")
    } else {
        format!("{b}/{a}")
    }
}

/// Constant-product supply model over pool balances.
#[derive(Debug, Clone, Default)]
pub struct ConstantProductAmm {
    pools: HashMap<String, Pool>,
}

impl ConstantProductAmm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pool balance in raw units of the underlying tokens.
    pub fn with_pool(mut self, amm: &str, record: &AmmPoolRecord) -> Result<Self> {
        self.add_pool(amm, record)?;
        Ok(self)
    }

    fn add_pool(&mut self, amm: &str, record: &AmmPoolRecord) -> Result<()> {
        let token_a = TOKEN_SETTINGS
            .get_by_symbol(&record.token_a)
            .with_context(|| format!("Unknown pool token {}", record.token_a))?;
        let token_b = TOKEN_SETTINGS
            .get_by_symbol(&record.token_b)
            .with_context(|| format!("Unknown pool token {}", record.token_b))?;
        let converted_a = record.balance_a / token_a.decimal_factor();
        let converted_b = record.balance_b / token_b.decimal_factor();

        // Balances are kept in pool-id order.
        let balances = if pool_symbol(token_a.symbol) <= pool_symbol(token_b.symbol) {
            (converted_a, converted_b)
        } else {
            (converted_b, converted_a)
        };

        let pool = self
            .pools
            .entry(pool_id(token_a.symbol, token_b.symbol))
            .or_default();
        let entry = pool
            .balances
            .entry(amm.to_string())
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 += balances.0;
        entry.1 += balances.1;
        Ok(())
    }

    /// Load `{ "<amm>": [AmmPoolRecord, ...] }`. A missing file yields no pools.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let mut amm = Self::new();
        let Some(records) = read_json::<HashMap<String, Vec<AmmPoolRecord>>>(path).await? else {
            return Ok(amm);
        };
        for (name, pools) in &records {
            for record in pools {
                if let Err(e) = amm.add_pool(name, record) {
                    warn!(amm = %name, error = %e, "Skipping pool");
                }
            }
        }
        debug!(path = %path.display(), pools = amm.pools.len(), "Loaded AMM pools");
        Ok(amm)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }
}

#[async_trait]
impl AmmSupplyProvider for ConstantProductAmm {
    fn provider_id(&self) -> &str {
        "constant_product"
    }

    async fn debt_token_supply(
        &self,
        collateral_symbol: &str,
        collateral_price: Decimal,
        debt_symbol: &str,
        amm: Option<&str>,
    ) -> Result<Decimal> {
        let id = pool_id(collateral_symbol, debt_symbol);
        let pool = self
            .pools
            .get(&id)
            .with_context(|| format!("Trying to get pool that is not set: {id}"))?;
        Ok(pool.supply_at_price(collateral_price, amm))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    /// Pool record from whole-token balances.
    fn record(token_a: &str, token_b: &str, balance_a: u64, balance_b: u64) -> AmmPoolRecord {
        let raw = |symbol: &str, amount: u64| {
            Decimal::from(amount) * TOKEN_SETTINGS.get_by_symbol(symbol).unwrap().decimal_factor()
        };
        AmmPoolRecord {
            token_a: token_a.to_string(),
            token_b: token_b.to_string(),
            balance_a: raw(token_a, balance_a),
            balance_b: raw(token_b, balance_b),
        }
    }

    #[test]
    fn test_pool_id() {
        assert_eq!(pool_id("USDC", "ETH"), "ETH/USDC");
        assert_eq!(pool_id("ETH", "DAI V2"), "DAI/ETH");
    }

    #[tokio::test]
    async fn test_supply_at_price() {
        // 100 ETH and 100 USDC: k = 10_000, sqrt(1 * k) = 100.
        let amm = ConstantProductAmm::new()
            .with_pool(
                "JediSwap",
                &record("ETH", "USDC", 100, 100),
            )
            .unwrap();

        let supply = amm
            .debt_token_supply("ETH", dec!(1), "USDC", Some("JediSwap"))
            .await
            .unwrap();
        let expected = dec!(100) * (Decimal::ONE - dec!(0.95).sqrt().unwrap());
        assert!((supply - expected).abs() < dec!(0.000001));

        let missing_amm = amm
            .debt_token_supply("ETH", dec!(1), "USDC", Some("MySwap"))
            .await
            .unwrap();
        assert_eq!(missing_amm, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_total_supply_sums_balances() {
        let amm = ConstantProductAmm::new()
            .with_pool("JediSwap", &record("USDC", "ETH", 50, 50))
            .unwrap()
            .with_pool("MySwap", &record("ETH", "USDC", 50, 50))
            .unwrap();

        let total = amm.debt_token_supply("ETH", dec!(4), "USDC", None).await.unwrap();
        let single = amm
            .debt_token_supply("ETH", dec!(4), "USDC", Some("MySwap"))
            .await
            .unwrap();
        // Doubling both balances quadruples k.
        assert!((total - single * dec!(2)).abs() < dec!(0.000001));
        assert!(total > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_dai_v2_uses_dai_pool() {
        let amm = ConstantProductAmm::new()
            .with_pool("JediSwap", &record("ETH", "DAI", 1, 1))
            .unwrap();
        let supply = amm
            .debt_token_supply("ETH", dec!(1), "DAI V2", Some("JediSwap"))
            .await
            .unwrap();
        assert!(supply > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_pool_errors() {
        let amm = ConstantProductAmm::new();
        assert!(amm.debt_token_supply("ETH", dec!(1), "USDC", None).await.is_err());
    }
}
