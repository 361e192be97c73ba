//! Main chart: liquidable debt over a collateral price grid.
//!
//! For one collateral/debt pair, the collateral price is swept from a small
//! step up to a multiple of its current price. At each grid point every other
//! price is held at its current value, the state reports how much debt would
//! be liquidable, and AMMs report how much of the debt token they could supply.

use anyhow::Result;
use derisk_api::{AmmSupplyProvider, Prices};
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::SweepConfig;
use crate::error::checked_sum;
use crate::loan_entity::price_of;
use crate::state::LendingState;

/// One grid point of the main chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainChartRow {
    pub collateral_token_price: Decimal,
    /// USD debt liquidable at or below this price
    pub liquidable_debt: Decimal,
    /// Debt that became liquidable since the previous grid point
    pub liquidable_debt_at_interval: Decimal,
    /// `<amm>_debt_token_supply` columns
    #[serde(flatten)]
    pub amm_debt_token_supply: BTreeMap<String, Decimal>,
    pub debt_token_supply: Decimal,
}

/// Main chart of one pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MainChart {
    pub collateral_token_underlying_address: String,
    pub debt_token_underlying_address: String,
    pub rows: Vec<MainChartRow>,
}

impl MainChart {
    /// `<collateral underlying>-<debt underlying>.json`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.json",
            self.collateral_token_underlying_address, self.debt_token_underlying_address
        )
    }
}

/// Column name of an AMM's supply.
pub fn amm_supply_column(amm: &str) -> String {
    format!("{amm}_debt_token_supply")
}

/// 1, 2, 2.5, 5 or 10 times the power of ten closest to `raw`.
fn nice_step(raw: Decimal) -> Decimal {
    if raw <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let ten = dec!(10);
    let mut magnitude = Decimal::ONE;
    while magnitude > raw && !magnitude.is_zero() {
        magnitude /= ten;
    }
    while magnitude * ten <= raw {
        magnitude *= ten;
    }
    [dec!(1), dec!(2), dec!(2.5), dec!(5), dec!(10)]
        .into_iter()
        .map(|multiple| multiple * magnitude)
        .min_by_key(|candidate| (*candidate - raw).abs())
        .unwrap_or(magnitude)
}

/// Grid prices from one step up to `current_price * upper_bound_multiplier`,
/// upper bound excluded.
///
/// The step is the configured fixed step for the collateral, otherwise a nice
/// step yielding roughly `target_points` points.
pub fn collateral_price_grid(collateral_symbol: &str, current_price: Decimal, sweep: &SweepConfig) -> Vec<Decimal> {
    let upper = current_price * sweep.upper_bound_multiplier;
    let step = match sweep.fixed_steps.get(collateral_symbol) {
        Some(step) => *step,
        None => nice_step(upper / Decimal::from(sweep.target_points.max(1))),
    };
    if step <= Decimal::ZERO {
        return Vec::new();
    }

    let mut grid = Vec::new();
    let mut multiple = Decimal::ONE;
    while step * multiple < upper {
        grid.push(step * multiple);
        multiple += Decimal::ONE;
    }
    grid
}

/// Debt supply per configured AMM at one price. A failed lookup counts as
/// zero for that AMM only.
async fn amm_supplies(
    amm: &dyn AmmSupplyProvider,
    amms: &[String],
    collateral_symbol: &str,
    price: Decimal,
    debt_symbol: &str,
) -> BTreeMap<String, Decimal> {
    let lookups = amms
        .iter()
        .map(|name| amm.debt_token_supply(collateral_symbol, price, debt_symbol, Some(name)));
    let supplies = join_all(lookups).await;
    amms.iter()
        .zip(supplies)
        .map(|(name, supply)| {
            let supply = supply.unwrap_or_else(|e| {
                warn!(
                    provider = amm.provider_id(),
                    amm = %name,
                    collateral = collateral_symbol,
                    debt = debt_symbol,
                    %price,
                    error = %e,
                    "No AMM supply"
                );
                Decimal::ZERO
            });
            (amm_supply_column(name), supply)
        })
        .collect()
}

/// Build the main chart of a collateral/debt pair given by underlying symbols.
///
/// Returns `None` if the state knows no token with either underlying.
pub async fn get_main_chart_data(
    state: &dyn LendingState,
    prices: &Prices,
    amm: &dyn AmmSupplyProvider,
    collateral_symbol: &str,
    debt_symbol: &str,
    sweep: &SweepConfig,
) -> Result<Option<MainChart>> {
    let parameters = state.token_parameters();
    let Some(collateral_underlying) = parameters.underlying_address(collateral_symbol) else {
        debug!(protocol = %state.protocol(), collateral = collateral_symbol, "No collateral token, skipping pair");
        return Ok(None);
    };
    let Some(debt_underlying) = parameters.underlying_address(debt_symbol) else {
        debug!(protocol = %state.protocol(), debt = debt_symbol, "No debt token, skipping pair");
        return Ok(None);
    };

    let current_price = price_of(prices, collateral_underlying)?;
    let grid = collateral_price_grid(collateral_symbol, current_price, sweep);

    let mut liquidable = Vec::with_capacity(grid.len());
    for price in &grid {
        let debt = state.compute_liquidable_debt_at_price(
            prices,
            collateral_underlying,
            *price,
            debt_underlying,
        )?;
        liquidable.push((*price, debt));
    }

    // The first point has no previous one to diff against.
    let mut rows = Vec::with_capacity(grid.len().saturating_sub(1));
    for window in liquidable.windows(2) {
        let (_, previous) = window[0];
        let (price, debt) = window[1];
        let amm_debt_token_supply =
            amm_supplies(amm, &sweep.amms, collateral_symbol, price, debt_symbol).await;
        let debt_token_supply =
            checked_sum(amm_debt_token_supply.values().copied(), "AMM debt token supply")?;
        rows.push(MainChartRow {
            collateral_token_price: price,
            liquidable_debt: debt,
            liquidable_debt_at_interval: (debt - previous).abs(),
            amm_debt_token_supply,
            debt_token_supply,
        });
    }

    debug!(
        protocol = %state.protocol(),
        collateral = collateral_symbol,
        debt = debt_symbol,
        %current_price,
        rows = rows.len(),
        "Built main chart"
    );
    Ok(Some(MainChart {
        collateral_token_underlying_address: collateral_underlying.to_string(),
        debt_token_underlying_address: debt_underlying.to_string(),
        rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan_entity::HashstackLoanEntity;
    use crate::portfolio::Portfolio;
    use crate::state::{HashstackV1State, StateSnapshot};
    use crate::token_parameters::TokenParameters;
    use derisk_api::{AmmPoolRecord, ConstantProductAmm};
    use derisk_chain::tokens::{ETH, USDC};
    use derisk_chain::ProtocolId;

    fn sweep() -> SweepConfig {
        SweepConfig::default()
    }

    /// One loan: 1 ETH collateral against 250 USDC debt.
    fn state() -> HashstackV1State {
        let loan = HashstackLoanEntity {
            user: "0x1".to_string(),
            original_collateral: Portfolio::single("ETH", dec!(1000000000000000000)),
            collateral: Portfolio::single("ETH", dec!(1000000000000000000)),
            debt: Portfolio::single("USDC", dec!(250000000)),
            ..HashstackLoanEntity::default()
        };
        let mut state = HashstackV1State::new(TokenParameters::for_protocol(ProtocolId::HashstackV1));
        state
            .restore(StateSnapshot {
                protocol: ProtocolId::HashstackV1,
                last_block_number: 1,
                loan_entities: vec![loan.to_record("1")],
                interest_rate_models: Default::default(),
            })
            .unwrap();
        state
    }

    fn prices(eth_price: Decimal) -> Prices {
        Prices::from([
            (ETH.address.to_string(), eth_price),
            (USDC.address.to_string(), dec!(1)),
        ])
    }

    fn amm() -> ConstantProductAmm {
        ConstantProductAmm::new()
            .with_pool(
                "JediSwap",
                &AmmPoolRecord {
                    token_a: "ETH".to_string(),
                    token_b: "USDC".to_string(),
                    balance_a: dec!(100000000000000000000),
                    balance_b: dec!(200000000000),
                },
            )
            .unwrap()
    }

    #[test]
    fn test_nice_step() {
        assert_eq!(nice_step(dec!(2.4)), dec!(2.5));
        assert_eq!(nice_step(dec!(0.024)), dec!(0.025));
        assert_eq!(nice_step(dec!(38)), dec!(50));
        assert_eq!(nice_step(dec!(700)), dec!(500));
        assert_eq!(nice_step(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_fixed_step_grid() {
        let grid = collateral_price_grid("ETH", dec!(420), &sweep());
        assert_eq!(grid, vec![dec!(100), dec!(200), dec!(300), dec!(400), dec!(500)]);
    }

    #[test]
    fn test_grid_excludes_upper_bound() {
        // 1.2 * 500 = 600 is not part of the grid.
        let grid = collateral_price_grid("ETH", dec!(500), &sweep());
        assert_eq!(grid.last(), Some(&dec!(500)));
    }

    #[test]
    fn test_computed_step_grid() {
        let grid = collateral_price_grid("USDC", dec!(1), &sweep());
        assert_eq!(grid.first(), Some(&dec!(0.025)));
        assert_eq!(grid.len(), 47);
        assert!(grid.iter().all(|price| *price < dec!(1.2)));
    }

    #[tokio::test]
    async fn test_single_liquidation_boundary() {
        let state = state();
        let chart = get_main_chart_data(&state, &prices(dec!(420)), &amm(), "ETH", "USDC", &sweep())
            .await
            .unwrap()
            .unwrap();

        // hf = price / 250 falls below 1.04 under 260, so 100 and 200 are
        // liquidable and the row for 100 is dropped.
        let prices: Vec<_> = chart.rows.iter().map(|row| row.collateral_token_price).collect();
        assert_eq!(prices, vec![dec!(200), dec!(300), dec!(400), dec!(500)]);
        let liquidable: Vec<_> = chart.rows.iter().map(|row| row.liquidable_debt).collect();
        assert_eq!(liquidable, vec![dec!(250), dec!(0), dec!(0), dec!(0)]);
        let at_interval: Vec<_> = chart
            .rows
            .iter()
            .map(|row| row.liquidable_debt_at_interval)
            .collect();
        assert_eq!(at_interval, vec![dec!(0), dec!(250), dec!(0), dec!(0)]);
        assert_eq!(chart.file_name(), format!("{}-{}.json", ETH.address, USDC.address));
    }

    #[tokio::test]
    async fn test_liquidable_debt_non_increasing_in_price() {
        let state = state();
        let chart = get_main_chart_data(&state, &prices(dec!(2000)), &amm(), "ETH", "USDC", &sweep())
            .await
            .unwrap()
            .unwrap();
        assert!(chart.rows.len() > 10);
        assert!(chart
            .rows
            .windows(2)
            .all(|pair| pair[1].liquidable_debt <= pair[0].liquidable_debt));
        assert!(chart
            .rows
            .iter()
            .all(|row| row.liquidable_debt_at_interval >= Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_amm_supply_columns() {
        let state = state();
        let chart = get_main_chart_data(&state, &prices(dec!(420)), &amm(), "ETH", "USDC", &sweep())
            .await
            .unwrap()
            .unwrap();
        let row = &chart.rows[0];
        assert_eq!(row.amm_debt_token_supply.len(), 4);
        assert!(row.amm_debt_token_supply[&amm_supply_column("JediSwap")] > Decimal::ZERO);
        assert_eq!(row.amm_debt_token_supply[&amm_supply_column("MySwap")], Decimal::ZERO);
        assert_eq!(row.debt_token_supply, row.amm_debt_token_supply[&amm_supply_column("JediSwap")]);

        let json = serde_json::to_value(row).unwrap();
        assert!(json.get("JediSwap_debt_token_supply").is_some());
    }

    #[tokio::test]
    async fn test_missing_pool_gives_zero_supply() {
        let state = state();
        let chart = get_main_chart_data(
            &state,
            &prices(dec!(420)),
            &ConstantProductAmm::new(),
            "ETH",
            "USDC",
            &sweep(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!(chart.rows.iter().all(|row| row.debt_token_supply.is_zero()));
    }

    /// Pools of `amm()`, except that one AMM always fails.
    #[derive(Debug)]
    struct FailingAmm {
        inner: ConstantProductAmm,
        failing: &'static str,
    }

    #[async_trait::async_trait]
    impl AmmSupplyProvider for FailingAmm {
        fn provider_id(&self) -> &str {
            "failing"
        }

        async fn debt_token_supply(
            &self,
            collateral_symbol: &str,
            collateral_price: Decimal,
            debt_symbol: &str,
            amm: Option<&str>,
        ) -> anyhow::Result<Decimal> {
            if amm == Some(self.failing) {
                anyhow::bail!("{} is unreachable", self.failing);
            }
            self.inner
                .debt_token_supply(collateral_symbol, collateral_price, debt_symbol, amm)
                .await
        }
    }

    #[tokio::test]
    async fn test_failed_amm_zeroes_only_its_column() {
        let state = state();
        let pools = amm()
            .with_pool(
                "MySwap",
                &AmmPoolRecord {
                    token_a: "ETH".to_string(),
                    token_b: "USDC".to_string(),
                    balance_a: dec!(50000000000000000000),
                    balance_b: dec!(100000000000),
                },
            )
            .unwrap();
        let failing = FailingAmm {
            inner: pools,
            failing: "MySwap",
        };
        let chart = get_main_chart_data(&state, &prices(dec!(420)), &failing, "ETH", "USDC", &sweep())
            .await
            .unwrap()
            .unwrap();
        let row = &chart.rows[0];
        let jediswap = row.amm_debt_token_supply[&amm_supply_column("JediSwap")];
        assert!(jediswap > Decimal::ZERO);
        assert_eq!(row.amm_debt_token_supply[&amm_supply_column("MySwap")], Decimal::ZERO);
        assert_eq!(row.debt_token_supply, jediswap);
    }

    #[tokio::test]
    async fn test_unknown_underlying_is_skipped() {
        let state = state();
        let chart = get_main_chart_data(&state, &prices(dec!(420)), &amm(), "ETH", "DOGE", &sweep())
            .await
            .unwrap();
        assert!(chart.is_none());
    }

    #[tokio::test]
    async fn test_missing_collateral_price_errors() {
        let state = state();
        let prices = Prices::from([(USDC.address.to_string(), dec!(1))]);
        assert!(get_main_chart_data(&state, &prices, &amm(), "ETH", "USDC", &sweep())
            .await
            .is_err());
    }
}
