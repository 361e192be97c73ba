//! Per-protocol statistics.
//!
//! Every table has one row per protocol. Token columns cover every tracked
//! underlying and are rounded to 4 decimal places.

use anyhow::Result;
use derisk_api::{Prices, TokenSupplyProvider};
use derisk_chain::tokens::TOKENS;
use derisk_chain::ProtocolId;
use futures::future::try_join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{checked, checked_sum, StateError};
use crate::loan_entity::price_of;
use crate::loans_table::LoanRow;
use crate::state::LendingState;

const ROUNDING_DP: u32 = 4;

/// Entity counts and USD totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralStats {
    #[serde(rename = "Protocol")]
    pub protocol: String,
    #[serde(rename = "Number of active users")]
    pub number_of_active_users: usize,
    #[serde(rename = "Number of active loans")]
    pub number_of_active_loans: usize,
    #[serde(rename = "Number of active borrowers")]
    pub number_of_active_borrowers: usize,
    #[serde(rename = "Total debt (USD)")]
    pub total_debt_usd: Decimal,
    #[serde(rename = "Total risk adjusted collateral (USD)")]
    pub total_risk_adjusted_collateral_usd: Decimal,
    #[serde(rename = "Total Collateral (USD)")]
    pub total_collateral_usd: Decimal,
}

/// Token amounts keyed by `"<symbol> <suffix>"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenStats {
    #[serde(rename = "Protocol")]
    pub protocol: String,
    #[serde(flatten)]
    pub tokens: BTreeMap<String, Decimal>,
}

impl TokenStats {
    fn get(&self, symbol: &str, suffix: &str) -> Decimal {
        self.tokens
            .get(&column(symbol, suffix))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Supplied amounts plus their USD total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplyStats {
    #[serde(flatten)]
    pub supply: TokenStats,
    #[serde(rename = "Total supply (USD)")]
    pub total_supply_usd: Decimal,
}

/// Debt over debt plus supply, in total and per token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationStats {
    #[serde(rename = "Protocol")]
    pub protocol: String,
    #[serde(rename = "Total utilization")]
    pub total_utilization: Decimal,
    #[serde(flatten)]
    pub tokens: BTreeMap<String, Decimal>,
}

fn column(symbol: &str, suffix: &str) -> String {
    format!("{symbol} {suffix}")
}

/// `debt / (supply + debt)`, 0 when both are zero.
pub fn utilization(debt: Decimal, supply: Decimal) -> Decimal {
    let Some(total) = supply.checked_add(debt) else {
        // Both sides are huge: divide through by the larger one.
        let ratio = if supply >= debt {
            let share = debt / supply;
            share / (Decimal::ONE + share)
        } else {
            Decimal::ONE / (Decimal::ONE + supply / debt)
        };
        return ratio.round_dp(ROUNDING_DP);
    };
    if total.is_zero() {
        Decimal::ZERO
    } else {
        (debt / total).round_dp(ROUNDING_DP)
    }
}


/// Counts from the states, USD totals from their loans tables.
///
/// Hashstack loans belong to users, so active users and borrowers count
/// distinct owners there.
pub fn get_general_stats(
    states: &[&dyn LendingState],
    loans: &BTreeMap<ProtocolId, Vec<LoanRow>>,
) -> Result<Vec<GeneralStats>, StateError> {
    states
        .iter()
        .map(|state| {
            let protocol = state.protocol();
            let (users, borrowers) = match protocol {
                ProtocolId::HashstackV0 | ProtocolId::HashstackV1 => (
                    state.compute_number_of_active_users(),
                    state.compute_number_of_active_borrowers(),
                ),
                _ => (
                    state.compute_number_of_active_loan_entities(),
                    state.compute_number_of_active_loan_entities_with_debt(),
                ),
            };
            let rows = loans.get(&protocol).map(Vec::as_slice).unwrap_or_default();
            let total = |value: fn(&LoanRow) -> Decimal| -> Result<Decimal, StateError> {
                Ok(checked_sum(rows.iter().map(value), "USD total")?.round_dp(ROUNDING_DP))
            };
            Ok(GeneralStats {
                protocol: protocol.name().to_string(),
                number_of_active_users: users,
                number_of_active_loans: state.compute_number_of_active_loan_entities(),
                number_of_active_borrowers: borrowers,
                total_debt_usd: total(|row| row.debt_usd)?,
                total_risk_adjusted_collateral_usd: total(|row| row.risk_adjusted_collateral_usd)?,
                total_collateral_usd: total(|row| row.collateral_usd)?,
            })
        })
        .collect()
}

/// Supply of every tracked underlying held by each protocol.
///
/// Tokens with a positive supply must have a price.
pub async fn get_supply_stats(
    states: &[&dyn LendingState],
    supplies: &dyn TokenSupplyProvider,
    prices: &Prices,
) -> Result<Vec<SupplyStats>> {
    let mut stats = Vec::with_capacity(states.len());
    for state in states {
        let protocol = state.protocol();
        let amounts = try_join_all(
            TOKENS
                .iter()
                .map(|token| supplies.token_supply(protocol, token.symbol)),
        )
        .await?;

        let mut tokens = BTreeMap::new();
        let mut total_supply_usd = Decimal::ZERO;
        for (token, amount) in TOKENS.iter().zip(amounts) {
            let amount = amount.round_dp(ROUNDING_DP);
            if !amount.is_zero() {
                let usd = checked(amount.checked_mul(price_of(prices, token.address)?), "supply USD")?;
                total_supply_usd = checked(total_supply_usd.checked_add(usd), "supply USD")?;
            }
            tokens.insert(column(token.symbol, "supply"), amount);
        }
        stats.push(SupplyStats {
            supply: TokenStats {
                protocol: protocol.name().to_string(),
                tokens,
            },
            total_supply_usd: total_supply_usd.round_dp(ROUNDING_DP),
        });
    }
    Ok(stats)
}

#[derive(Clone, Copy)]
enum Side {
    Collateral,
    Debt,
}

/// Face amount of each underlying summed over every entity and token.
fn token_amounts(state: &dyn LendingState, side: Side) -> Result<TokenStats, StateError> {
    let parameters = state.token_parameters();
    let models = state.interest_rate_models();
    let entities = state.loan_entities();

    // (token id, underlying symbol, decimal factor, index)
    let tokens: Vec<(&str, &str, Decimal, Decimal)> = match side {
        Side::Collateral => parameters
            .collateral
            .iter()
            .map(|(token, p)| {
                (token.as_str(), p.underlying_symbol.as_str(), p.decimal_factor(), models.collateral.get(token))
            })
            .collect(),
        Side::Debt => parameters
            .debt
            .iter()
            .map(|(token, p)| (token.as_str(), p.underlying_symbol.as_str(), p.decimal_factor(), models.debt.get(token)))
            .collect(),
    };

    let mut amounts: BTreeMap<String, Decimal> = BTreeMap::new();
    let suffix = match side {
        Side::Collateral => "collateral",
        Side::Debt => "debt",
    };
    for underlying in TOKENS {
        let mut amount = Decimal::ZERO;
        for (token, symbol, decimal_factor, index) in &tokens {
            if *symbol != underlying.symbol {
                continue;
            }
            let raw = checked_sum(
                entities.iter().map(|entity| match side {
                    Side::Collateral => entity.collateral.get(token),
                    Side::Debt => entity.debt.get(token),
                }),
                "raw token total",
            )?;
            let face = raw
                .checked_div(*decimal_factor)
                .and_then(|face| face.checked_mul(*index));
            let face = checked(face, "token total")?.round_dp(ROUNDING_DP);
            amount = checked(amount.checked_add(face), "token total")?;
        }
        amounts.insert(column(underlying.symbol, suffix), amount);
    }

    Ok(TokenStats {
        protocol: state.protocol().name().to_string(),
        tokens: amounts,
    })
}

pub fn get_collateral_stats(states: &[&dyn LendingState]) -> Result<Vec<TokenStats>, StateError> {
    states
        .iter()
        .map(|state| token_amounts(*state, Side::Collateral))
        .collect()
}

pub fn get_debt_stats(states: &[&dyn LendingState]) -> Result<Vec<TokenStats>, StateError> {
    states
        .iter()
        .map(|state| token_amounts(*state, Side::Debt))
        .collect()
}

/// Rows are matched by protocol. Protocols missing a supply or debt row
/// count those amounts as zero.
pub fn get_utilization_stats(
    general: &[GeneralStats],
    supply: &[SupplyStats],
    debt: &[TokenStats],
) -> Vec<UtilizationStats> {
    general
        .iter()
        .map(|general| {
            let supply = supply.iter().find(|row| row.supply.protocol == general.protocol);
            let debt = debt.iter().find(|row| row.protocol == general.protocol);
            let total_supply_usd = supply.map_or(Decimal::ZERO, |row| row.total_supply_usd);

            let tokens = TOKENS
                .iter()
                .map(|token| {
                    let token_supply = supply.map_or(Decimal::ZERO, |row| row.supply.get(token.symbol, "supply"));
                    let token_debt = debt.map_or(Decimal::ZERO, |row| row.get(token.symbol, "debt"));
                    (column(token.symbol, "utilization"), utilization(token_debt, token_supply))
                })
                .collect();

            UtilizationStats {
                protocol: general.protocol.clone(),
                total_utilization: utilization(general.total_debt_usd, total_supply_usd),
                tokens,
            }
        })
        .collect()
}
