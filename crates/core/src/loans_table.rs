//! Flat per-entity rows for the loans table.

use derisk_api::Prices;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::loan_entity::{format_breakdown, EntityView};
use crate::state::LendingState;

/// One loan entity valued at current prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRow {
    #[serde(rename = "User")]
    pub user: String,
    #[serde(rename = "Protocol")]
    pub protocol: String,
    #[serde(rename = "Collateral (USD)")]
    pub collateral_usd: Decimal,
    #[serde(rename = "Risk-adjusted collateral (USD)")]
    pub risk_adjusted_collateral_usd: Decimal,
    #[serde(rename = "Debt (USD)")]
    pub debt_usd: Decimal,
    #[serde(rename = "Health factor")]
    pub health_factor: Decimal,
    #[serde(rename = "Standardized health factor")]
    pub standardized_health_factor: Decimal,
    #[serde(rename = "Collateral")]
    pub collateral: String,
    #[serde(rename = "Debt")]
    pub debt: String,
}

fn loan_row(state: &dyn LendingState, entity: &EntityView<'_>, prices: &Prices) -> Result<LoanRow, StateError> {
    let parameters = state.token_parameters();
    let models = state.interest_rate_models();
    Ok(LoanRow {
        user: entity.user.to_string(),
        protocol: state.protocol().name().to_string(),
        collateral_usd: state.compute_collateral_usd(entity, prices, false)?,
        risk_adjusted_collateral_usd: state.compute_collateral_usd(entity, prices, true)?,
        debt_usd: state.compute_debt_usd(entity, prices, false)?,
        health_factor: state.compute_health_factor(entity, prices, false)?,
        standardized_health_factor: state.compute_health_factor(entity, prices, true)?,
        collateral: format_breakdown(entity.collateral, &models.collateral, |token| {
            parameters
                .collateral
                .get(token)
                .map(|p| (p.symbol.clone(), p.decimal_factor()))
        }),
        debt: format_breakdown(entity.debt, &models.debt, |token| {
            parameters
                .debt
                .get(token)
                .map(|p| (p.symbol.clone(), p.decimal_factor()))
        }),
    })
}

/// One row per loan entity, in entity order.
///
/// Health factors follow each protocol's own definition.
pub fn get_loans_table_data(state: &dyn LendingState, prices: &Prices) -> Result<Vec<LoanRow>, StateError> {
    state
        .loan_entities()
        .iter()
        .map(|entity| loan_row(state, entity, prices))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan_entity::HashstackLoanEntity;
    use crate::portfolio::Portfolio;
    use crate::state::{HashstackV0State, StateSnapshot, ZkLendState};
    use crate::token_parameters::TokenParameters;
    use derisk_api::{TokenParameterRecord, TokenSide};
    use derisk_chain::tokens::{ETH, USDC};
    use derisk_chain::ProtocolId;
    use rust_decimal_macros::dec;

    fn prices() -> Prices {
        Prices::from([
            (ETH.address.to_string(), dec!(2000)),
            (USDC.address.to_string(), dec!(1)),
        ])
    }

    #[test]
    fn test_hashstack_rows_use_loan_owner() {
        let loan = HashstackLoanEntity {
            user: "0xa11ce".to_string(),
            debt_category: Some(1),
            original_collateral: Portfolio::single("ETH", dec!(1000000000000000000)),
            collateral: Portfolio::single("ETH", dec!(1000000000000000000)),
            debt: Portfolio::single("USDC", dec!(1000000000)),
            ..HashstackLoanEntity::default()
        };
        let mut state = HashstackV0State::new(TokenParameters::for_protocol(ProtocolId::HashstackV0));
        state
            .restore(StateSnapshot {
                protocol: ProtocolId::HashstackV0,
                last_block_number: 5,
                loan_entities: vec![loan.to_record("7")],
                interest_rate_models: Default::default(),
            })
            .unwrap();

        let rows = get_loans_table_data(&state, &prices()).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.user, "0xa11ce");
        assert_eq!(row.protocol, "Hashstack V0");
        assert_eq!(row.collateral_usd, dec!(2000));
        assert_eq!(row.risk_adjusted_collateral_usd, dec!(2000));
        assert_eq!(row.debt_usd, dec!(1000));
        assert_eq!(row.health_factor, dec!(2));
        assert_eq!(row.standardized_health_factor, dec!(2) / dec!(1.06));
        assert_eq!(row.collateral, "ETH: 1");
        assert_eq!(row.debt, "USDC: 1000");
    }

    #[test]
    fn test_zklend_row_without_debt() {
        let mut parameters = TokenParameters::new(ProtocolId::ZkLend);
        parameters.apply_records(&[TokenParameterRecord {
            side: TokenSide::Collateral,
            address: ETH.address.to_string(),
            decimals: 18,
            symbol: "zETH".to_string(),
            underlying_symbol: "ETH".to_string(),
            underlying_address: ETH.address.to_string(),
            collateral_factor: Some(dec!(0.8)),
            debt_factor: None,
            liquidation_bonus: Some(dec!(0.1)),
            is_interest_bearing: None,
            protocol_fee: None,
            liquidator_fee_beta: None,
            liquidator_fee_max: None,
        }]);
        let mut state = ZkLendState::new(parameters);
        let mut record = crate::loan_entity::ZkLendLoanEntity {
            user: "0xb0b".to_string(),
            ..Default::default()
        };
        record.deposit.set_value(ETH.address, dec!(2000000000000000000));
        record.collateral.set_value(ETH.address, dec!(2000000000000000000));
        record.collateral_enabled.insert(ETH.address.to_string(), true);
        state
            .restore(StateSnapshot {
                protocol: ProtocolId::ZkLend,
                last_block_number: 1,
                loan_entities: vec![record.to_record("0xb0b")],
                interest_rate_models: Default::default(),
            })
            .unwrap();

        let rows = get_loans_table_data(&state, &prices()).unwrap();
        let row = &rows[0];
        assert_eq!(row.user, "0xb0b");
        assert_eq!(row.collateral_usd, dec!(4000));
        assert_eq!(row.risk_adjusted_collateral_usd, dec!(3200));
        assert_eq!(row.debt_usd, Decimal::ZERO);
        assert_eq!(row.health_factor, Decimal::MAX);
        assert_eq!(row.collateral, "zETH: 2");
        assert_eq!(row.debt, "");

        let json = serde_json::to_value(row).unwrap();
        assert!(json.get("Risk-adjusted collateral (USD)").is_some());
    }

    #[test]
    fn test_missing_price_fails() {
        let loan = HashstackLoanEntity {
            user: "0xa11ce".to_string(),
            original_collateral: Portfolio::single("ETH", dec!(1000000000000000000)),
            ..HashstackLoanEntity::default()
        };
        let mut state = HashstackV0State::new(TokenParameters::for_protocol(ProtocolId::HashstackV0));
        state
            .restore(StateSnapshot {
                protocol: ProtocolId::HashstackV0,
                last_block_number: 5,
                loan_entities: vec![loan.to_record("1")],
                interest_rate_models: Default::default(),
            })
            .unwrap();
        assert!(matches!(
            get_loans_table_data(&state, &Prices::new()),
            Err(StateError::MissingPrice { .. })
        ));
    }
}
