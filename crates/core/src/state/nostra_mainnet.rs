//! Nostra Mainnet state.
//!
//! Folds like Alpha (minus transfers) but liquidates with a flat bonus:
//! the debt repaid is whatever brings the risk-adjusted health factor back to
//! the target.

use derisk_api::Prices;
use derisk_chain::{ProtocolId, RawEvent};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use super::nostra::{NostraLedger, NostraLiquidationInput, NOSTRA_MAINNET_TABLES};
use super::{LendingState, StateSnapshot};
use crate::error::{checked, StateError};
use crate::interest_rate::InterestRateModels;
use crate::loan_entity::{face_value_usd, price_of, EntityView, NostraLoanEntity};
use crate::token_parameters::TokenParameters;

const TARGET_HEALTH_FACTOR: Decimal = dec!(1.25);
const LIQUIDATION_BONUS: Decimal = dec!(0.2);

/// Debt (USD) to repay to reach the target health factor:
/// `(rac - rad * 1.25) / (cf * 1.2 - 1.25 / debt_factor)`, capped at
/// `debt_usd_cap` and floored at zero.
pub fn nostra_mainnet_debt_to_be_liquidated(
    risk_adjusted_collateral_usd: Decimal,
    risk_adjusted_debt_usd: Decimal,
    collateral_factor: Decimal,
    debt_factor: Decimal,
    debt_usd_cap: Decimal,
) -> Result<Decimal, StateError> {
    let numerator = risk_adjusted_debt_usd
        .checked_mul(TARGET_HEALTH_FACTOR)
        .and_then(|target| risk_adjusted_collateral_usd.checked_sub(target));
    let numerator = checked(numerator, "Nostra liquidation numerator")?;
    let denominator = TARGET_HEALTH_FACTOR
        .checked_div(debt_factor)
        .and_then(|target| (collateral_factor * (Decimal::ONE + LIQUIDATION_BONUS)).checked_sub(target));
    let denominator = checked(denominator, "Nostra liquidation denominator")?;
    if denominator.is_zero() {
        return Ok(debt_usd_cap);
    }
    Ok(checked(numerator.checked_div(denominator), "Nostra liquidable debt")?
        .min(debt_usd_cap)
        .max(Decimal::ZERO))
}

#[derive(Debug, Clone)]
pub struct NostraMainnetState {
    ledger: NostraLedger,
}

impl NostraMainnetState {
    pub fn new(token_parameters: TokenParameters) -> Self {
        Self {
            ledger: NostraLedger::new(NOSTRA_MAINNET_TABLES, token_parameters),
        }
    }

    pub fn with_verbose_user(mut self, verbose_user: Option<String>) -> Self {
        self.ledger.verbose_user = verbose_user;
        self
    }

    pub fn loan_entity(&self, user: &str) -> Option<&NostraLoanEntity> {
        self.ledger.loan_entities.get(user)
    }

    fn debt_to_be_liquidated(
        &self,
        input: &NostraLiquidationInput<'_>,
        prices: &Prices,
        collateral_underlying: &str,
        debt_underlying: &str,
    ) -> Result<Decimal, StateError> {
        let parameters = &self.ledger.token_parameters;
        let collateral_token = NostraLedger::pick_token(
            &input.entity.collateral,
            parameters.collateral_tokens_with_underlying(collateral_underlying),
        );
        let debt_token = NostraLedger::pick_token(
            &input.entity.debt,
            parameters.debt_tokens_with_underlying(debt_underlying),
        );
        let (Some(collateral_token), Some(debt_token)) = (collateral_token, debt_token) else {
            return Ok(Decimal::ZERO);
        };
        let collateral_parameters = parameters.collateral(collateral_token)?;
        let debt_parameters = parameters.debt(debt_token)?;

        let debt_usd_cap = face_value_usd(
            input.entity.debt.get(debt_token),
            debt_parameters.decimal_factor(),
            self.ledger.interest_rate_models.debt.get(debt_token),
            price_of(prices, debt_underlying)?,
        )?;
        nostra_mainnet_debt_to_be_liquidated(
            input.risk_adjusted_collateral_usd,
            input.risk_adjusted_debt_usd,
            collateral_parameters.collateral_factor()?,
            debt_parameters.debt_factor()?,
            debt_usd_cap,
        )
    }
}

impl LendingState for NostraMainnetState {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::NostraMainnet
    }

    fn last_block_number(&self) -> u64 {
        self.ledger.last_block_number
    }

    fn process_event(&mut self, event: &RawEvent) -> Result<(), StateError> {
        self.ledger.process_event(event)
    }

    fn token_parameters(&self) -> &TokenParameters {
        &self.ledger.token_parameters
    }

    fn set_token_parameters(&mut self, parameters: TokenParameters) {
        self.ledger.token_parameters = parameters;
    }

    fn interest_rate_models(&self) -> &InterestRateModels {
        &self.ledger.interest_rate_models
    }

    fn loan_entities(&self) -> Vec<EntityView<'_>> {
        self.ledger.views()
    }

    fn compute_health_factor(
        &self,
        entity: &EntityView<'_>,
        prices: &Prices,
        _standardized: bool,
    ) -> Result<Decimal, StateError> {
        self.ledger.health_factor(entity.collateral, entity.debt, prices)
    }

    fn compute_liquidable_debt_at_price(
        &self,
        prices: &Prices,
        collateral_underlying: &str,
        price: Decimal,
        debt_underlying: &str,
    ) -> Result<Decimal, StateError> {
        self.ledger.liquidable_debt_at_price(
            prices,
            collateral_underlying,
            price,
            debt_underlying,
            |input, changed| {
                self.debt_to_be_liquidated(input, changed, collateral_underlying, debt_underlying)
            },
        )
    }

    fn snapshot(&self) -> StateSnapshot {
        self.ledger.snapshot()
    }

    fn restore(&mut self, snapshot: StateSnapshot) -> Result<(), StateError> {
        self.ledger.restore(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::nostra::test_support::{burn, interest_state_updated, mainnet_token, mint};
    use crate::state::test_support::address;
    use derisk_api::{TokenParameterRecord, TokenSide};
    use derisk_chain::tokens::{ETH, USDC};

    const WAD: u128 = 1_000_000_000_000_000_000;

    fn risk_record(side: TokenSide, symbol: &str, underlying: &derisk_chain::TokenSettings) -> TokenParameterRecord {
        TokenParameterRecord {
            side,
            address: mainnet_token(symbol).to_string(),
            decimals: underlying.decimals,
            symbol: symbol.to_string(),
            underlying_symbol: underlying.symbol.to_string(),
            underlying_address: underlying.address.to_string(),
            collateral_factor: Some(dec!(0.8)),
            debt_factor: Some(dec!(0.9)),
            liquidation_bonus: None,
            is_interest_bearing: None,
            protocol_fee: None,
            liquidator_fee_beta: None,
            liquidator_fee_max: None,
        }
    }

    fn parameters() -> TokenParameters {
        let mut parameters = TokenParameters::for_protocol(ProtocolId::NostraMainnet);
        parameters.apply_records(&[
            risk_record(TokenSide::Collateral, "iETH-c", &ETH),
            risk_record(TokenSide::Collateral, "nETH-c", &ETH),
            risk_record(TokenSide::Debt, "dUSDC", &USDC),
        ]);
        parameters
    }

    fn prices(eth_price: Decimal) -> Prices {
        Prices::from([
            (ETH.address.to_string(), eth_price),
            (USDC.address.to_string(), dec!(1)),
        ])
    }

    fn state() -> NostraMainnetState {
        let mut state = NostraMainnetState::new(parameters());
        let user = address("a11ce");
        state.process_event(&mint(1, mainnet_token("iETH-c"), &user, WAD)).unwrap();
        state
            .process_event(&mint(1, mainnet_token("dUSDC"), &user, 1_000_000_000))
            .unwrap();
        state
    }

    #[test]
    fn test_formula() {
        // (800 - 1000 * 1.25) / (0.8 * 1.2 - 1.25 / 0.9)
        let expected = dec!(-450) / (dec!(0.96) - dec!(1.25) / dec!(0.9));
        assert_eq!(
            nostra_mainnet_debt_to_be_liquidated(dec!(800), dec!(1000), dec!(0.8), dec!(0.9), dec!(5000)).unwrap(),
            expected
        );
        assert_eq!(
            nostra_mainnet_debt_to_be_liquidated(dec!(800), dec!(1000), dec!(0.8), dec!(0.9), dec!(100)).unwrap(),
            dec!(100)
        );
        // Healthy entities have a positive numerator and liquidate nothing.
        assert_eq!(
            nostra_mainnet_debt_to_be_liquidated(dec!(2000), dec!(1000), dec!(0.8), dec!(0.9), dec!(100)).unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_interest_bearing_collateral_uses_lending_index() {
        let mut state = NostraMainnetState::new(parameters());
        let user = address("a11ce");
        state
            .process_event(&interest_state_updated(1, mainnet_token("dETH"), 2 * WAD, WAD))
            .unwrap();
        state.process_event(&mint(2, mainnet_token("iETH-c"), &user, 4 * WAD)).unwrap();
        state.process_event(&burn(3, mainnet_token("iETH-c"), &user, 2 * WAD)).unwrap();
        let entity = state.loan_entity(&user).unwrap();
        assert_eq!(
            entity.collateral.get(mainnet_token("iETH-c")),
            Decimal::from(WAD)
        );
    }

    #[test]
    fn test_liquidable_debt_at_price() {
        let state = state();
        let at = |price: Decimal| {
            state
                .compute_liquidable_debt_at_price(&prices(dec!(2000)), ETH.address, price, USDC.address)
                .unwrap()
        };
        assert_eq!(at(dec!(2000)), Decimal::ZERO);
        // rac = 800, rad = 1000 / 0.9
        let rad = dec!(1000) / dec!(0.9);
        let expected = nostra_mainnet_debt_to_be_liquidated(dec!(800), rad, dec!(0.8), dec!(0.9), dec!(1000)).unwrap();
        assert_eq!(at(dec!(1000)), expected);
        assert!(at(dec!(1000)) > Decimal::ZERO);
    }

    #[test]
    fn test_missing_risk_parameters_fail() {
        let mut state = NostraMainnetState::new(TokenParameters::for_protocol(ProtocolId::NostraMainnet));
        let user = address("a11ce");
        state.process_event(&mint(1, mainnet_token("nETH-c"), &user, WAD)).unwrap();
        let entities = state.loan_entities();
        assert!(matches!(
            state.compute_health_factor(&entities[0], &prices(dec!(2000)), false),
            Err(StateError::MissingTokenParameters { .. })
        ));
    }
}
