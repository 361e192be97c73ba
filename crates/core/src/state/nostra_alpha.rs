//! Nostra Alpha state and its fee-maximising liquidation formula.

use derisk_api::Prices;
use derisk_chain::{ProtocolId, RawEvent};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use smallvec::SmallVec;

use super::nostra::{NostraLedger, NostraLiquidationInput, NOSTRA_ALPHA_TABLES};
use super::{LendingState, StateSnapshot};
use crate::error::{checked, StateError};
use crate::interest_rate::InterestRateModels;
use crate::loan_entity::{face_value_usd, price_of, EntityView, NostraLoanEntity};
use crate::token_parameters::TokenParameters;

const LIQUIDATION_HEALTH_FACTOR_THRESHOLD: Decimal = dec!(1);
const TARGET_HEALTH_FACTOR: Decimal = dec!(1.25);

/// Fee parameters of one collateral token a liquidator could seize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlphaLiquidationCandidate {
    pub collateral_factor: Decimal,
    pub liquidator_fee_beta: Decimal,
    pub liquidator_fee_max: Decimal,
    pub protocol_fee: Decimal,
}

/// Debt (USD) liquidated through the candidate that pays the liquidator the
/// highest fee.
///
/// Per candidate: `fee = min(beta * (1 - hf), fee_max)` and the liquidated
/// share of `debt_usd` is
/// `min((1.25 - hf) / (1.25 - cf * debt_factor * (1 + fee + protocol_fee)), 1)`.
pub fn nostra_alpha_debt_to_be_liquidated(
    health_factor: Decimal,
    candidates: &[AlphaLiquidationCandidate],
    debt_factor: Decimal,
    debt_usd: Decimal,
) -> Result<Decimal, StateError> {
    let mut best_fee_usd = Decimal::ZERO;
    let mut liquidation_amount_usd = Decimal::ZERO;
    for candidate in candidates {
        let liquidator_fee = checked(
            candidate
                .liquidator_fee_beta
                .checked_mul(LIQUIDATION_HEALTH_FACTOR_THRESHOLD - health_factor),
            "Nostra liquidator fee",
        )?
        .min(candidate.liquidator_fee_max);
        let total_fee = liquidator_fee + candidate.protocol_fee;
        let denominator = TARGET_HEALTH_FACTOR
            - candidate.collateral_factor * debt_factor * (Decimal::ONE + total_fee);
        let percentage = if denominator <= Decimal::ZERO {
            Decimal::ONE
        } else {
            checked(
                (TARGET_HEALTH_FACTOR - health_factor).checked_div(denominator),
                "Nostra liquidation share",
            )?
            .min(Decimal::ONE)
        };
        let amount_usd = checked(percentage.checked_mul(debt_usd), "Nostra liquidable debt")?;
        let fee_usd = checked(liquidator_fee.checked_mul(amount_usd), "Nostra liquidator fee")?;
        if fee_usd > best_fee_usd {
            best_fee_usd = fee_usd;
            liquidation_amount_usd = amount_usd;
        }
    }
    Ok(liquidation_amount_usd)
}

#[derive(Debug, Clone)]
pub struct NostraAlphaState {
    ledger: NostraLedger,
}

impl NostraAlphaState {
    pub fn new(token_parameters: TokenParameters) -> Self {
        Self {
            ledger: NostraLedger::new(NOSTRA_ALPHA_TABLES, token_parameters),
        }
    }

    pub fn with_verbose_user(mut self, verbose_user: Option<String>) -> Self {
        self.ledger.verbose_user = verbose_user;
        self
    }

    pub fn loan_entity(&self, user: &str) -> Option<&NostraLoanEntity> {
        self.ledger.loan_entities.get(user)
    }

    /// The liquidator may seize any positive collateral token; the debt is
    /// the entity's face amount of the first debt token with the underlying,
    /// at the unchanged debt price.
    fn debt_to_be_liquidated(
        &self,
        input: &NostraLiquidationInput<'_>,
        prices: &Prices,
        debt_underlying: &str,
    ) -> Result<Decimal, StateError> {
        let parameters = &self.ledger.token_parameters;
        let Some(debt_token) = NostraLedger::pick_token(
            &input.entity.debt,
            parameters.debt_tokens_with_underlying(debt_underlying),
        ) else {
            return Ok(Decimal::ZERO);
        };
        let debt_parameters = parameters.debt(debt_token)?;

        let mut candidates: SmallVec<[AlphaLiquidationCandidate; 8]> = SmallVec::new();
        for (token, _) in input.entity.collateral.positive() {
            let collateral = parameters.collateral(token)?;
            candidates.push(AlphaLiquidationCandidate {
                collateral_factor: collateral.collateral_factor()?,
                liquidator_fee_beta: collateral.liquidator_fee_beta()?,
                liquidator_fee_max: collateral.liquidator_fee_max()?,
                protocol_fee: collateral.protocol_fee()?,
            });
        }

        let debt_usd = face_value_usd(
            input.entity.debt.get(debt_token),
            debt_parameters.decimal_factor(),
            self.ledger.interest_rate_models.debt.get(debt_token),
            price_of(prices, debt_underlying)?,
        )?;
        nostra_alpha_debt_to_be_liquidated(
            input.health_factor,
            &candidates,
            debt_parameters.debt_factor()?,
            debt_usd,
        )
    }
}

impl LendingState for NostraAlphaState {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::NostraAlpha
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
            // The debt is valued at the price before the change.
            |input, _| self.debt_to_be_liquidated(input, prices, debt_underlying),
        )
    }

    fn snapshot(&self) -> StateSnapshot {
        self.ledger.snapshot()
    }

    fn restore(&mut self, snapshot: StateSnapshot) -> Result<(), StateError> {
        self.ledger.restore(snapshot)
    }
}
