//! zkLend state.
//!
//! Token ids are underlying token addresses. Deposits and withdrawals carry
//! face amounts, converted to raw amounts with the collateral index; debt
//! events carry raw amounts directly.

use derisk_api::Prices;
use derisk_chain::{ProtocolId, RawEvent, ZkLendEvent};
use rust_decimal::Decimal;
use tracing::info;

use super::{
    advance_block, changed_prices, check_snapshot_protocol, decode_failure, LendingState,
    StateSnapshot,
};
use crate::entities::EntityMap;
use crate::error::{checked, StateError};
use crate::interest_rate::InterestRateModels;
use crate::loan_entity::{
    compute_collateral_usd, compute_debt_usd, face_value_usd, health_factor, price_of, EntityView,
    ZkLendLoanEntity,
};
use crate::token_parameters::TokenParameters;

/// Debt (USD) to liquidate to bring an entity back to health.
///
/// `(debt_usd - risk_adjusted_collateral_usd) / (debt_price * (1 - cf * (1 + bonus)))`
/// debt tokens, valued at `debt_price` and capped at `debt_usd_cap`. When a
/// liquidation cannot restore health the whole cap is liquidable.
pub fn zklend_debt_to_be_liquidated(
    risk_adjusted_collateral_usd: Decimal,
    debt_usd: Decimal,
    debt_price: Decimal,
    collateral_factor: Decimal,
    liquidation_bonus: Decimal,
    debt_usd_cap: Decimal,
) -> Result<Decimal, StateError> {
    let denominator = collateral_factor
        .checked_mul(Decimal::ONE + liquidation_bonus)
        .and_then(|seized| (Decimal::ONE - seized).checked_mul(debt_price));
    let denominator = checked(denominator, "zkLend liquidation denominator")?;
    if denominator <= Decimal::ZERO {
        return Ok(debt_usd_cap);
    }
    let debt_usd_to_liquidate = debt_usd
        .checked_sub(risk_adjusted_collateral_usd)
        .and_then(|shortfall| shortfall.checked_div(denominator))
        .and_then(|debt_tokens| debt_tokens.checked_mul(debt_price));
    Ok(checked(debt_usd_to_liquidate, "zkLend liquidable debt")?
        .max(Decimal::ZERO)
        .min(debt_usd_cap))
}

#[derive(Debug, Clone)]
pub struct ZkLendState {
    loan_entities: EntityMap<String, ZkLendLoanEntity>,
    interest_rate_models: InterestRateModels,
    token_parameters: TokenParameters,
    last_block_number: u64,
    verbose_user: Option<String>,
}

impl ZkLendState {
    pub fn new(token_parameters: TokenParameters) -> Self {
        Self {
            loan_entities: EntityMap::new(),
            interest_rate_models: InterestRateModels::default(),
            token_parameters,
            last_block_number: 0,
            verbose_user: None,
        }
    }

    pub fn with_verbose_user(mut self, verbose_user: Option<String>) -> Self {
        self.verbose_user = verbose_user;
        self
    }

    pub fn loan_entity(&self, user: &str) -> Option<&ZkLendLoanEntity> {
        self.loan_entities.get(user)
    }

    fn is_verbose(&self, user: &str) -> bool {
        self.verbose_user.as_deref() == Some(user)
    }

    fn entity(&mut self, user: &str) -> &mut ZkLendLoanEntity {
        let entity = self.loan_entities.get_or_insert_with_default(user.to_string());
        if entity.user.is_empty() {
            entity.user = user.to_string();
        }
        entity
    }

    /// Apply a raw deposit delta, mirrored into collateral when enabled.
    fn change_deposit(&mut self, user: &str, token: &str, raw_amount: Decimal) -> Result<(), StateError> {
        let entity = self.entity(user);
        entity.deposit.increase_value(token, raw_amount)?;
        if entity.is_collateral_enabled(token) {
            entity.collateral.increase_value(token, raw_amount)?;
        }
        Ok(())
    }

    /// Face amount of collateral to raw amount at the current lending index.
    fn raw_collateral_amount(&self, token: &str, face_amount: Decimal) -> Result<Decimal, StateError> {
        checked(
            face_amount.checked_div(self.interest_rate_models.collateral.get(token)),
            "raw amount",
        )
    }

    fn apply(&mut self, event: ZkLendEvent, block_number: u64) -> Result<(), StateError> {
        match event {
            ZkLendEvent::AccumulatorsSync {
                token,
                lending_accumulator,
                debt_accumulator,
            } => {
                self.interest_rate_models
                    .collateral
                    .set(token.clone(), lending_accumulator);
                self.interest_rate_models.debt.set(token, debt_accumulator);
            }
            ZkLendEvent::Deposit {
                user,
                token,
                face_amount,
            } => {
                let raw_amount = self.raw_collateral_amount(&token, face_amount)?;
                self.change_deposit(&user, &token, raw_amount)?;
                if self.is_verbose(&user) {
                    info!(block_number, %token, %raw_amount, "Deposit");
                }
            }
            ZkLendEvent::Withdrawal {
                user,
                token,
                face_amount,
            } => {
                let raw_amount = self.raw_collateral_amount(&token, face_amount)?;
                self.change_deposit(&user, &token, -raw_amount)?;
                if self.is_verbose(&user) {
                    info!(block_number, %token, %raw_amount, "Withdrawal");
                }
            }
            ZkLendEvent::CollateralEnabled { user, token } => {
                let entity = self.entity(&user);
                entity.collateral_enabled.insert(token.clone(), true);
                let deposit = entity.deposit.get(&token);
                entity.collateral.set_value(token.clone(), deposit);
                if self.is_verbose(&user) {
                    info!(block_number, %token, raw_amount = %deposit, "Collateral enabled");
                }
            }
            ZkLendEvent::CollateralDisabled { user, token } => {
                let entity = self.entity(&user);
                entity.collateral_enabled.insert(token.clone(), false);
                entity.collateral.set_value(token.clone(), Decimal::ZERO);
                if self.is_verbose(&user) {
                    info!(block_number, %token, "Collateral disabled");
                }
            }
            ZkLendEvent::Borrowing {
                user,
                token,
                raw_amount,
                ..
            } => {
                self.entity(&user).debt.increase_value(&token, raw_amount)?;
                if self.is_verbose(&user) {
                    info!(block_number, %token, %raw_amount, "Borrowing");
                }
            }
            ZkLendEvent::Repayment {
                beneficiary,
                token,
                raw_amount,
                ..
            } => {
                self.entity(&beneficiary)
                    .debt
                    .increase_value(&token, -raw_amount)?;
                if self.is_verbose(&beneficiary) {
                    info!(block_number, %token, %raw_amount, "Repayment");
                }
            }
            ZkLendEvent::Liquidation {
                user,
                debt_token,
                debt_raw_amount,
                collateral_token,
                collateral_amount,
                ..
            } => {
                let collateral_raw_amount = self.raw_collateral_amount(&collateral_token, collateral_amount)?;
                self.entity(&user)
                    .debt
                    .increase_value(&debt_token, -debt_raw_amount)?;
                self.change_deposit(&user, &collateral_token, -collateral_raw_amount)?;
                if self.is_verbose(&user) {
                    info!(
                        block_number,
                        %debt_token,
                        %debt_raw_amount,
                        %collateral_token,
                        %collateral_raw_amount,
                        "Liquidation"
                    );
                }
            }
        }
        Ok(())
    }

    fn views(&self) -> impl Iterator<Item = EntityView<'_>> {
        self.loan_entities
            .iter()
            .map(|(user, entity)| EntityView::new(user, entity))
    }
}

impl LendingState for ZkLendState {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::ZkLend
    }

    fn last_block_number(&self) -> u64 {
        self.last_block_number
    }

    fn process_event(&mut self, event: &RawEvent) -> Result<(), StateError> {
        advance_block(&mut self.last_block_number, event)?;
        let decoded = ZkLendEvent::decode(event).map_err(|e| decode_failure(ProtocolId::ZkLend, e))?;
        self.apply(decoded, event.block_number)
    }

    fn token_parameters(&self) -> &TokenParameters {
        &self.token_parameters
    }

    fn set_token_parameters(&mut self, parameters: TokenParameters) {
        self.token_parameters = parameters;
    }

    fn interest_rate_models(&self) -> &InterestRateModels {
        &self.interest_rate_models
    }

    fn loan_entities(&self) -> Vec<EntityView<'_>> {
        self.views().collect()
    }

    fn compute_health_factor(
        &self,
        entity: &EntityView<'_>,
        prices: &Prices,
        _standardized: bool,
    ) -> Result<Decimal, StateError> {
        // Liquidation threshold is 1, standardized and plain coincide.
        let risk_adjusted_collateral_usd = self.compute_collateral_usd(entity, prices, true)?;
        let debt_usd = self.compute_debt_usd(entity, prices, false)?;
        Ok(health_factor(risk_adjusted_collateral_usd, debt_usd))
    }

    fn compute_liquidable_debt_at_price(
        &self,
        prices: &Prices,
        collateral_underlying: &str,
        price: Decimal,
        debt_underlying: &str,
    ) -> Result<Decimal, StateError> {
        let prices = changed_prices(prices, collateral_underlying, price);
        let collateral_parameters = self.token_parameters.collateral(collateral_underlying)?;
        let debt_parameters = self.token_parameters.debt(debt_underlying)?;
        let debt_price = price_of(&prices, debt_underlying)?;

        let mut liquidable = Decimal::ZERO;
        for (_, entity) in self.loan_entities.iter() {
            if !entity.collateral.has_positive(collateral_underlying)
                || !entity.debt.has_positive(debt_underlying)
            {
                continue;
            }
            let risk_adjusted_collateral_usd = compute_collateral_usd(
                &entity.collateral,
                &self.token_parameters,
                &self.interest_rate_models.collateral,
                &prices,
                true,
            )?;
            let debt_usd = compute_debt_usd(
                &entity.debt,
                &self.token_parameters,
                &self.interest_rate_models.debt,
                &prices,
                false,
            )?;
            let health_factor = health_factor(risk_adjusted_collateral_usd, debt_usd);
            if health_factor >= Decimal::ONE || health_factor <= Decimal::ZERO {
                continue;
            }

            let debt_usd_cap = face_value_usd(
                entity.debt.get(debt_underlying),
                debt_parameters.decimal_factor(),
                self.interest_rate_models.debt.get(debt_underlying),
                debt_price,
            )?;
            let amount = zklend_debt_to_be_liquidated(
                risk_adjusted_collateral_usd,
                debt_usd,
                debt_price,
                collateral_parameters.collateral_factor()?,
                collateral_parameters.liquidation_bonus()?,
                debt_usd_cap,
            )?;
            liquidable = checked(liquidable.checked_add(amount), "liquidable debt")?;
        }
        Ok(liquidable)
    }

    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            protocol: ProtocolId::ZkLend,
            last_block_number: self.last_block_number,
            loan_entities: self
                .loan_entities
                .iter()
                .map(|(user, entity)| entity.to_record(user))
                .collect(),
            interest_rate_models: self.interest_rate_models.clone(),
        }
    }

    fn restore(&mut self, snapshot: StateSnapshot) -> Result<(), StateError> {
        check_snapshot_protocol(ProtocolId::ZkLend, &snapshot)?;
        self.loan_entities.clear();
        for record in &snapshot.loan_entities {
            self.loan_entities
                .insert(record.entity_id.clone(), ZkLendLoanEntity::from_record(record));
        }
        self.interest_rate_models = snapshot.interest_rate_models;
        self.last_block_number = snapshot.last_block_number;
        Ok(())
    }
}
