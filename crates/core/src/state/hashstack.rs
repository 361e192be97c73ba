//! Loan bookkeeping shared by the Hashstack versions.
//!
//! Entities are loans keyed by their decimal id. Amounts are face amounts,
//! so the interest rate models stay empty and read as 1.

use derisk_api::Prices;
use derisk_chain::ProtocolId;
use rust_decimal::Decimal;

use super::{changed_prices, check_snapshot_protocol, StateSnapshot};
use crate::entities::EntityMap;
use crate::error::{checked, StateError};
use crate::interest_rate::InterestRateModels;
use crate::loan_entity::{
    compute_collateral_usd, compute_debt_usd, has_positive_debt_with_underlying, health_factor,
    EntityView, HashstackLoanEntity,
};
use crate::portfolio::Portfolio;
use crate::token_parameters::TokenParameters;

pub(crate) fn loan_key(loan_id: u64) -> String {
    loan_id.to_string()
}

/// Fail with [`StateError::InvariantViolation`] unless `condition` holds.
pub(crate) fn ensure(condition: bool, reason: impl FnOnce() -> String) -> Result<(), StateError> {
    if condition {
        Ok(())
    } else {
        Err(StateError::invariant(reason()))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct HashstackLedger {
    pub protocol: ProtocolId,
    pub loan_entities: EntityMap<String, HashstackLoanEntity>,
    pub interest_rate_models: InterestRateModels,
    pub token_parameters: TokenParameters,
    pub last_block_number: u64,
    pub verbose_user: Option<String>,
}

impl HashstackLedger {
    pub fn new(protocol: ProtocolId, token_parameters: TokenParameters) -> Self {
        Self {
            protocol,
            loan_entities: EntityMap::new(),
            interest_rate_models: InterestRateModels::default(),
            token_parameters,
            last_block_number: 0,
            verbose_user: None,
        }
    }

    pub fn is_verbose(&self, user: &str) -> bool {
        self.verbose_user.as_deref() == Some(user)
    }

    pub fn loan(&self, loan_id: u64) -> Option<&HashstackLoanEntity> {
        self.loan_entities.get(&loan_key(loan_id))
    }

    /// Loan for events that only carry a collateral record.
    pub fn loan_or_default(&mut self, loan_id: u64) -> &mut HashstackLoanEntity {
        self.loan_entities.get_or_insert_with_default(loan_key(loan_id))
    }

    /// Existing loan whose recorded owner must be `owner`.
    pub fn owned_loan(&mut self, loan_id: u64, owner: &str) -> Result<&mut HashstackLoanEntity, StateError> {
        let loan = self
            .loan_entities
            .get_mut(&loan_key(loan_id))
            .ok_or(StateError::UnknownLoan { loan_id })?;
        ensure(loan.user == owner, || {
            format!("loan {loan_id} is owned by {}, event names {owner}", loan.user)
        })?;
        Ok(loan)
    }

    pub fn views(&self) -> Vec<EntityView<'_>> {
        self.loan_entities
            .iter()
            .map(|(id, entity)| EntityView::new(id, entity).with_debt_category(entity.debt_category))
            .collect()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            protocol: self.protocol,
            last_block_number: self.last_block_number,
            loan_entities: self
                .loan_entities
                .iter()
                .map(|(id, entity)| entity.to_record(id))
                .collect(),
            interest_rate_models: self.interest_rate_models.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: StateSnapshot) -> Result<(), StateError> {
        check_snapshot_protocol(self.protocol, &snapshot)?;
        self.loan_entities.clear();
        for record in &snapshot.loan_entities {
            self.loan_entities
                .insert(record.entity_id.clone(), HashstackLoanEntity::from_record(record)?);
        }
        self.interest_rate_models = snapshot.interest_rate_models;
        self.last_block_number = snapshot.last_block_number;
        Ok(())
    }

    /// Collateral and debt USD, neither side risk-adjusted.
    fn usd_values(&self, collateral: &Portfolio, debt: &Portfolio, prices: &Prices) -> Result<(Decimal, Decimal), StateError> {
        let collateral_usd = compute_collateral_usd(
            collateral,
            &self.token_parameters,
            &self.interest_rate_models.collateral,
            prices,
            false,
        )?;
        let debt_usd = compute_debt_usd(
            debt,
            &self.token_parameters,
            &self.interest_rate_models.debt,
            prices,
            false,
        )?;
        Ok((collateral_usd, debt_usd))
    }

    pub fn health_factor(
        &self,
        entity: &EntityView<'_>,
        prices: &Prices,
        threshold: Option<Decimal>,
    ) -> Result<Decimal, StateError> {
        let (collateral_usd, debt_usd) = self.usd_values(entity.collateral, entity.debt, prices)?;
        let health_factor = health_factor(collateral_usd, debt_usd);
        match threshold {
            Some(threshold) if health_factor != Decimal::MAX => Ok(health_factor / threshold),
            _ => Ok(health_factor),
        }
    }

    /// Whole debt (USD) of every loan holding the debt underlying that falls
    /// below its threshold at the changed price.
    pub fn liquidable_debt_at_price<T>(
        &self,
        prices: &Prices,
        collateral_underlying: &str,
        price: Decimal,
        debt_underlying: &str,
        threshold: T,
    ) -> Result<Decimal, StateError>
    where
        T: Fn(&HashstackLoanEntity) -> Decimal,
    {
        let changed = changed_prices(prices, collateral_underlying, price);
        let mut liquidable = Decimal::ZERO;
        for entity in self.loan_entities.values() {
            if !has_positive_debt_with_underlying(&entity.debt, &self.token_parameters, debt_underlying) {
                continue;
            }
            let (collateral_usd, debt_usd) = self.usd_values(&entity.collateral, &entity.debt, &changed)?;
            if health_factor(collateral_usd, debt_usd) < threshold(entity) {
                liquidable = checked(liquidable.checked_add(debt_usd), "liquidable debt")?;
            }
        }
        Ok(liquidable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derisk_chain::tokens::{ETH, USDC};
    use rust_decimal_macros::dec;

    fn ledger() -> HashstackLedger {
        let mut ledger = HashstackLedger::new(
            ProtocolId::HashstackV0,
            TokenParameters::for_protocol(ProtocolId::HashstackV0),
        );
        let loan = ledger.loan_or_default(7);
        loan.user = "0xa".to_string();
        loan.original_collateral = Portfolio::single("ETH", dec!(1000000000000000000));
        loan.borrowed_collateral = Portfolio::single("USDC", dec!(1000000000));
        loan.debt = Portfolio::single("USDC", dec!(1500000000));
        loan.recompute_collateral().unwrap();
        ledger
    }

    fn prices(eth_price: Decimal) -> Prices {
        Prices::from([
            (ETH.address.to_string(), eth_price),
            (USDC.address.to_string(), dec!(1)),
        ])
    }

    #[test]
    fn test_owned_loan_checks_owner() {
        let mut ledger = ledger();
        assert!(ledger.owned_loan(7, "0xa").is_ok());
        assert!(matches!(
            ledger.owned_loan(7, "0xb"),
            Err(StateError::InvariantViolation { .. })
        ));
        assert!(matches!(
            ledger.owned_loan(8, "0xa"),
            Err(StateError::UnknownLoan { loan_id: 8 })
        ));
    }

    #[test]
    fn test_health_factor_and_standardization() {
        let ledger = ledger();
        let views = ledger.views();
        // (1 * 1000 + 1000) / 1500
        let hf = ledger.health_factor(&views[0], &prices(dec!(1000)), None).unwrap();
        assert_eq!(hf.round_dp(6), dec!(1.333333));
        let standardized = ledger
            .health_factor(&views[0], &prices(dec!(1000)), Some(dec!(1.04)))
            .unwrap();
        assert_eq!(standardized, hf / dec!(1.04));
    }

    #[test]
    fn test_liquidable_debt_is_whole_debt() {
        let ledger = ledger();
        let at = |price: Decimal| {
            ledger
                .liquidable_debt_at_price(&prices(dec!(1000)), ETH.address, price, USDC.address, |_| dec!(1.04))
                .unwrap()
        };
        assert_eq!(at(dec!(1000)), Decimal::ZERO);
        // (500 + 1000) / 1500 = 1 < 1.04
        assert_eq!(at(dec!(500)), dec!(1500));
        assert_eq!(
            ledger
                .liquidable_debt_at_price(&prices(dec!(1000)), ETH.address, dec!(500), ETH.address, |_| dec!(1.04))
                .unwrap(),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_ensure() {
        assert!(ensure(true, || "unused".to_string()).is_ok());
        assert!(matches!(
            ensure(false, || "broken".to_string()),
            Err(StateError::InvariantViolation { reason }) if reason == "broken"
        ));
    }
}
