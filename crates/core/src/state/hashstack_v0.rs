//! Hashstack V0 state.
//!
//! Every event carries the loan's full post-event record, and the handler
//! replaces the affected sub-ledger with it.

use derisk_api::Prices;
use derisk_chain::protocol::LoanRecord;
use derisk_chain::{HashstackV0Event, ProtocolId, RawEvent};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use super::hashstack::{ensure, loan_key, HashstackLedger};
use super::{advance_block, decode_failure, LendingState, StateSnapshot};
use crate::error::StateError;
use crate::interest_rate::InterestRateModels;
use crate::loan_entity::{EntityView, HashstackLoanEntity};
use crate::portfolio::Portfolio;
use crate::token_parameters::TokenParameters;

/// Liquidation threshold by debt category.
pub fn hashstack_v0_liquidation_threshold(debt_category: Option<u64>) -> Decimal {
    match debt_category {
        Some(1) => dec!(1.06),
        Some(2) => dec!(1.05),
        _ => dec!(1.04),
    }
}

#[derive(Debug, Clone)]
pub struct HashstackV0State {
    ledger: HashstackLedger,
}

impl HashstackV0State {
    pub fn new(token_parameters: TokenParameters) -> Self {
        Self {
            ledger: HashstackLedger::new(ProtocolId::HashstackV0, token_parameters),
        }
    }

    pub fn with_verbose_user(mut self, verbose_user: Option<String>) -> Self {
        self.ledger.verbose_user = verbose_user;
        self
    }

    pub fn loan_entity(&self, loan_id: u64) -> Option<&HashstackLoanEntity> {
        self.ledger.loan(loan_id)
    }

    /// Borrowed collateral, debt and category from a loan record.
    fn apply_loan_record(
        loan: &mut HashstackLoanEntity,
        record: &LoanRecord,
        debt_amount: Decimal,
    ) -> Result<(), StateError> {
        loan.borrowed_collateral = Portfolio::single(record.current_market.clone(), record.current_amount);
        loan.recompute_collateral()?;
        loan.debt = Portfolio::single(record.market.clone(), debt_amount);
        loan.debt_category = Some(record.debt_category);
        Ok(())
    }

    fn log_loan(&self, action: &str, block_number: u64, record: &LoanRecord) {
        if self.ledger.is_verbose(&record.owner) {
            info!(
                block_number,
                loan_id = record.loan_id,
                debt_token = %record.market,
                debt_amount = %record.amount,
                borrowed_token = %record.current_market,
                borrowed_amount = %record.current_amount,
                "{action}"
            );
        }
    }

    fn apply(&mut self, event: HashstackV0Event, block_number: u64) -> Result<(), StateError> {
        match event {
            HashstackV0Event::NewLoan {
                loan: record,
                collateral_token,
                collateral_amount,
            } => {
                let mut loan = HashstackLoanEntity {
                    user: record.owner.clone(),
                    original_collateral: Portfolio::single(collateral_token.clone(), collateral_amount),
                    ..HashstackLoanEntity::default()
                };
                Self::apply_loan_record(&mut loan, &record, record.amount)?;
                self.ledger.loan_entities.insert(loan_key(record.loan_id), loan);
                if self.ledger.is_verbose(&record.owner) {
                    info!(
                        block_number,
                        loan_id = record.loan_id,
                        %collateral_token,
                        %collateral_amount,
                        "New loan"
                    );
                }
                self.log_loan("New loan", block_number, &record);
            }
            HashstackV0Event::CollateralAdded { loan_id, token, amount }
            | HashstackV0Event::CollateralWithdrawal { loan_id, token, amount }
            | HashstackV0Event::LoanInterestDeducted { loan_id, token, amount } => {
                let loan = self.ledger.loan_or_default(loan_id);
                loan.original_collateral = Portfolio::single(token.clone(), amount);
                loan.recompute_collateral()?;
                let user = loan.user.clone();
                if self.ledger.is_verbose(&user) {
                    info!(block_number, loan_id, %token, %amount, "Original collateral replaced");
                }
            }
            HashstackV0Event::LoanWithdrawal { loan: record } => {
                let loan = self.ledger.owned_loan(record.loan_id, &record.owner)?;
                Self::apply_loan_record(loan, &record, record.amount)?;
                self.log_loan("Loan withdrawal", block_number, &record);
            }
            HashstackV0Event::LoanRepaid { loan: record } => {
                let loan = self.ledger.owned_loan(record.loan_id, &record.owner)?;
                ensure(record.current_amount.is_zero(), || {
                    format!(
                        "repaid loan {} still holds {} {}",
                        record.loan_id, record.current_amount, record.current_market
                    )
                })?;
                // Only whole loans can be repaid.
                Self::apply_loan_record(loan, &record, Decimal::ZERO)?;
                self.log_loan("Loan repaid", block_number, &record);
            }
            HashstackV0Event::LoanSwap { old, new } => {
                let loan = self.ledger.owned_loan(old.loan_id, &old.owner)?;
                ensure(new.loan_id == old.loan_id, || {
                    format!("loan swap changed id {} to {}", old.loan_id, new.loan_id)
                })?;
                ensure(new.owner == old.owner, || {
                    format!("loan swap of {} changed owner", old.loan_id)
                })?;
                let new_debt = Portfolio::single(new.market.clone(), new.amount);
                ensure(loan.debt == new_debt, || {
                    format!("loan swap of {} changed the debt", old.loan_id)
                })?;
                Self::apply_loan_record(loan, &new, new.amount)?;
                self.log_loan("Loan swap", block_number, &new);
            }
            HashstackV0Event::Liquidated { loan: record } => {
                let loan = self.ledger.owned_loan(record.loan_id, &record.owner)?;
                ensure(record.current_amount.is_zero(), || {
                    format!(
                        "liquidated loan {} still holds {} {}",
                        record.loan_id, record.current_amount, record.current_market
                    )
                })?;
                // Original collateral goes to the liquidator.
                loan.original_collateral = Portfolio::new();
                Self::apply_loan_record(loan, &record, Decimal::ZERO)?;
                self.log_loan("Liquidated", block_number, &record);
            }
        }
        Ok(())
    }
}

impl LendingState for HashstackV0State {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::HashstackV0
    }

    fn last_block_number(&self) -> u64 {
        self.ledger.last_block_number
    }

    fn process_event(&mut self, event: &RawEvent) -> Result<(), StateError> {
        advance_block(&mut self.ledger.last_block_number, event)?;
        let decoded =
            HashstackV0Event::decode(event).map_err(|e| decode_failure(ProtocolId::HashstackV0, e))?;
        self.apply(decoded, event.block_number)
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
        standardized: bool,
    ) -> Result<Decimal, StateError> {
        let threshold = standardized.then(|| hashstack_v0_liquidation_threshold(entity.debt_category));
        self.ledger.health_factor(entity, prices, threshold)
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
            |loan| hashstack_v0_liquidation_threshold(loan.debt_category),
        )
    }

    fn snapshot(&self) -> StateSnapshot {
        self.ledger.snapshot()
    }

    fn restore(&mut self, snapshot: StateSnapshot) -> Result<(), StateError> {
        self.ledger.restore(snapshot)
    }
}
