//! Hashstack V1 state.
//!
//! Like V0, events rewrite whole sub-ledgers. Borrowed funds may sit in AMM
//! pool tokens, which have no market price and are valued at zero. Failed
//! events are logged and skipped rather than aborting the run.

use derisk_api::Prices;
use derisk_chain::protocol::{CollateralRecordV1, LoanRecordV1};
use derisk_chain::{HashstackV1Event, ProtocolId, RawEvent};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use super::hashstack::{ensure, loan_key, HashstackLedger};
use super::{advance_block, decode_failure, ErrorPolicy, LendingState, StateSnapshot};
use crate::error::StateError;
use crate::interest_rate::InterestRateModels;
use crate::loan_entity::{EntityView, HashstackLoanEntity};
use crate::portfolio::Portfolio;
use crate::token_parameters::TokenParameters;

pub const HASHSTACK_V1_LIQUIDATION_THRESHOLD: Decimal = dec!(1.04);

#[derive(Debug, Clone)]
pub struct HashstackV1State {
    ledger: HashstackLedger,
}

impl HashstackV1State {
    pub fn new(token_parameters: TokenParameters) -> Self {
        Self {
            ledger: HashstackLedger::new(ProtocolId::HashstackV1, token_parameters),
        }
    }

    pub fn with_verbose_user(mut self, verbose_user: Option<String>) -> Self {
        self.ledger.verbose_user = verbose_user;
        self
    }

    pub fn loan_entity(&self, loan_id: u64) -> Option<&HashstackLoanEntity> {
        self.ledger.loan(loan_id)
    }

    fn log_loan(&self, action: &str, block_number: u64, record: &LoanRecordV1) {
        if self.ledger.is_verbose(&record.borrower) {
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

    /// Checks shared by events carrying the old and new loan records.
    fn check_same_loan(old: &LoanRecordV1, new: &LoanRecordV1) -> Result<(), StateError> {
        ensure(new.loan_id == old.loan_id, || {
            format!("loan {} became loan {}", old.loan_id, new.loan_id)
        })?;
        ensure(new.borrower == old.borrower, || {
            format!("loan {} changed borrower", old.loan_id)
        })
    }

    fn apply(&mut self, event: HashstackV1Event, block_number: u64) -> Result<(), StateError> {
        match event {
            HashstackV1Event::NewLoan { loan: record, collateral } => {
                check_collateral_loan(&record, &collateral)?;
                let mut loan = HashstackLoanEntity {
                    user: record.borrower.clone(),
                    original_collateral: Portfolio::single(collateral.token.clone(), collateral.amount),
                    borrowed_collateral: Portfolio::single(record.current_market.clone(), record.current_amount),
                    debt: Portfolio::single(record.market.clone(), record.amount),
                    ..HashstackLoanEntity::default()
                };
                loan.recompute_collateral()?;
                self.ledger.loan_entities.insert(loan_key(record.loan_id), loan);
                self.log_loan("New loan", block_number, &record);
            }
            HashstackV1Event::CollateralAdded { collateral } => {
                let loan = self.ledger.loan_or_default(collateral.loan_id);
                loan.original_collateral = Portfolio::single(collateral.token.clone(), collateral.amount);
                loan.recompute_collateral()?;
                let user = loan.user.clone();
                if self.ledger.is_verbose(&user) {
                    info!(
                        block_number,
                        loan_id = collateral.loan_id,
                        token = %collateral.token,
                        amount = %collateral.amount,
                        "Collateral added"
                    );
                }
            }
            HashstackV1Event::LoanSpent { old, new } => {
                let loan = self.ledger.owned_loan(old.loan_id, &old.borrower)?;
                Self::check_same_loan(&old, &new)?;
                let new_debt = Portfolio::single(new.market.clone(), new.amount);
                ensure(loan.debt == new_debt, || {
                    format!("spending loan {} changed the debt", old.loan_id)
                })?;
                loan.borrowed_collateral = Portfolio::single(new.current_market.clone(), new.current_amount);
                loan.recompute_collateral()?;
                loan.debt = new_debt;
                self.log_loan("Loan spent", block_number, &new);
            }
            HashstackV1Event::LoanTransferred {
                loan_id,
                sender,
                receiver,
            } => {
                let loan = self.ledger.owned_loan(loan_id, &sender)?;
                loan.user = receiver.clone();
                if self.ledger.is_verbose(&sender) || self.ledger.is_verbose(&receiver) {
                    info!(block_number, loan_id, %sender, %receiver, "Loan transferred");
                }
            }
            HashstackV1Event::LoanRepaid { old, new, collateral } => {
                let loan = self.ledger.owned_loan(old.loan_id, &old.borrower)?;
                Self::check_same_loan(&old, &new)?;
                check_collateral_loan(&new, &collateral)?;
                ensure(new.amount.is_zero(), || {
                    format!("repaid loan {} still owes {}", new.loan_id, new.amount)
                })?;
                ensure(new.current_amount.is_zero(), || {
                    format!("repaid loan {} still holds {}", new.loan_id, new.current_amount)
                })?;
                ensure(collateral.amount.is_zero(), || {
                    format!("repaid loan {} kept collateral {}", new.loan_id, collateral.amount)
                })?;
                loan.original_collateral = Portfolio::single(collateral.token.clone(), collateral.amount);
                loan.borrowed_collateral = Portfolio::single(new.current_market.clone(), new.current_amount);
                loan.recompute_collateral()?;
                loan.debt = Portfolio::single(new.market.clone(), new.amount);
                self.log_loan("Loan repaid", block_number, &new);
            }
        }
        Ok(())
    }
}

fn check_collateral_loan(loan: &LoanRecordV1, collateral: &CollateralRecordV1) -> Result<(), StateError> {
    ensure(loan.loan_id == collateral.loan_id, || {
        format!(
            "collateral record of loan {} attached to loan {}",
            collateral.loan_id, loan.loan_id
        )
    })
}

impl LendingState for HashstackV1State {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::HashstackV1
    }

    fn last_block_number(&self) -> u64 {
        self.ledger.last_block_number
    }

    fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::SkipAndLog
    }

    fn process_event(&mut self, event: &RawEvent) -> Result<(), StateError> {
        advance_block(&mut self.ledger.last_block_number, event)?;
        let decoded =
            HashstackV1Event::decode(event).map_err(|e| decode_failure(ProtocolId::HashstackV1, e))?;
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
        let threshold = standardized.then_some(HASHSTACK_V1_LIQUIDATION_THRESHOLD);
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
            |_| HASHSTACK_V1_LIQUIDATION_THRESHOLD,
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
    use crate::state::fold_events;
    use crate::state::test_support::{address, event, hex};
    use derisk_chain::protocol::HASHSTACK_V1_POOL_TOKENS;
    use derisk_chain::tokens::{ETH, USDC};

    const WAD: u128 = 1_000_000_000_000_000_000;
    const USDC_UNIT: u128 = 1_000_000;

    fn borrower() -> String {
        address("a11ce")
    }

    fn loan_record(current_market: &str, amount: u128, current_amount: u128) -> Vec<String> {
        let mut data = vec![hex(0); 12];
        data[0] = hex(1);
        data[1] = borrower();
        data[2] = USDC.address.to_string();
        data[3] = hex(amount);
        data[5] = current_market.to_string();
        data[6] = hex(current_amount);
        data
    }

    fn collateral_record(loan_id: u128, amount: u128) -> Vec<String> {
        vec![hex(loan_id), ETH.address.to_string(), hex(amount), hex(0), hex(0)]
    }

    fn new_loan(block: u64) -> RawEvent {
        let mut data = loan_record(USDC.address, 1000 * USDC_UNIT, 1000 * USDC_UNIT);
        data.extend(collateral_record(1, WAD));
        event(block, "new_loan", &data, "0x1")
    }

    fn prices(eth_price: Decimal) -> Prices {
        Prices::from([
            (ETH.address.to_string(), eth_price),
            (USDC.address.to_string(), dec!(1)),
        ])
    }

    fn state() -> HashstackV1State {
        let mut state = HashstackV1State::new(TokenParameters::for_protocol(ProtocolId::HashstackV1));
        state.process_event(&new_loan(1)).unwrap();
        state
    }

    #[test]
    fn test_new_loan() {
        let state = state();
        let loan = state.loan_entity(1).unwrap();
        assert_eq!(loan.user, borrower());
        assert_eq!(loan.debt_category, None);
        assert_eq!(loan.collateral.get("ETH"), Decimal::from(WAD));
        assert_eq!(loan.collateral.get("USDC"), Decimal::from(1000 * USDC_UNIT));
    }

    #[test]
    fn test_new_loan_collateral_mismatch_fails() {
        let mut state = HashstackV1State::new(TokenParameters::for_protocol(ProtocolId::HashstackV1));
        let mut data = loan_record(USDC.address, 1, 1);
        data.extend(collateral_record(2, WAD));
        assert!(matches!(
            state.process_event(&event(1, "new_loan", &data, "0x1")),
            Err(StateError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_loan_spent_into_pool_is_unpriced() {
        let mut state = state();
        let pool = HASHSTACK_V1_POOL_TOKENS[3];
        let mut data = loan_record(USDC.address, 1000 * USDC_UNIT, 1000 * USDC_UNIT);
        data.extend(loan_record(pool.address, 1000 * USDC_UNIT, 5 * WAD));
        state.process_event(&event(2, "loan_spent", &data, "0x1")).unwrap();

        let loan = state.loan_entity(1).unwrap();
        assert_eq!(loan.borrowed_collateral.get(pool.symbol), Decimal::from(5 * WAD));
        let views = state.loan_entities();
        let collateral_usd = state.compute_collateral_usd(&views[0], &prices(dec!(2000)), false).unwrap();
        assert_eq!(collateral_usd, dec!(2000));
    }

    #[test]
    fn test_loan_transferred() {
        let mut state = state();
        let receiver = address("b0b");
        state
            .process_event(&event(2, "loan_transferred", &[hex(1), borrower(), receiver.clone()], "0x1"))
            .unwrap();
        assert_eq!(state.loan_entity(1).unwrap().user, receiver);
        assert_eq!(state.compute_number_of_active_users(), 1);

        // The old owner can no longer act on the loan.
        assert!(matches!(
            state.process_event(&event(3, "loan_transferred", &[hex(1), borrower(), receiver], "0x1")),
            Err(StateError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_loan_repaid() {
        let mut state = state();
        let mut data = loan_record(USDC.address, 1000 * USDC_UNIT, 1000 * USDC_UNIT);
        data.extend(loan_record(USDC.address, 0, 0));
        data.extend(collateral_record(1, 0));
        state.process_event(&event(2, "loan_repaid", &data, "0x1")).unwrap();
        let loan = state.loan_entity(1).unwrap();
        assert!(loan.debt.is_zero());
        assert!(loan.collateral.is_zero());
        assert_eq!(state.compute_number_of_active_loan_entities(), 0);
    }

    #[test]
    fn test_loan_repaid_with_outstanding_amount_fails() {
        let mut state = state();
        let mut data = loan_record(USDC.address, 1000 * USDC_UNIT, 1000 * USDC_UNIT);
        data.extend(loan_record(USDC.address, 0, 7 * USDC_UNIT));
        data.extend(collateral_record(1, 0));
        assert!(matches!(
            state.process_event(&event(2, "loan_repaid", &data, "0x1")),
            Err(StateError::InvariantViolation { .. })
        ));
    }

    #[test]
    fn test_fold_skips_failed_events() {
        let mut state = HashstackV1State::new(TokenParameters::for_protocol(ProtocolId::HashstackV1));
        let mut repaid = loan_record(USDC.address, 1000 * USDC_UNIT, 1000 * USDC_UNIT);
        repaid.extend(loan_record(USDC.address, 0, 7 * USDC_UNIT));
        repaid.extend(collateral_record(1, 0));
        let events = vec![new_loan(1), event(2, "loan_repaid", &repaid, "0x1")];
        let summary = fold_events(&mut state, &events).unwrap();
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(state.last_block_number(), 2);
        assert!(state.loan_entity(1).unwrap().debt.has_positive("USDC"));
    }

    #[test]
    fn test_standardized_health_factor_and_liquidation() {
        let state = state();
        let views = state.loan_entities();
        let hf = state.compute_health_factor(&views[0], &prices(dec!(1000)), false).unwrap();
        assert_eq!(hf, dec!(2));
        assert_eq!(
            state.compute_health_factor(&views[0], &prices(dec!(1000)), true).unwrap(),
            dec!(2) / HASHSTACK_V1_LIQUIDATION_THRESHOLD
        );
        let liquidable = state
            .compute_liquidable_debt_at_price(&prices(dec!(1000)), ETH.address, dec!(30), USDC.address)
            .unwrap();
        assert_eq!(liquidable, dec!(1000));
    }
}
