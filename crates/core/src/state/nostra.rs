//! Event folding shared by the Nostra deployments.
//!
//! Alpha and Mainnet fold the same Mint/Burn events into the same loan
//! entities; what differs is kept in [`NostraTables`]. Liquidation formulas
//! live in the per-deployment modules.

use derisk_api::Prices;
use derisk_chain::protocol::{NOSTRA_ALPHA_DEFERRED_BATCH_CALL_ADAPTER_ADDRESS, NOSTRA_MAINNET_IGNORED_ADDRESS};
use derisk_chain::{DecodeError, NostraEvent, ProtocolId, RawEvent};
use rust_decimal::Decimal;
use tracing::{info, warn};

use super::{advance_block, changed_prices, check_snapshot_protocol, StateSnapshot};
use crate::entities::EntityMap;
use crate::error::{checked, StateError};
use crate::interest_rate::{InterestRateModel, InterestRateModels};
use crate::loan_entity::{
    compute_collateral_usd, compute_debt_usd, has_positive_collateral_with_underlying,
    has_positive_debt_with_underlying, health_factor, EntityView, NostraLoanEntity,
};
use crate::portfolio::Portfolio;
use crate::token_parameters::TokenParameters;

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000000000000000000000000000";

/// Deployment-specific folding behaviour.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NostraTables {
    pub protocol: ProtocolId,
    /// Contract whose mints and burns are not loan state changes
    pub ignored_user: &'static str,
    pub handles_transfer: bool,
}

pub(crate) const NOSTRA_ALPHA_TABLES: NostraTables = NostraTables {
    protocol: ProtocolId::NostraAlpha,
    ignored_user: NOSTRA_ALPHA_DEFERRED_BATCH_CALL_ADAPTER_ADDRESS,
    handles_transfer: true,
};

pub(crate) const NOSTRA_MAINNET_TABLES: NostraTables = NostraTables {
    protocol: ProtocolId::NostraMainnet,
    ignored_user: NOSTRA_MAINNET_IGNORED_ADDRESS,
    handles_transfer: false,
};

/// Which sub-ledger a Nostra token lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ledger {
    InterestBearingCollateral,
    NonInterestBearingCollateral,
    Debt,
}

/// Entities, indices and parameters of one Nostra deployment.
#[derive(Debug, Clone)]
pub(crate) struct NostraLedger {
    pub tables: NostraTables,
    pub loan_entities: EntityMap<String, NostraLoanEntity>,
    pub interest_rate_models: InterestRateModels,
    pub token_parameters: TokenParameters,
    pub last_block_number: u64,
    pub verbose_user: Option<String>,
}

/// Entity values a liquidation formula works from.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NostraLiquidationInput<'a> {
    pub entity: &'a NostraLoanEntity,
    pub health_factor: Decimal,
    pub risk_adjusted_collateral_usd: Decimal,
    pub risk_adjusted_debt_usd: Decimal,
}

impl NostraLedger {
    pub fn new(tables: NostraTables, token_parameters: TokenParameters) -> Self {
        Self {
            tables,
            loan_entities: EntityMap::new(),
            interest_rate_models: InterestRateModels::default(),
            token_parameters,
            last_block_number: 0,
            verbose_user: None,
        }
    }

    pub fn process_event(&mut self, event: &RawEvent) -> Result<(), StateError> {
        advance_block(&mut self.last_block_number, event)?;
        let decoded = match NostraEvent::decode(event) {
            Ok(decoded) => decoded,
            Err(DecodeError::UnknownEvent { key_name }) => {
                warn!(
                    protocol = %self.tables.protocol,
                    block_number = event.block_number,
                    %key_name,
                    "Ignoring unrecognized event"
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        fold_nostra_event(self, decoded, event.block_number)
    }

    pub fn views(&self) -> Vec<EntityView<'_>> {
        self.loan_entities
            .iter()
            .map(|(user, entity)| EntityView::new(user, entity))
            .collect()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            protocol: self.tables.protocol,
            last_block_number: self.last_block_number,
            loan_entities: self
                .loan_entities
                .iter()
                .map(|(user, entity)| entity.to_record(user))
                .collect(),
            interest_rate_models: self.interest_rate_models.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: StateSnapshot) -> Result<(), StateError> {
        check_snapshot_protocol(self.tables.protocol, &snapshot)?;
        self.loan_entities.clear();
        for record in &snapshot.loan_entities {
            self.loan_entities
                .insert(record.entity_id.clone(), NostraLoanEntity::from_record(record)?);
        }
        self.interest_rate_models = snapshot.interest_rate_models;
        self.last_block_number = snapshot.last_block_number;
        Ok(())
    }

    /// Both sides risk-adjusted.
    pub fn health_factor(&self, collateral: &Portfolio, debt: &Portfolio, prices: &Prices) -> Result<Decimal, StateError> {
        let (collateral_usd, debt_usd) = self.risk_adjusted_usd(collateral, debt, prices)?;
        Ok(health_factor(collateral_usd, debt_usd))
    }

    fn risk_adjusted_usd(
        &self,
        collateral: &Portfolio,
        debt: &Portfolio,
        prices: &Prices,
    ) -> Result<(Decimal, Decimal), StateError> {
        let collateral_usd = compute_collateral_usd(
            collateral,
            &self.token_parameters,
            &self.interest_rate_models.collateral,
            prices,
            true,
        )?;
        let debt_usd = compute_debt_usd(
            debt,
            &self.token_parameters,
            &self.interest_rate_models.debt,
            prices,
            true,
        )?;
        Ok((collateral_usd, debt_usd))
    }

    /// Sum `formula` over entities holding both underlyings that are below a
    /// health factor of 1 at the changed price.
    pub fn liquidable_debt_at_price<F>(
        &self,
        prices: &Prices,
        collateral_underlying: &str,
        price: Decimal,
        debt_underlying: &str,
        formula: F,
    ) -> Result<Decimal, StateError>
    where
        F: Fn(&NostraLiquidationInput<'_>, &Prices) -> Result<Decimal, StateError>,
    {
        let changed = changed_prices(prices, collateral_underlying, price);
        let mut liquidable = Decimal::ZERO;
        for entity in self.loan_entities.values() {
            if !has_positive_collateral_with_underlying(
                &entity.collateral,
                &self.token_parameters,
                collateral_underlying,
            ) || !has_positive_debt_with_underlying(&entity.debt, &self.token_parameters, debt_underlying)
            {
                continue;
            }
            let (risk_adjusted_collateral_usd, risk_adjusted_debt_usd) =
                self.risk_adjusted_usd(&entity.collateral, &entity.debt, &changed)?;
            let health_factor = health_factor(risk_adjusted_collateral_usd, risk_adjusted_debt_usd);
            if health_factor >= Decimal::ONE {
                continue;
            }
            let input = NostraLiquidationInput {
                entity,
                health_factor,
                risk_adjusted_collateral_usd,
                risk_adjusted_debt_usd,
            };
            liquidable = checked(liquidable.checked_add(formula(&input, &changed)?), "liquidable debt")?;
        }
        Ok(liquidable)
    }

    /// First token of `portfolio` among `candidates` with a positive amount,
    /// else the first candidate.
    pub fn pick_token<'a>(
        portfolio: &Portfolio,
        mut candidates: impl Iterator<Item = &'a str>,
    ) -> Option<&'a str> {
        let mut first = None;
        for token in candidates.by_ref() {
            if portfolio.has_positive(token) {
                return Some(token);
            }
            first.get_or_insert(token);
        }
        first
    }

    fn ledger_of(&self, token: &str) -> Result<Ledger, StateError> {
        if let Some(parameters) = self.token_parameters.collateral.get(token) {
            return Ok(if parameters.is_interest_bearing() {
                Ledger::InterestBearingCollateral
            } else {
                Ledger::NonInterestBearingCollateral
            });
        }
        if self.token_parameters.debt.contains_key(token) {
            return Ok(Ledger::Debt);
        }
        Err(StateError::MissingTokenParameters {
            token: token.to_string(),
        })
    }

    fn index(&self, model: &InterestRateModel, token: &str, block_number: u64) -> Decimal {
        if !model.contains(token) {
            warn!(
                protocol = %self.tables.protocol,
                block_number,
                %token,
                "No interest rate index yet, using 1"
            );
        }
        model.get(token)
    }

    /// Face amount to raw amount for the token's ledger.
    fn raw_amount(
        &self,
        ledger: Ledger,
        token: &str,
        face_amount: Decimal,
        block_number: u64,
    ) -> Result<Decimal, StateError> {
        let index = match ledger {
            Ledger::InterestBearingCollateral => {
                self.index(&self.interest_rate_models.collateral, token, block_number)
            }
            Ledger::NonInterestBearingCollateral => return Ok(face_amount),
            Ledger::Debt => self.index(&self.interest_rate_models.debt, token, block_number),
        };
        checked(face_amount.checked_div(index), "raw amount")
    }

    fn change(&mut self, user: &str, ledger: Ledger, token: &str, raw_amount: Decimal) -> Result<(), StateError> {
        let entity = self.loan_entities.get_or_insert_with_default(user.to_string());
        if entity.user.is_empty() {
            entity.user = user.to_string();
        }
        match ledger {
            Ledger::InterestBearingCollateral => {
                entity.interest_bearing_collateral.increase_value(token, raw_amount)?;
                entity.recompute_collateral()
            }
            Ledger::NonInterestBearingCollateral => {
                entity
                    .non_interest_bearing_collateral
                    .increase_value(token, raw_amount)?;
                entity.recompute_collateral()
            }
            Ledger::Debt => entity.debt.increase_value(token, raw_amount),
        }
    }

    fn log_verbose(&self, user: &str, action: &str, block_number: u64, token: &str, raw_amount: Decimal) {
        if self.verbose_user.as_deref() == Some(user) {
            info!(
                protocol = %self.tables.protocol,
                block_number,
                %token,
                %raw_amount,
                "{action}"
            );
        }
    }
}

/// Fold one decoded event into the ledger.
pub(crate) fn fold_nostra_event(
    ledger: &mut NostraLedger,
    event: NostraEvent,
    block_number: u64,
) -> Result<(), StateError> {
    match event {
        NostraEvent::InterestStateUpdated {
            debt_token,
            lending_index,
            borrow_index,
        } => {
            match ledger
                .token_parameters
                .interest_bearing_collateral_token(&debt_token)
                .map(str::to_string)
            {
                Some(collateral_token) => ledger
                    .interest_rate_models
                    .collateral
                    .set(collateral_token, lending_index),
                None => warn!(
                    protocol = %ledger.tables.protocol,
                    %debt_token,
                    "No interest-bearing collateral token for debt token"
                ),
            }
            ledger.interest_rate_models.debt.set(debt_token, borrow_index);
        }
        NostraEvent::Mint {
            token,
            user,
            face_amount,
        } => {
            if user == ledger.tables.ignored_user {
                return Ok(());
            }
            let kind = ledger.ledger_of(&token)?;
            let raw_amount = ledger.raw_amount(kind, &token, face_amount, block_number)?;
            ledger.change(&user, kind, &token, raw_amount)?;
            ledger.log_verbose(&user, "Mint", block_number, &token, raw_amount);
        }
        NostraEvent::Burn {
            token,
            user,
            face_amount,
        } => {
            if user == ledger.tables.ignored_user {
                return Ok(());
            }
            let kind = ledger.ledger_of(&token)?;
            let raw_amount = ledger.raw_amount(kind, &token, face_amount, block_number)?;
            ledger.change(&user, kind, &token, -raw_amount)?;
            ledger.log_verbose(&user, "Burn", block_number, &token, raw_amount);
        }
        NostraEvent::Transfer {
            token,
            sender,
            recipient,
            raw_amount,
        } => {
            if !ledger.tables.handles_transfer {
                warn!(
                    protocol = %ledger.tables.protocol,
                    block_number,
                    %token,
                    "Ignoring transfer"
                );
                return Ok(());
            }
            // Mints and burns are handled by their own events.
            if sender == ZERO_ADDRESS || recipient == ZERO_ADDRESS {
                return Ok(());
            }
            let kind = ledger.ledger_of(&token)?;
            if sender != ledger.tables.ignored_user {
                ledger.change(&sender, kind, &token, -raw_amount)?;
                ledger.log_verbose(&sender, "Transfer out", block_number, &token, raw_amount);
            }
            if recipient != ledger.tables.ignored_user {
                ledger.change(&recipient, kind, &token, raw_amount)?;
                ledger.log_verbose(&recipient, "Transfer in", block_number, &token, raw_amount);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use derisk_chain::protocol::{NOSTRA_ALPHA_TOKEN_ADDRESSES, NOSTRA_MAINNET_TOKEN_ADDRESSES};
    use derisk_chain::RawEvent;

    use crate::state::test_support::{event, hex};

    pub fn alpha_token(symbol: &str) -> &'static str {
        NOSTRA_ALPHA_TOKEN_ADDRESSES
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, a)| *a)
            .unwrap()
    }

    pub fn mainnet_token(symbol: &str) -> &'static str {
        NOSTRA_MAINNET_TOKEN_ADDRESSES
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, a)| *a)
            .unwrap()
    }

    /// `InterestStateUpdated` with WAD-scaled indices.
    pub fn interest_state_updated(block: u64, debt_token: &str, lend_index: u128, borrow_index: u128) -> RawEvent {
        let data = vec![
            debt_token.to_string(),
            hex(0),
            hex(0),
            hex(0),
            hex(0),
            hex(lend_index),
            hex(0),
            hex(borrow_index),
            hex(0),
        ];
        event(block, "InterestStateUpdated", &data, "0x1")
    }

    pub fn mint(block: u64, token: &str, user: &str, amount: u128) -> RawEvent {
        event(block, "Mint", &[user.to_string(), hex(amount), hex(0)], token)
    }

    pub fn burn(block: u64, token: &str, user: &str, amount: u128) -> RawEvent {
        event(block, "Burn", &[user.to_string(), hex(amount), hex(0)], token)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{alpha_token, burn, interest_state_updated, mint};
    use super::*;
    use crate::state::test_support::{address, event, hex};

    const WAD: u128 = 1_000_000_000_000_000_000;

    fn alpha() -> NostraLedger {
        NostraLedger::new(
            NOSTRA_ALPHA_TABLES,
            TokenParameters::for_protocol(ProtocolId::NostraAlpha),
        )
    }

    fn assert_derived_sum(entity: &NostraLoanEntity) {
        for token in entity
            .non_interest_bearing_collateral
            .tokens()
            .chain(entity.interest_bearing_collateral.tokens())
        {
            assert_eq!(
                entity.collateral.get(token),
                entity.non_interest_bearing_collateral.get(token)
                    + entity.interest_bearing_collateral.get(token)
            );
        }
    }

    #[test]
    fn test_interest_state_updated_sets_both_models() {
        let mut ledger = alpha();
        ledger
            .process_event(&interest_state_updated(1, alpha_token("dETH"), WAD, WAD + WAD / 10))
            .unwrap();
        assert_eq!(ledger.interest_rate_models.debt.get(alpha_token("dETH")), Decimal::new(11, 1));
        assert!(ledger.interest_rate_models.collateral.contains(alpha_token("iETH-c")));
        assert!(!ledger.interest_rate_models.collateral.contains(alpha_token("nETH-c")));
    }

    #[test]
    fn test_mint_and_burn_keep_collateral_sum() {
        let mut ledger = alpha();
        let user = address("a11ce");
        ledger
            .process_event(&interest_state_updated(1, alpha_token("dETH"), 2 * WAD, WAD))
            .unwrap();
        ledger
            .process_event(&mint(2, alpha_token("iETH-c"), &user, 4 * WAD))
            .unwrap();
        ledger
            .process_event(&mint(2, alpha_token("nETH-c"), &user, 3 * WAD))
            .unwrap();
        ledger
            .process_event(&burn(3, alpha_token("nETH-c"), &user, WAD))
            .unwrap();

        let entity = ledger.loan_entities.get(&user).unwrap();
        assert_eq!(
            entity.interest_bearing_collateral.get(alpha_token("iETH-c")),
            Decimal::from(2 * WAD)
        );
        assert_eq!(
            entity.non_interest_bearing_collateral.get(alpha_token("nETH-c")),
            Decimal::from(2 * WAD)
        );
        assert_derived_sum(entity);
    }

    #[test]
    fn test_debt_mint_divides_by_borrow_index() {
        let mut ledger = alpha();
        let user = address("a11ce");
        ledger
            .process_event(&interest_state_updated(1, alpha_token("dUSDC"), WAD, 2 * WAD))
            .unwrap();
        ledger
            .process_event(&mint(2, alpha_token("dUSDC"), &user, 1_000_000_000))
            .unwrap();
        let entity = ledger.loan_entities.get(&user).unwrap();
        assert_eq!(entity.debt.get(alpha_token("dUSDC")), Decimal::from(500_000_000));
    }

    #[test]
    fn test_ignored_user_is_skipped() {
        let mut ledger = alpha();
        ledger
            .process_event(&mint(
                1,
                alpha_token("nETH-c"),
                NOSTRA_ALPHA_DEFERRED_BATCH_CALL_ADAPTER_ADDRESS,
                WAD,
            ))
            .unwrap();
        assert!(ledger.loan_entities.is_empty());
    }

    #[test]
    fn test_transfer_moves_raw_amounts() {
        let mut ledger = alpha();
        let alice = address("a11ce");
        let bob = address("b0b");
        ledger
            .process_event(&mint(1, alpha_token("nETH-c"), &alice, 3 * WAD))
            .unwrap();
        ledger
            .process_event(&event(
                2,
                "Transfer",
                &[alice.clone(), bob.clone(), hex(WAD), hex(0)],
                alpha_token("nETH-c"),
            ))
            .unwrap();
        // Mint transfer from the zero address is not double counted.
        ledger
            .process_event(&event(
                3,
                "Transfer",
                &[ZERO_ADDRESS.to_string(), bob.clone(), hex(WAD), hex(0)],
                alpha_token("nETH-c"),
            ))
            .unwrap();

        let token = alpha_token("nETH-c");
        assert_eq!(ledger.loan_entities.get(&alice).unwrap().collateral.get(token), Decimal::from(2 * WAD));
        assert_eq!(ledger.loan_entities.get(&bob).unwrap().collateral.get(token), Decimal::from(WAD));
        assert_derived_sum(ledger.loan_entities.get(&bob).unwrap());
    }

    #[test]
    fn test_mainnet_ignores_transfer() {
        let mut ledger = NostraLedger::new(
            NOSTRA_MAINNET_TABLES,
            TokenParameters::for_protocol(ProtocolId::NostraMainnet),
        );
        ledger
            .process_event(&event(
                1,
                "Transfer",
                &[address("a"), address("b"), hex(WAD), hex(0)],
                super::test_support::mainnet_token("nETH-c"),
            ))
            .unwrap();
        assert!(ledger.loan_entities.is_empty());
    }

    #[test]
    fn test_unknown_event_is_skipped() {
        let mut ledger = alpha();
        ledger
            .process_event(&event(4, "Approval", &[], alpha_token("dETH")))
            .unwrap();
        assert_eq!(ledger.last_block_number, 4);
    }

    #[test]
    fn test_unknown_token_fails() {
        let mut ledger = alpha();
        let result = ledger.process_event(&mint(1, "0x123", &address("a"), WAD));
        assert!(matches!(result, Err(StateError::MissingTokenParameters { .. })));
    }

    #[test]
    fn test_pick_token_prefers_positive() {
        let portfolio = Portfolio::single("b", Decimal::ONE);
        assert_eq!(NostraLedger::pick_token(&portfolio, ["a", "b"].into_iter()), Some("b"));
        assert_eq!(NostraLedger::pick_token(&Portfolio::new(), ["a", "b"].into_iter()), Some("a"));
        assert_eq!(NostraLedger::pick_token(&portfolio, std::iter::empty()), None);
    }
}
