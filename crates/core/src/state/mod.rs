//! Protocol state machines.
//!
//! Each protocol folds its ordered event feed into a map of loan entities
//! behind the common [`LendingState`] trait:
//!
//! - [`ZkLendState`]: incremental raw amounts, collateral gated per token
//! - [`NostraAlphaState`] / [`NostraMainnetState`]: shared Mint/Burn folding,
//!   separate liquidation formulas
//! - [`HashstackV0State`] / [`HashstackV1State`]: loan records rewritten by
//!   every event

mod hashstack;
mod hashstack_v0;
mod hashstack_v1;
mod nostra;
mod nostra_alpha;
mod nostra_mainnet;
mod zklend;

pub use hashstack_v0::{hashstack_v0_liquidation_threshold, HashstackV0State};
pub use hashstack_v1::{HashstackV1State, HASHSTACK_V1_LIQUIDATION_THRESHOLD};
pub use nostra_alpha::{nostra_alpha_debt_to_be_liquidated, AlphaLiquidationCandidate, NostraAlphaState};
pub use nostra_mainnet::{nostra_mainnet_debt_to_be_liquidated, NostraMainnetState};
pub use zklend::{zklend_debt_to_be_liquidated, ZkLendState};

use derisk_api::Prices;
use derisk_chain::{DecodeError, ProtocolId, RawEvent};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::Debug;
use tracing::{debug, warn};

use crate::error::StateError;
use crate::interest_rate::InterestRateModels;
use crate::loan_entity::{compute_collateral_usd, compute_debt_usd, EntityView, LoanEntityRecord};
use crate::token_parameters::TokenParameters;

/// What the driver does with a failed event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Abort the run
    Propagate,
    /// Log the error and continue with the next event
    SkipAndLog,
}

/// Everything needed to rebuild a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub protocol: ProtocolId,
    pub last_block_number: u64,
    pub loan_entities: Vec<LoanEntityRecord>,
    pub interest_rate_models: InterestRateModels,
}

/// Event-sourced lending state of one protocol.
pub trait LendingState: Send + Sync + Debug {
    fn protocol(&self) -> ProtocolId;

    /// Highest block processed so far.
    fn last_block_number(&self) -> u64;

    fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::Propagate
    }

    /// Fold one event into the state.
    ///
    /// Fails with [`StateError::OrderingViolation`] if the event is older than
    /// the last processed block.
    fn process_event(&mut self, event: &RawEvent) -> Result<(), StateError>;

    fn token_parameters(&self) -> &TokenParameters;

    fn set_token_parameters(&mut self, parameters: TokenParameters);

    fn interest_rate_models(&self) -> &InterestRateModels;

    fn loan_entities(&self) -> Vec<EntityView<'_>>;

    /// Health factor of one entity, divided by the protocol's liquidation
    /// threshold when `standardized`.
    fn compute_health_factor(
        &self,
        entity: &EntityView<'_>,
        prices: &Prices,
        standardized: bool,
    ) -> Result<Decimal, StateError>;

    /// USD debt that becomes liquidatable when the collateral underlying is
    /// priced at `price` and every other price stays as in `prices`.
    fn compute_liquidable_debt_at_price(
        &self,
        prices: &Prices,
        collateral_underlying: &str,
        price: Decimal,
        debt_underlying: &str,
    ) -> Result<Decimal, StateError>;

    fn snapshot(&self) -> StateSnapshot;

    /// Replace the entity map, indices and last block with the snapshot's.
    fn restore(&mut self, snapshot: StateSnapshot) -> Result<(), StateError>;

    fn compute_collateral_usd(
        &self,
        entity: &EntityView<'_>,
        prices: &Prices,
        risk_adjusted: bool,
    ) -> Result<Decimal, StateError> {
        compute_collateral_usd(
            entity.collateral,
            self.token_parameters(),
            &self.interest_rate_models().collateral,
            prices,
            risk_adjusted,
        )
    }

    fn compute_debt_usd(
        &self,
        entity: &EntityView<'_>,
        prices: &Prices,
        risk_adjusted: bool,
    ) -> Result<Decimal, StateError> {
        compute_debt_usd(
            entity.debt,
            self.token_parameters(),
            &self.interest_rate_models().debt,
            prices,
            risk_adjusted,
        )
    }

    /// Entities with any collateral or debt.
    fn compute_number_of_active_loan_entities(&self) -> usize {
        self.loan_entities()
            .iter()
            .filter(|entity| entity.has_collateral() || entity.has_debt())
            .count()
    }

    fn compute_number_of_active_loan_entities_with_debt(&self) -> usize {
        self.loan_entities()
            .iter()
            .filter(|entity| entity.has_debt())
            .count()
    }

    /// Distinct owners of active entities.
    fn compute_number_of_active_users(&self) -> usize {
        self.loan_entities()
            .iter()
            .filter(|entity| entity.has_collateral() || entity.has_debt())
            .map(|entity| entity.user)
            .collect::<HashSet<_>>()
            .len()
    }

    fn compute_number_of_active_borrowers(&self) -> usize {
        self.loan_entities()
            .iter()
            .filter(|entity| entity.has_debt())
            .map(|entity| entity.user)
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Events folded by [`fold_events`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldSummary {
    pub processed: usize,
    pub skipped: usize,
}

/// Fold events in order, honouring the state's [`ErrorPolicy`].
///
/// Ordering violations abort under either policy. Mutations applied before a
/// failing event are kept.
pub fn fold_events<S: LendingState + ?Sized>(
    state: &mut S,
    events: &[RawEvent],
) -> Result<FoldSummary, StateError> {
    let mut summary = FoldSummary::default();
    for event in events {
        match state.process_event(event) {
            Ok(()) => summary.processed += 1,
            Err(e) if e.is_fatal() || state.error_policy() == ErrorPolicy::Propagate => {
                return Err(e)
            }
            Err(e) => {
                warn!(
                    protocol = %state.protocol(),
                    block_number = event.block_number,
                    key_name = %event.key_name,
                    error = %e,
                    "Skipping event"
                );
                summary.skipped += 1;
            }
        }
    }
    debug!(
        protocol = %state.protocol(),
        processed = summary.processed,
        skipped = summary.skipped,
        last_block_number = state.last_block_number(),
        "Folded events"
    );
    Ok(summary)
}

/// Create an empty state for `protocol`.
pub fn build_state(
    protocol: ProtocolId,
    parameters: TokenParameters,
    verbose_user: Option<String>,
) -> Box<dyn LendingState> {
    match protocol {
        ProtocolId::ZkLend => Box::new(ZkLendState::new(parameters).with_verbose_user(verbose_user)),
        ProtocolId::NostraAlpha => {
            Box::new(NostraAlphaState::new(parameters).with_verbose_user(verbose_user))
        }
        ProtocolId::NostraMainnet => {
            Box::new(NostraMainnetState::new(parameters).with_verbose_user(verbose_user))
        }
        ProtocolId::HashstackV0 => {
            Box::new(HashstackV0State::new(parameters).with_verbose_user(verbose_user))
        }
        ProtocolId::HashstackV1 => {
            Box::new(HashstackV1State::new(parameters).with_verbose_user(verbose_user))
        }
    }
}

/// Reject events older than the last processed block, then advance it.
pub(crate) fn advance_block(last_block_number: &mut u64, event: &RawEvent) -> Result<(), StateError> {
    if event.block_number < *last_block_number {
        return Err(StateError::OrderingViolation {
            block_number: event.block_number,
            last_block_number: *last_block_number,
        });
    }
    *last_block_number = event.block_number;
    Ok(())
}

/// Unknown event names become [`StateError::UnrecognizedEvent`].
pub(crate) fn decode_failure(protocol: ProtocolId, error: DecodeError) -> StateError {
    match error {
        DecodeError::UnknownEvent { key_name } => StateError::UnrecognizedEvent { protocol, key_name },
        other => StateError::MalformedEventData(other),
    }
}

/// Prices with the collateral underlying overridden.
pub(crate) fn changed_prices(prices: &Prices, collateral_underlying: &str, price: Decimal) -> Prices {
    let mut changed = prices.clone();
    changed.insert(collateral_underlying.to_string(), price);
    changed
}

pub(crate) fn check_snapshot_protocol(
    expected: ProtocolId,
    snapshot: &StateSnapshot,
) -> Result<(), StateError> {
    if snapshot.protocol != expected {
        return Err(StateError::invariant(format!(
            "snapshot of {} cannot restore {expected}",
            snapshot.protocol
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use derisk_chain::RawEvent;

    /// Event with hex-encoded payload fields.
    pub fn event(block_number: u64, key_name: &str, data: &[String], from_address: &str) -> RawEvent {
        RawEvent::new(block_number, key_name, data.to_vec(), from_address)
    }

    pub fn hex(value: u128) -> String {
        format!("{value:#x}")
    }

    /// Normalised address `0x00..0<suffix>`.
    pub fn address(suffix: &str) -> String {
        format!("0x{suffix:0>64}")
    }
}
