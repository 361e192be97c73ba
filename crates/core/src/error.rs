use derisk_chain::{DecodeError, ProtocolId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised while folding events or valuing loan entities.
#[derive(Debug, Error)]
pub enum StateError {
    /// The feed delivered a block older than one already processed.
    #[error("event from block {block_number} arrived after block {last_block_number}")]
    OrderingViolation {
        block_number: u64,
        last_block_number: u64,
    },

    #[error("{protocol} has no handler for event '{key_name}'")]
    UnrecognizedEvent {
        protocol: ProtocolId,
        key_name: String,
    },

    #[error("malformed event data: {0}")]
    MalformedEventData(#[from] DecodeError),

    #[error("no token parameters for {token}")]
    MissingTokenParameters { token: String },

    #[error("no price for token {token}")]
    MissingPrice { token: String },

    #[error("unknown loan {loan_id}")]
    UnknownLoan { loan_id: u64 },

    #[error("invariant violated: {reason}")]
    InvariantViolation { reason: String },
}

/// Unwrap the result of a checked `Decimal` operation.
pub(crate) fn checked(value: Option<Decimal>, quantity: &str) -> Result<Decimal, StateError> {
    value.ok_or_else(|| StateError::overflow(quantity))
}

/// Sum that fails instead of overflowing.
pub(crate) fn checked_sum(
    values: impl IntoIterator<Item = Decimal>,
    quantity: &str,
) -> Result<Decimal, StateError> {
    values
        .into_iter()
        .try_fold(Decimal::ZERO, |total, value| checked(total.checked_add(value), quantity))
}

impl StateError {
    pub(crate) fn invariant(reason: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason: reason.into(),
        }
    }

    pub(crate) fn overflow(quantity: impl std::fmt::Display) -> Self {
        Self::InvariantViolation {
            reason: format!("{quantity} overflows"),
        }
    }

    pub(crate) fn missing_parameter(token: &str, parameter: &str) -> Self {
        Self::MissingTokenParameters {
            token: format!("{token} ({parameter})"),
        }
    }

    /// Whether the error must stop the run regardless of error policy.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::OrderingViolation { .. })
    }
}
