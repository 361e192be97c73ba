//! Raw event rows and typed field access.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::felt;

/// One event row as delivered by the indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    /// Block the event was emitted in
    pub block_number: u64,
    /// Block timestamp (seconds)
    #[serde(default)]
    pub timestamp: u64,
    /// Transaction hash, used as the secondary sort key
    #[serde(default)]
    pub transaction_hash: String,
    /// Event name, possibly namespaced (`zklend::market::Market::Deposit`)
    pub key_name: String,
    /// Positional payload
    pub data: Vec<String>,
    /// Emitting contract
    pub from_address: String,
    /// Event selector keys
    #[serde(default)]
    pub keys: Vec<String>,
}

impl RawEvent {
    /// Create an event with the given name, payload and emitter.
    pub fn new(
        block_number: u64,
        key_name: impl Into<String>,
        data: Vec<String>,
        from_address: impl Into<String>,
    ) -> Self {
        Self {
            block_number,
            timestamp: 0,
            transaction_hash: String::new(),
            key_name: key_name.into(),
            data,
            from_address: from_address.into(),
            keys: Vec::new(),
        }
    }

    /// Raw payload field at `index`.
    pub fn field(&self, index: usize) -> Result<&str, DecodeError> {
        self.data
            .get(index)
            .map(String::as_str)
            .ok_or(DecodeError::MissingField {
                index,
                len: self.data.len(),
            })
    }

    /// Integer amount at `index`.
    pub fn amount(&self, index: usize) -> Result<Decimal, DecodeError> {
        felt::to_decimal(self.field(index)?)
    }

    /// Fixed-point value at `index`, divided by `10^scale`.
    pub fn scaled(&self, index: usize, scale: u32) -> Result<Decimal, DecodeError> {
        felt::to_scaled_decimal(self.field(index)?, scale)
    }

    /// Normalised address at `index`.
    pub fn address(&self, index: usize) -> Result<String, DecodeError> {
        felt::add_leading_zeros(self.field(index)?)
    }

    /// Small integer (loan id, category) at `index`.
    pub fn id(&self, index: usize) -> Result<u64, DecodeError> {
        felt::to_u64(self.field(index)?)
    }

    /// Normalised emitting contract address.
    pub fn emitter(&self) -> Result<String, DecodeError> {
        felt::add_leading_zeros(&self.from_address)
    }
}

/// Sort events into processing order: block, then transaction, then the
/// protocol's per-event order. Events the order table does not know go last
/// within their transaction; otherwise the input order is kept.
pub fn sort_events<F>(events: &mut [RawEvent], order: F)
where
    F: Fn(&str) -> Option<u8>,
{
    events.sort_by(|a, b| {
        let rank = |event: &RawEvent| order(&event.key_name).unwrap_or(u8::MAX);
        a.block_number
            .cmp(&b.block_number)
            .then_with(|| a.transaction_hash.cmp(&b.transaction_hash))
            .then_with(|| rank(a).cmp(&rank(b)))
    });
}
