//! Event decoding errors.

use thiserror::Error;

/// Failure to decode a raw event into a typed protocol event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("event data has {len} fields, field {index} is missing")]
    MissingField { index: usize, len: usize },

    #[error("invalid felt value '{value}'")]
    InvalidFelt { value: String },

    #[error("felt value '{value}' does not fit in the target type")]
    Overflow { value: String },

    #[error("unknown event '{key_name}'")]
    UnknownEvent { key_name: String },

    #[error("unknown token address {address}")]
    UnknownToken { address: String },

    #[error("unexpected {field} '{value}'")]
    UnexpectedValue { field: &'static str, value: String },
}
