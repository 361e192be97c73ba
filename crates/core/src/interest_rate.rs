//! Cumulative interest indices.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token -> cumulative interest index. Tokens never updated read as 1.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterestRateModel {
    indices: BTreeMap<String, Decimal>,
}

impl InterestRateModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, token: &str) -> Decimal {
        self.indices.get(token).copied().unwrap_or(Decimal::ONE)
    }

    /// Whether an index was ever recorded for `token`.
    pub fn contains(&self, token: &str) -> bool {
        self.indices.contains_key(token)
    }

    /// Overwrite the index of `token`.
    pub fn set(&mut self, token: impl Into<String>, index: Decimal) {
        self.indices.insert(token.into(), index);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> + '_ {
        self.indices.iter().map(|(token, index)| (token.as_str(), *index))
    }
}

/// Collateral and debt indices of one protocol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InterestRateModels {
    pub collateral: InterestRateModel,
    pub debt: InterestRateModel,
}
