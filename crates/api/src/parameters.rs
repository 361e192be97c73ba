//! Token metadata and risk parameters collected from chain.

use anyhow::Result;
use async_trait::async_trait;
use derisk_chain::ProtocolId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use tracing::debug;

use crate::read_json;

/// Whether a protocol token represents collateral or debt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenSide {
    Collateral,
    Debt,
}

/// One protocol token as reported by chain calls.
///
/// Risk fields are optional because each protocol only exposes some of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenParameterRecord {
    pub side: TokenSide,
    /// Protocol token address (zkLend uses the underlying address)
    pub address: String,
    pub decimals: u32,
    pub symbol: String,
    pub underlying_symbol: String,
    pub underlying_address: String,
    #[serde(default)]
    pub collateral_factor: Option<Decimal>,
    #[serde(default)]
    pub debt_factor: Option<Decimal>,
    /// zkLend liquidation bonus
    #[serde(default)]
    pub liquidation_bonus: Option<Decimal>,
    #[serde(default)]
    pub is_interest_bearing: Option<bool>,
    #[serde(default)]
    pub protocol_fee: Option<Decimal>,
    #[serde(default)]
    pub liquidator_fee_beta: Option<Decimal>,
    #[serde(default)]
    pub liquidator_fee_max: Option<Decimal>,
}

/// Trait for token-parameter collection.
#[async_trait]
pub trait TokenParametersSource: Send + Sync + Debug {
    /// Collect every token record known for `protocol`.
    async fn collect_token_parameters(&self, protocol: ProtocolId) -> Result<Vec<TokenParameterRecord>>;
}

/// Records read from `{ "<protocol>": [TokenParameterRecord, ...] }`.
#[derive(Debug, Clone, Default)]
pub struct FileTokenParameters {
    records: HashMap<ProtocolId, Vec<TokenParameterRecord>>,
}

impl FileTokenParameters {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let raw: HashMap<String, Vec<TokenParameterRecord>> =
            read_json(path).await?.unwrap_or_default();
        let mut records = HashMap::with_capacity(raw.len());
        for (key, tokens) in raw {
            let protocol = ProtocolId::from_str(&key)
                .ok_or_else(|| anyhow::anyhow!("Unknown protocol {key} in {}", path.display()))?;
            records.insert(protocol, tokens);
        }
        debug!(path = %path.display(), protocols = records.len(), "Loaded token parameters");
        Ok(Self { records })
    }

    pub fn with_records(mut self, protocol: ProtocolId, records: Vec<TokenParameterRecord>) -> Self {
        self.records.insert(protocol, records);
        self
    }
}

#[async_trait]
impl TokenParametersSource for FileTokenParameters {
    async fn collect_token_parameters(&self, protocol: ProtocolId) -> Result<Vec<TokenParameterRecord>> {
        Ok(self.records.get(&protocol).cloned().unwrap_or_default())
    }
}
