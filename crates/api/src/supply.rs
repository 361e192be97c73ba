//! Underlying token supply held by each protocol.

use anyhow::Result;
use async_trait::async_trait;
use derisk_chain::ProtocolId;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use tracing::debug;

use crate::read_json;

/// Trait for on-chain supply providers.
#[async_trait]
pub trait TokenSupplyProvider: Send + Sync + Debug {
    /// Supply of `underlying_symbol` held by `protocol`, in whole tokens.
    async fn token_supply(&self, protocol: ProtocolId, underlying_symbol: &str) -> Result<Decimal>;
}

/// Supplies read from `{ "<protocol>": { "<symbol>": amount } }`.
///
/// Protocol keys may be display names ("Nostra Alpha") or directory names
/// ("nostra_alpha"). Absent entries are zero.
#[derive(Debug, Clone, Default)]
pub struct FileTokenSupply {
    supplies: HashMap<ProtocolId, HashMap<String, Decimal>>,
}

impl FileTokenSupply {
    pub async fn from_file(path: &Path) -> Result<Self> {
        let raw: HashMap<String, HashMap<String, Decimal>> =
            read_json(path).await?.unwrap_or_default();
        let mut supplies = HashMap::with_capacity(raw.len());
        for (key, tokens) in raw {
            let protocol = ProtocolId::from_str(&key)
                .ok_or_else(|| anyhow::anyhow!("Unknown protocol {key} in {}", path.display()))?;
            supplies.insert(protocol, tokens);
        }
        debug!(path = %path.display(), protocols = supplies.len(), "Loaded token supplies");
        Ok(Self { supplies })
    }

    pub fn with_supply(mut self, protocol: ProtocolId, underlying_symbol: &str, amount: Decimal) -> Self {
        self.supplies
            .entry(protocol)
            .or_default()
            .insert(underlying_symbol.to_string(), amount);
        self
    }
}

#[async_trait]
impl TokenSupplyProvider for FileTokenSupply {
    async fn token_supply(&self, protocol: ProtocolId, underlying_symbol: &str) -> Result<Decimal> {
        Ok(self
            .supplies
            .get(&protocol)
            .and_then(|tokens| tokens.get(underlying_symbol))
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}
