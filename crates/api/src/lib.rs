//! External collaborators consumed by the derisk engine.
//!
//! Each collaborator is an async trait with a file-backed implementation:
//! - Prices: USD price per underlying token address
//! - AMM supply: debt-token supply available on constant-product pools at a collateral price
//! - Token supply: on-chain supply of each underlying held by a protocol
//! - Token parameters: per-protocol token metadata and risk parameters

mod amm;
mod parameters;
mod prices;
mod supply;

pub use amm::{AmmPoolRecord, AmmSupplyProvider, ConstantProductAmm, AMMS};
pub use parameters::{FileTokenParameters, TokenParameterRecord, TokenParametersSource, TokenSide};
pub use prices::{FilePriceSource, FixedPriceSource, PriceSource, PriceSourceRegistry, Prices};
pub use supply::{FileTokenSupply, TokenSupplyProvider};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::path::Path;
use tracing::info;

/// Read a JSON document, `None` if the file does not exist.
pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        info!(path = %path.display(), "Input file not found");
        return Ok(None);
    }
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}
