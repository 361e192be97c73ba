//! USD prices of underlying tokens.
//!
//! Prices are keyed by normalised underlying token address. Sources may be
//! written against symbols ("ETH") or addresses; both are normalised on load.

use anyhow::Result;
use async_trait::async_trait;
use derisk_chain::felt::add_leading_zeros;
use derisk_chain::TOKEN_SETTINGS;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::read_json;

/// Underlying token address -> USD price.
pub type Prices = HashMap<String, Decimal>;

/// Trait for price providers.
#[async_trait]
pub trait PriceSource: Send + Sync + Debug {
    /// Source identifier used in logs.
    fn source_id(&self) -> &str;

    /// Fetch the current price map.
    async fn prices(&self) -> Result<Prices>;
}

/// Normalise a symbol or address key to an underlying token address.
fn normalise_key(key: &str) -> Option<String> {
    if let Some(token) = TOKEN_SETTINGS.get_by_symbol(key) {
        return Some(token.address.to_string());
    }
    add_leading_zeros(key).ok()
}

fn normalise(raw: HashMap<String, Decimal>) -> Prices {
    let mut prices = Prices::with_capacity(raw.len());
    for (key, price) in raw {
        match normalise_key(&key) {
            Some(address) => {
                prices.insert(address, price);
            }
            None => warn!(key = %key, "Ignoring price for unknown token"),
        }
    }
    prices
}

/// Prices read from a JSON object `{ "<symbol or address>": price }`.
#[derive(Debug, Clone)]
pub struct FilePriceSource {
    path: PathBuf,
}

impl FilePriceSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PriceSource for FilePriceSource {
    fn source_id(&self) -> &str {
        "file"
    }

    async fn prices(&self) -> Result<Prices> {
        let raw: HashMap<String, Decimal> = read_json(&self.path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Price file {} not found", self.path.display()))?;
        let prices = normalise(raw);
        debug!(path = %self.path.display(), tokens = prices.len(), "Loaded prices");
        Ok(prices)
    }
}

/// In-memory prices.
#[derive(Debug, Clone, Default)]
pub struct FixedPriceSource {
    prices: Prices,
}

impl FixedPriceSource {
    /// Build from symbol or address keys.
    pub fn new<K: Into<String>>(prices: impl IntoIterator<Item = (K, Decimal)>) -> Self {
        let raw = prices.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self {
            prices: normalise(raw),
        }
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    fn source_id(&self) -> &str {
        "fixed"
    }

    async fn prices(&self) -> Result<Prices> {
        Ok(self.prices.clone())
    }
}

/// Ordered list of price sources tried until one succeeds.
#[derive(Debug, Default)]
pub struct PriceSourceRegistry {
    sources: Vec<Arc<dyn PriceSource>>,
}

impl PriceSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source after the existing ones.
    pub fn with_source(mut self, source: Arc<dyn PriceSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Fetch prices, trying each source in order.
    pub async fn prices_with_fallback(&self) -> Result<Prices> {
        let mut last_error = None;
        for source in &self.sources {
            match source.prices().await {
                Ok(prices) => return Ok(prices),
                Err(e) => {
                    warn!(
                        source = source.source_id(),
                        error = %e,
                        "Price source failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("No price sources configured")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derisk_chain::tokens::{ETH, USDC};
    use rust_decimal_macros::dec;

    #[test]
    fn test_normalise_symbols_and_addresses() {
        let source = FixedPriceSource::new([
            ("ETH", dec!(2000)),
            ("0x53c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8", dec!(1)),
            ("nonsense", dec!(5)),
        ]);
        assert_eq!(source.prices.get(ETH.address), Some(&dec!(2000)));
        assert_eq!(source.prices.get(USDC.address), Some(&dec!(1)));
        assert_eq!(source.prices.len(), 2);
    }

    #[tokio::test]
    async fn test_registry_falls_back() {
        let registry = PriceSourceRegistry::new()
            .with_source(Arc::new(FilePriceSource::new("/nonexistent/derisk/prices.json")))
            .with_source(Arc::new(FixedPriceSource::new([("ETH", dec!(1800))])));

        let prices = registry.prices_with_fallback().await.unwrap();
        assert_eq!(prices.get(ETH.address), Some(&dec!(1800)));
    }

    #[tokio::test]
    async fn test_empty_registry_errors() {
        assert!(PriceSourceRegistry::new().prices_with_fallback().await.is_err());
    }

    #[tokio::test]
    async fn test_file_source() {
        let path = std::env::temp_dir().join(format!("derisk-prices-{}.json", std::process::id()));
        tokio::fs::write(&path, r#"{"ETH": "2500.5", "USDC": 1}"#).await.unwrap();

        let prices = FilePriceSource::new(&path).prices().await.unwrap();
        assert_eq!(prices.get(ETH.address), Some(&dec!(2500.5)));
        assert_eq!(prices.get(USDC.address), Some(&dec!(1)));

        tokio::fs::remove_file(&path).await.unwrap();
    }
}
