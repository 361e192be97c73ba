//! Checkpoint tables and JSON output files.
//!
//! A checkpoint is three documents in one per-protocol directory:
//! - `loan_entities.json`: one row per entity with every named sub-ledger
//! - `interest_rate_models.json`: one row per token with both indices
//! - `last_update.json`: timestamp and last processed block

use anyhow::{bail, Context, Result};
use derisk_chain::ProtocolId;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::interest_rate::InterestRateModels;
use crate::loan_entity::LoanEntityRecord;
use crate::state::StateSnapshot;

pub const LOAN_ENTITIES_FILE: &str = "loan_entities.json";
pub const INTEREST_RATE_MODELS_FILE: &str = "interest_rate_models.json";
pub const LAST_UPDATE_FILE: &str = "last_update.json";

/// Marker written after each successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastUpdate {
    /// Unix seconds
    pub timestamp: i64,
    pub block_number: u64,
}

impl LastUpdate {
    pub fn now(block_number: u64) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp(),
            block_number,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LoanEntityRow {
    protocol: ProtocolId,
    #[serde(flatten)]
    record: LoanEntityRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct InterestRateModelRow {
    token: String,
    collateral_index: Option<Decimal>,
    debt_index: Option<Decimal>,
}

fn interest_rate_rows(models: &InterestRateModels) -> Vec<InterestRateModelRow> {
    let tokens: BTreeSet<&str> = models
        .collateral
        .iter()
        .chain(models.debt.iter())
        .map(|(token, _)| token)
        .collect();
    tokens
        .into_iter()
        .map(|token| InterestRateModelRow {
            token: token.to_string(),
            collateral_index: models
                .collateral
                .contains(token)
                .then(|| models.collateral.get(token)),
            debt_index: models.debt.contains(token).then(|| models.debt.get(token)),
        })
        .collect()
}

fn interest_rate_models(rows: Vec<InterestRateModelRow>) -> InterestRateModels {
    let mut models = InterestRateModels::default();
    for row in rows {
        if let Some(index) = row.collateral_index {
            models.collateral.set(row.token.clone(), index);
        }
        if let Some(index) = row.debt_index {
            models.debt.set(row.token, index);
        }
    }
    models
}

/// Serialize `value` as pretty JSON, creating parent directories.
pub async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let contents = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), "Wrote JSON");
    Ok(())
}

/// Read a JSON document, `None` if the file does not exist.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(None);
    }
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Checkpoint directory of one protocol.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write all three tables.
    pub async fn save(&self, snapshot: &StateSnapshot, last_update: &LastUpdate) -> Result<()> {
        if last_update.block_number != snapshot.last_block_number {
            bail!(
                "last update block {} does not match snapshot block {}",
                last_update.block_number,
                snapshot.last_block_number
            );
        }
        let rows: Vec<LoanEntityRow> = snapshot
            .loan_entities
            .iter()
            .map(|record| LoanEntityRow {
                protocol: snapshot.protocol,
                record: record.clone(),
            })
            .collect();
        write_json(&self.dir.join(LOAN_ENTITIES_FILE), &rows).await?;
        write_json(
            &self.dir.join(INTEREST_RATE_MODELS_FILE),
            &interest_rate_rows(&snapshot.interest_rate_models),
        )
        .await?;
        write_json(&self.dir.join(LAST_UPDATE_FILE), last_update).await?;
        info!(
            protocol = %snapshot.protocol,
            dir = %self.dir.display(),
            entities = rows.len(),
            block_number = last_update.block_number,
            "Saved checkpoint"
        );
        Ok(())
    }

    pub async fn load_last_update(&self) -> Result<Option<LastUpdate>> {
        read_json(&self.dir.join(LAST_UPDATE_FILE)).await
    }

    /// Rebuild the snapshot of `protocol`. `None` without a saved checkpoint.
    pub async fn load(&self, protocol: ProtocolId) -> Result<Option<StateSnapshot>> {
        let Some(last_update) = self.load_last_update().await? else {
            return Ok(None);
        };
        let rows: Vec<LoanEntityRow> = read_json(&self.dir.join(LOAN_ENTITIES_FILE))
            .await?
            .unwrap_or_default();
        if let Some(row) = rows.iter().find(|row| row.protocol != protocol) {
            bail!(
                "checkpoint in {} holds {} entities, expected {protocol}",
                self.dir.display(),
                row.protocol
            );
        }
        let models: Vec<InterestRateModelRow> = read_json(&self.dir.join(INTEREST_RATE_MODELS_FILE))
            .await?
            .unwrap_or_default();

        debug!(
            %protocol,
            entities = rows.len(),
            block_number = last_update.block_number,
            "Loaded checkpoint"
        );
        Ok(Some(StateSnapshot {
            protocol,
            last_block_number: last_update.block_number,
            loan_entities: rows.into_iter().map(|row| row.record).collect(),
            interest_rate_models: interest_rate_models(models),
        }))
    }
}
