//! Derisk update cycle.
//!
//! Folds each enabled protocol's new events into its lending state, then
//! writes the main charts, loans tables, statistics and checkpoints.
//! Runs once per invocation; scheduling is left to the caller.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use derisk_api::{
    ConstantProductAmm, FilePriceSource, FileTokenParameters, FileTokenSupply, PriceSourceRegistry,
    Prices, TokenParametersSource,
};
use derisk_chain::{JsonLinesFeed, ProtocolId};
use derisk_core::config::DataConfig;
use derisk_core::{
    build_state, fold_events, get_collateral_stats, get_debt_stats, get_general_stats,
    get_loans_table_data, get_main_chart_data, get_supply_stats, get_utilization_stats,
    init_settings, settings, write_json, CheckpointStore, LastUpdate, LendingState, LoanRow,
    Settings, TokenParameters,
};

/// Collaborator inputs shared by every protocol.
struct Inputs {
    prices: Prices,
    amm: ConstantProductAmm,
    token_supply: FileTokenSupply,
    token_parameters: FileTokenParameters,
}

impl Inputs {
    async fn load(data: &DataConfig) -> Result<Self> {
        let prices = PriceSourceRegistry::new()
            .with_source(Arc::new(FilePriceSource::new(&data.prices_file)))
            .prices_with_fallback()
            .await
            .context("Failed to load prices")?;
        let amm = ConstantProductAmm::from_file(Path::new(&data.amm_supply_file)).await?;
        let token_supply = FileTokenSupply::from_file(Path::new(&data.token_supply_file)).await?;
        let token_parameters = FileTokenParameters::from_file(Path::new(&data.token_parameters_file)).await?;
        info!(
            prices = prices.len(),
            amm_pools = amm.pool_count(),
            "Inputs loaded"
        );
        Ok(Self {
            prices,
            amm,
            token_supply,
            token_parameters,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,derisk_core=debug")),
        )
        .init();

    // DERISK_CONFIG (TOML path) or DERISK_PROFILE (testing, production)
    let loaded = Settings::from_env();
    loaded.log_config();
    init_settings(loaded);
    let settings = settings();

    info!("Starting update cycle");
    let inputs = Inputs::load(&settings.data).await?;

    let mut states: Vec<Box<dyn LendingState>> = Vec::new();
    let mut loans: BTreeMap<ProtocolId, Vec<LoanRow>> = BTreeMap::new();
    for protocol in settings.protocols.enabled_protocols() {
        let state = update_protocol(protocol, settings, &inputs)
            .await
            .with_context(|| format!("Failed to update {protocol}"))?;
        let rows = get_loans_table_data(state.as_ref(), &inputs.prices)?;
        write_json(&settings.data.protocol_output_dir(protocol).join("loans.json"), &rows).await?;
        loans.insert(protocol, rows);
        states.push(state);
    }

    write_stats(settings, &inputs, &states, &loans).await?;

    let block_number = states
        .iter()
        .map(|state| state.last_block_number())
        .max()
        .unwrap_or_default();
    write_json(
        &Path::new(&settings.data.output_dir).join("last_update.json"),
        &LastUpdate::now(block_number),
    )
    .await?;

    info!(protocols = states.len(), block_number, "Update cycle finished");
    Ok(())
}

/// Restore, fold new events, write main charts and save the checkpoint.
async fn update_protocol(protocol: ProtocolId, settings: &Settings, inputs: &Inputs) -> Result<Box<dyn LendingState>> {
    let mut parameters = TokenParameters::for_protocol(protocol);
    let records = inputs
        .token_parameters
        .collect_token_parameters(protocol)
        .await?;
    parameters.apply_records(&records);

    let mut state = build_state(protocol, parameters, settings.protocols.verbose_user.clone());
    let store = CheckpointStore::new(settings.data.protocol_checkpoint_dir(protocol));
    let start_block = match store.load(protocol).await? {
        Some(snapshot) => {
            state.restore(snapshot)?;
            state.last_block_number() + 1
        }
        None => 0,
    };

    let mut events = JsonLinesFeed::new(settings.data.events_file(protocol))
        .load(start_block)
        .await?;
    protocol.sort_events(&mut events);
    let summary = fold_events(state.as_mut(), &events)?;
    info!(
        %protocol,
        start_block,
        processed = summary.processed,
        skipped = summary.skipped,
        last_block_number = state.last_block_number(),
        "State updated"
    );

    let output_dir = settings.data.protocol_output_dir(protocol);
    for pair in &settings.sweep.pairs {
        let chart = get_main_chart_data(
            state.as_ref(),
            &inputs.prices,
            &inputs.amm,
            &pair.collateral,
            &pair.debt,
            &settings.sweep,
        )
        .await;
        match chart {
            Ok(Some(chart)) => write_json(&output_dir.join(chart.file_name()), &chart.rows).await?,
            Ok(None) => warn!(%protocol, collateral = %pair.collateral, debt = %pair.debt, "Pair not supported"),
            Err(e) => error!(
                %protocol,
                collateral = %pair.collateral,
                debt = %pair.debt,
                error = %e,
                "Failed to build main chart"
            ),
        }
    }

    store
        .save(&state.snapshot(), &LastUpdate::now(state.last_block_number()))
        .await?;
    Ok(state)
}

async fn write_stats(
    settings: &Settings,
    inputs: &Inputs,
    states: &[Box<dyn LendingState>],
    loans: &BTreeMap<ProtocolId, Vec<LoanRow>>,
) -> Result<()> {
    let states: Vec<&dyn LendingState> = states.iter().map(|state| state.as_ref()).collect();
    let output_dir = Path::new(&settings.data.output_dir);

    let general = get_general_stats(&states, loans)?;
    let supply = get_supply_stats(&states, &inputs.token_supply, &inputs.prices).await?;
    let collateral = get_collateral_stats(&states)?;
    let debt = get_debt_stats(&states)?;
    let utilization = get_utilization_stats(&general, &supply, &debt);

    write_json(&output_dir.join("general_stats.json"), &general).await?;
    write_json(&output_dir.join("supply_stats.json"), &supply).await?;
    write_json(&output_dir.join("collateral_stats.json"), &collateral).await?;
    write_json(&output_dir.join("debt_stats.json"), &debt).await?;
    write_json(&output_dir.join("utilization_stats.json"), &utilization).await?;
    info!(dir = %output_dir.display(), "Statistics written");
    Ok(())
}
