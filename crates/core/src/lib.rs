//! Lending-state engine for Starknet lending protocols.
//!
//! This crate provides:
//! - Portfolios with per-token dust rounding and cumulative interest indices
//! - Token parameters per protocol
//! - One event-sourced state machine per protocol behind [`LendingState`]
//! - The main chart price sweep, the loans table and protocol statistics
//! - Checkpoint tables for saving and restoring states
//!
//! Supports zkLend, Nostra (Alpha and Mainnet) and Hashstack (V0 and V1).

pub mod config;
mod entities;
mod error;
mod interest_rate;
mod loan_entity;
mod loans_table;
mod main_chart;
mod portfolio;
mod snapshot;
pub mod state;
mod stats;
mod token_parameters;

pub use config::{init_settings, settings, Settings};
pub use entities::EntityMap;
pub use error::StateError;
pub use interest_rate::{InterestRateModel, InterestRateModels};
pub use loan_entity::{
    EntityView, HashstackLoanEntity, LoanEntity, LoanEntityRecord, NostraLoanEntity,
    ZkLendLoanEntity,
};
pub use loans_table::{get_loans_table_data, LoanRow};
pub use main_chart::{amm_supply_column, collateral_price_grid, get_main_chart_data, MainChart, MainChartRow};
pub use portfolio::Portfolio;
pub use snapshot::{read_json, write_json, CheckpointStore, LastUpdate};
pub use state::{build_state, fold_events, ErrorPolicy, FoldSummary, LendingState, StateSnapshot};
pub use stats::{
    get_collateral_stats, get_debt_stats, get_general_stats, get_supply_stats,
    get_utilization_stats, utilization, GeneralStats, SupplyStats, TokenStats, UtilizationStats,
};
pub use token_parameters::{CollateralTokenParameters, DebtTokenParameters, TokenParameters};
