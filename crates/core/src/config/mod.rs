//! Engine configuration.
//!
//! Settings are read from a TOML file or picked by profile:
//! - Data locations for events, prices, AMM pools, supplies and token parameters
//! - Main chart price grid and swept pairs
//! - Enabled protocols and the verbose user
//! - Per-token rounding epsilons

mod settings;

pub use settings::{
    init_settings, settings, DataConfig, PairConfig, ProtocolsConfig, RoundingConfig, Settings,
    SweepConfig,
};

pub(crate) use settings::nostra_underlying_symbol;
