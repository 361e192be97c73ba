//! Engine settings with profile support.
//!
//! Provides the data locations, price-sweep parameters, protocol selection and
//! the per-token rounding table, loadable from TOML or picked by profile.

use derisk_chain::protocol::{NOSTRA_ALPHA_TOKEN_ADDRESSES, NOSTRA_MAINNET_TOKEN_ADDRESSES};
use derisk_chain::tokens::PAIRS;
use derisk_chain::{ProtocolId, TOKEN_SETTINGS};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

/// Main settings structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    /// Input and output locations
    #[serde(default)]
    pub data: DataConfig,

    /// Main chart price sweep
    #[serde(default)]
    pub sweep: SweepConfig,

    /// Protocols to process
    #[serde(default)]
    pub protocols: ProtocolsConfig,

    /// Dust thresholds applied to portfolio amounts
    #[serde(default)]
    pub rounding: RoundingConfig,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// Input and output locations. `${VAR}` patterns are expanded on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// One `<protocol>/events.jsonl` per protocol
    #[serde(default = "default_events_dir")]
    pub events_dir: String,

    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,

    #[serde(default = "default_prices_file")]
    pub prices_file: String,

    #[serde(default = "default_amm_supply_file")]
    pub amm_supply_file: String,

    #[serde(default = "default_token_supply_file")]
    pub token_supply_file: String,

    #[serde(default = "default_token_parameters_file")]
    pub token_parameters_file: String,
}

fn default_events_dir() -> String {
    "data/events".to_string()
}
fn default_output_dir() -> String {
    "data/output".to_string()
}
fn default_checkpoint_dir() -> String {
    "data/checkpoints".to_string()
}
fn default_prices_file() -> String {
    "data/prices.json".to_string()
}
fn default_amm_supply_file() -> String {
    "data/amm_pools.json".to_string()
}
fn default_token_supply_file() -> String {
    "data/token_supply.json".to_string()
}
fn default_token_parameters_file() -> String {
    "data/token_parameters.json".to_string()
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            events_dir: default_events_dir(),
            output_dir: default_output_dir(),
            checkpoint_dir: default_checkpoint_dir(),
            prices_file: default_prices_file(),
            amm_supply_file: default_amm_supply_file(),
            token_supply_file: default_token_supply_file(),
            token_parameters_file: default_token_parameters_file(),
        }
    }
}

impl DataConfig {
    /// Expand `${VAR}` patterns in every path.
    pub fn expand_env_vars(&mut self) {
        for path in [
            &mut self.events_dir,
            &mut self.output_dir,
            &mut self.checkpoint_dir,
            &mut self.prices_file,
            &mut self.amm_supply_file,
            &mut self.token_supply_file,
            &mut self.token_parameters_file,
        ] {
            *path = expand_env(path);
        }
    }

    pub fn events_file(&self, protocol: ProtocolId) -> PathBuf {
        PathBuf::from(&self.events_dir)
            .join(protocol.directory())
            .join("events.jsonl")
    }

    pub fn protocol_output_dir(&self, protocol: ProtocolId) -> PathBuf {
        PathBuf::from(&self.output_dir).join(protocol.directory())
    }

    pub fn protocol_checkpoint_dir(&self, protocol: ProtocolId) -> PathBuf {
        PathBuf::from(&self.checkpoint_dir).join(protocol.directory())
    }
}

/// Collateral/debt pair swept by the main chart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairConfig {
    pub collateral: String,
    pub debt: String,
}

/// Main chart price grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Grid points aimed for when no fixed step is configured
    #[serde(default = "default_target_points")]
    pub target_points: u32,

    /// Grid ends (exclusive) at current price times this
    #[serde(default = "default_upper_bound_multiplier")]
    pub upper_bound_multiplier: Decimal,

    /// Step per collateral underlying symbol
    #[serde(default = "default_fixed_steps")]
    pub fixed_steps: BTreeMap<String, Decimal>,

    /// AMMs reported as supply columns
    #[serde(default = "default_amms")]
    pub amms: Vec<String>,

    #[serde(default = "default_pairs")]
    pub pairs: Vec<PairConfig>,
}

fn default_target_points() -> u32 {
    50
}
fn default_upper_bound_multiplier() -> Decimal {
    dec!(1.2)
}
fn default_fixed_steps() -> BTreeMap<String, Decimal> {
    BTreeMap::from([
        ("ETH".to_string(), dec!(100)),
        ("WBTC".to_string(), dec!(2000)),
        ("STRK".to_string(), dec!(0.025)),
    ])
}
fn default_amms() -> Vec<String> {
    derisk_api::AMMS.iter().map(|amm| amm.to_string()).collect()
}
fn default_pairs() -> Vec<PairConfig> {
    PAIRS
        .iter()
        .map(|(collateral, debt)| PairConfig {
            collateral: collateral.to_string(),
            debt: debt.to_string(),
        })
        .collect()
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            target_points: default_target_points(),
            upper_bound_multiplier: default_upper_bound_multiplier(),
            fixed_steps: default_fixed_steps(),
            amms: default_amms(),
            pairs: default_pairs(),
        }
    }
}

/// Protocol selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolsConfig {
    /// Protocol names, in processing order
    #[serde(default = "default_enabled_protocols")]
    pub enabled: Vec<String>,

    /// Address whose every loan change is logged
    #[serde(default)]
    pub verbose_user: Option<String>,
}

fn default_enabled_protocols() -> Vec<String> {
    ProtocolId::ALL
        .iter()
        .map(|protocol| protocol.directory().to_string())
        .collect()
}

impl Default for ProtocolsConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled_protocols(),
            verbose_user: None,
        }
    }
}

impl ProtocolsConfig {
    /// Enabled protocols. Unknown names are logged and skipped.
    pub fn enabled_protocols(&self) -> Vec<ProtocolId> {
        self.enabled
            .iter()
            .filter_map(|name| {
                let protocol = ProtocolId::from_str(name);
                if protocol.is_none() {
                    tracing::warn!(protocol = %name, "Unknown protocol in settings, skipping");
                }
                protocol
            })
            .collect()
    }
}

/// Per-token dust thresholds in raw units.
///
/// Keys are underlying symbols or token addresses. Amounts whose magnitude is
/// below the threshold are stored as zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundingConfig {
    #[serde(default = "default_epsilon")]
    pub default_epsilon: Decimal,

    #[serde(default = "default_epsilons")]
    pub epsilons: BTreeMap<String, Decimal>,
}

/// zkLend governance token, accepted as collateral but not swept.
const ZEND_ADDRESS: &str = "0x00585c32b625999e6e5e78645ff8df7a9001cf5cf3eb6b80ccdd16cb64bd3a34";

fn default_epsilon() -> Decimal {
    Decimal::from(5_000_000_000_000u64)
}

fn underlying_epsilon(symbol: &str) -> Option<Decimal> {
    match symbol {
        "ETH" | "wstETH" | "LORDS" | "STRK" => Some(Decimal::from(5_000_000_000_000u64)),
        "WBTC" => Some(Decimal::from(100u64)),
        "USDC" | "USDT" => Some(Decimal::from(10_000u64)),
        "DAI" | "DAI V2" => Some(Decimal::from(10_000_000_000_000_000u64)),
        _ => None,
    }
}

fn default_epsilons() -> BTreeMap<String, Decimal> {
    let mut epsilons = BTreeMap::new();
    for token in TOKEN_SETTINGS.iter() {
        if let Some(epsilon) = underlying_epsilon(token.symbol) {
            epsilons.insert(token.symbol.to_string(), epsilon);
        }
    }
    epsilons.insert(ZEND_ADDRESS.to_string(), Decimal::from(5_000_000_000_000u64));
    // Nostra tokens follow their underlying, except LORDS and dDAI V2.
    for (symbol, address) in NOSTRA_ALPHA_TOKEN_ADDRESSES
        .iter()
        .chain(NOSTRA_MAINNET_TOKEN_ADDRESSES)
    {
        let epsilon = match nostra_underlying_symbol(symbol) {
            "LORDS" => Some(Decimal::from(10_000_000_000_000_000u64)),
            "DAI V2" => None,
            underlying => underlying_epsilon(underlying),
        };
        if let Some(epsilon) = epsilon {
            epsilons.insert(address.to_string(), epsilon);
        }
    }
    epsilons
}

/// `iETH-c` -> `ETH`, `dDAI V2` -> `DAI V2`.
pub(crate) fn nostra_underlying_symbol(symbol: &str) -> &str {
    let trimmed = symbol.strip_suffix("-c").unwrap_or(symbol);
    trimmed.get(1..).unwrap_or(trimmed)
}

impl Default for RoundingConfig {
    fn default() -> Self {
        Self {
            default_epsilon: default_epsilon(),
            epsilons: default_epsilons(),
        }
    }
}

impl RoundingConfig {
    /// Threshold for `token`, given as a symbol or an address.
    pub fn epsilon(&self, token: &str) -> Decimal {
        if let Some(epsilon) = self.epsilons.get(token) {
            return *epsilon;
        }
        TOKEN_SETTINGS
            .symbol(token)
            .and_then(|symbol| self.epsilons.get(symbol))
            .copied()
            .unwrap_or(self.default_epsilon)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            data: DataConfig::default(),
            sweep: SweepConfig::default(),
            protocols: ProtocolsConfig::default(),
            rounding: RoundingConfig::default(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut settings: Self = toml::from_str(&content)?;
        settings.data.expand_env_vars();
        Ok(settings)
    }

    /// Small grid and local scratch directories.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            data: DataConfig {
                events_dir: "target/derisk/events".to_string(),
                output_dir: "target/derisk/output".to_string(),
                checkpoint_dir: "target/derisk/checkpoints".to_string(),
                prices_file: "target/derisk/prices.json".to_string(),
                amm_supply_file: "target/derisk/amm_pools.json".to_string(),
                token_supply_file: "target/derisk/token_supply.json".to_string(),
                token_parameters_file: "target/derisk/token_parameters.json".to_string(),
            },
            sweep: SweepConfig {
                target_points: 10,
                ..Default::default()
            },
            protocols: ProtocolsConfig::default(),
            rounding: RoundingConfig::default(),
        }
    }

    /// Data under `${DERISK_DATA_DIR}`.
    pub fn production() -> Self {
        let mut settings = Self {
            profile: "production".to_string(),
            data: DataConfig {
                events_dir: "${DERISK_DATA_DIR}/events".to_string(),
                output_dir: "${DERISK_DATA_DIR}/output".to_string(),
                checkpoint_dir: "${DERISK_DATA_DIR}/checkpoints".to_string(),
                prices_file: "${DERISK_DATA_DIR}/prices.json".to_string(),
                amm_supply_file: "${DERISK_DATA_DIR}/amm_pools.json".to_string(),
                token_supply_file: "${DERISK_DATA_DIR}/token_supply.json".to_string(),
                token_parameters_file: "${DERISK_DATA_DIR}/token_parameters.json".to_string(),
            },
            sweep: SweepConfig::default(),
            protocols: ProtocolsConfig::default(),
            rounding: RoundingConfig::default(),
        };
        settings.data.expand_env_vars();
        settings
    }

    /// Settings from `DERISK_CONFIG` (a TOML path) or the `DERISK_PROFILE`
    /// profile. Supported profiles: testing, production.
    pub fn from_env() -> Self {
        if let Ok(path) = std::env::var("DERISK_CONFIG") {
            match Self::from_file(&path) {
                Ok(settings) => return settings,
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "Failed to load settings file, using profile")
                }
            }
        }
        let profile = std::env::var("DERISK_PROFILE").unwrap_or_else(|_| "default".to_string());
        match profile.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    /// Log the current settings.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Settings loaded");
        tracing::info!(
            events_dir = %self.data.events_dir,
            output_dir = %self.data.output_dir,
            checkpoint_dir = %self.data.checkpoint_dir,
            "Data locations"
        );
        tracing::info!(
            target_points = self.sweep.target_points,
            upper_bound_multiplier = %self.sweep.upper_bound_multiplier,
            pairs = self.sweep.pairs.len(),
            amms = ?self.sweep.amms,
            "Price sweep"
        );
        tracing::info!(
            protocols = ?self.protocols.enabled,
            verbose_user = ?self.protocols.verbose_user,
            "Protocols"
        );
        tracing::info!(
            default_epsilon = %self.rounding.default_epsilon,
            overrides = self.rounding.epsilons.len(),
            "Rounding"
        );
    }
}

/// Expand ${VAR_NAME} patterns with environment variable values.
fn expand_env(s: &str) -> String {
    let mut result = s.to_string();
    let Ok(re) = regex_lite::Regex::new(r"\$\{([^}]+)\}") else {
        return result;
    };

    for cap in re.captures_iter(s) {
        if let (Some(full_match), Some(var_match)) = (cap.get(0), cap.get(1)) {
            if let Ok(value) = std::env::var(var_match.as_str()) {
                result = result.replace(full_match.as_str(), &value);
            }
        }
    }

    result
}

static GLOBAL_SETTINGS: OnceLock<Settings> = OnceLock::new();

/// Initialize global settings.
pub fn init_settings(settings: Settings) {
    let _ = GLOBAL_SETTINGS.set(settings);
}

/// Get the global settings, initializing from environment if needed.
pub fn settings() -> &'static Settings {
    GLOBAL_SETTINGS.get_or_init(Settings::from_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use derisk_chain::tokens::{DAI, DAI_V2, ETH, USDC, WBTC};

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.sweep.target_points, 50);
        assert_eq!(settings.sweep.fixed_steps.get("WBTC"), Some(&dec!(2000)));
        assert_eq!(settings.sweep.amms.len(), 4);
        assert_eq!(settings.protocols.enabled_protocols().len(), 5);
    }

    #[test]
    fn test_epsilon_lookup() {
        let rounding = RoundingConfig::default();
        assert_eq!(rounding.epsilon("USDC"), dec!(10000));
        assert_eq!(rounding.epsilon(USDC.address), dec!(10000));
        assert_eq!(rounding.epsilon(WBTC.address), dec!(100));
        assert_eq!(rounding.epsilon(DAI.address), Decimal::from(10_000_000_000_000_000u64));
        assert_eq!(rounding.epsilon(ETH.address), Decimal::from(5_000_000_000_000u64));
        assert_eq!(rounding.epsilon("DAI V2"), Decimal::from(10_000_000_000_000_000u64));
        assert_eq!(rounding.epsilon(DAI_V2.address), Decimal::from(10_000_000_000_000_000u64));
        assert_eq!(rounding.epsilon(ZEND_ADDRESS), Decimal::from(5_000_000_000_000u64));
        assert_eq!(rounding.epsilon("mySwap: ETH/USDC Pool"), rounding.default_epsilon);
    }

    #[test]
    fn test_nostra_epsilons() {
        let rounding = RoundingConfig::default();
        let address = |symbol: &str| {
            NOSTRA_MAINNET_TOKEN_ADDRESSES
                .iter()
                .find(|(s, _)| *s == symbol)
                .map(|(_, a)| *a)
                .unwrap()
        };
        assert_eq!(rounding.epsilon(address("iUSDC-c")), dec!(10000));
        assert_eq!(rounding.epsilon(address("dWBTC")), dec!(100));
        assert_eq!(
            rounding.epsilon(address("nLORDS-c")),
            Decimal::from(10_000_000_000_000_000u64)
        );
        assert_eq!(rounding.epsilon(address("dDAI V2")), rounding.default_epsilon);
    }

    #[test]
    fn test_nostra_underlying_symbol() {
        assert_eq!(nostra_underlying_symbol("iETH-c"), "ETH");
        assert_eq!(nostra_underlying_symbol("nwstETH-c"), "wstETH");
        assert_eq!(nostra_underlying_symbol("dDAI V2"), "DAI V2");
    }

    #[test]
    fn test_unknown_protocol_is_skipped() {
        let config = ProtocolsConfig {
            enabled: vec!["zklend".to_string(), "compound".to_string()],
            verbose_user: None,
        };
        assert_eq!(config.enabled_protocols(), vec![ProtocolId::ZkLend]);
    }

    #[test]
    fn test_expand_env() {
        // Use unique var name to avoid conflicts with parallel tests
        std::env::set_var("DERISK_SETTINGS_TEST_VAR", "/srv/derisk");
        assert_eq!(expand_env("${DERISK_SETTINGS_TEST_VAR}/events"), "/srv/derisk/events");
        assert_eq!(expand_env("no_vars"), "no_vars");
        assert_eq!(expand_env("${DERISK_UNSET_TEST_VAR}/x"), "${DERISK_UNSET_TEST_VAR}/x");
        std::env::remove_var("DERISK_SETTINGS_TEST_VAR");
    }

    #[test]
    fn test_serialization() {
        let settings = Settings::testing();
        let toml_str = toml::to_string_pretty(&settings).unwrap();
        assert!(toml_str.contains("profile = \"testing\""));

        let parsed: Settings = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.profile, "testing");
        assert_eq!(parsed.sweep.target_points, 10);
        assert_eq!(parsed.rounding.epsilon("USDT"), dec!(10000));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: Settings = toml::from_str(
            r#"
            profile = "custom"

            [protocols]
            enabled = ["hashstack_v1"]
            verbose_user = "0x1"

            [rounding]
            default_epsilon = "7"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.protocols.enabled_protocols(), vec![ProtocolId::HashstackV1]);
        assert_eq!(parsed.protocols.verbose_user.as_deref(), Some("0x1"));
        assert_eq!(parsed.rounding.default_epsilon, dec!(7));
        assert_eq!(parsed.rounding.epsilon("WBTC"), dec!(100));
        assert_eq!(parsed.data.events_dir, "data/events");
    }
}
