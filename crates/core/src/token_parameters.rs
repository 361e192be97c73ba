//! Token metadata and risk parameters per protocol.
//!
//! Static parts come from the known address tables. Risk fields that a
//! protocol only exposes through chain calls are merged in from
//! [`TokenParameterRecord`]s and stay `None` until then.

use derisk_api::{TokenParameterRecord, TokenSide};
use derisk_chain::protocol::{
    HASHSTACK_V1_POOL_TOKENS, NOSTRA_ALPHA_TOKEN_ADDRESSES, NOSTRA_MAINNET_TOKEN_ADDRESSES,
};
use derisk_chain::{NostraTokenKind, ProtocolId, TokenSettings, TOKEN_SETTINGS};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::config::nostra_underlying_symbol;
use crate::error::StateError;

fn decimal_factor(decimals: u32) -> Decimal {
    Decimal::from_i128_with_scale(10i128.pow(decimals), 0)
}

/// Parameters of a collateral token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollateralTokenParameters {
    pub address: String,
    pub decimals: u32,
    pub symbol: String,
    pub underlying_symbol: String,
    pub underlying_address: String,
    pub collateral_factor: Option<Decimal>,
    /// zkLend
    pub liquidation_bonus: Option<Decimal>,
    /// Nostra
    pub is_interest_bearing: Option<bool>,
    /// Nostra Alpha
    pub protocol_fee: Option<Decimal>,
    /// Nostra Alpha
    pub liquidator_fee_beta: Option<Decimal>,
    /// Nostra Alpha
    pub liquidator_fee_max: Option<Decimal>,
    /// Tokens without a market price (AMM pool shares) are valued at zero.
    #[serde(default)]
    pub unpriced: bool,
}

impl CollateralTokenParameters {
    fn from_settings(token: &TokenSettings, key: &str) -> Self {
        Self {
            address: key.to_string(),
            decimals: token.decimals,
            symbol: token.symbol.to_string(),
            underlying_symbol: token.symbol.to_string(),
            underlying_address: token.address.to_string(),
            collateral_factor: None,
            liquidation_bonus: None,
            is_interest_bearing: None,
            protocol_fee: None,
            liquidator_fee_beta: None,
            liquidator_fee_max: None,
            unpriced: false,
        }
    }

    pub fn decimal_factor(&self) -> Decimal {
        decimal_factor(self.decimals)
    }

    pub fn collateral_factor(&self) -> Result<Decimal, StateError> {
        self.collateral_factor
            .ok_or_else(|| StateError::missing_parameter(&self.address, "collateral_factor"))
    }

    pub fn liquidation_bonus(&self) -> Result<Decimal, StateError> {
        self.liquidation_bonus
            .ok_or_else(|| StateError::missing_parameter(&self.address, "liquidation_bonus"))
    }

    pub fn protocol_fee(&self) -> Result<Decimal, StateError> {
        self.protocol_fee
            .ok_or_else(|| StateError::missing_parameter(&self.address, "protocol_fee"))
    }

    pub fn liquidator_fee_beta(&self) -> Result<Decimal, StateError> {
        self.liquidator_fee_beta
            .ok_or_else(|| StateError::missing_parameter(&self.address, "liquidator_fee_beta"))
    }

    pub fn liquidator_fee_max(&self) -> Result<Decimal, StateError> {
        self.liquidator_fee_max
            .ok_or_else(|| StateError::missing_parameter(&self.address, "liquidator_fee_max"))
    }

    pub fn is_interest_bearing(&self) -> bool {
        self.is_interest_bearing.unwrap_or(false)
    }
}

/// Parameters of a debt token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebtTokenParameters {
    pub address: String,
    pub decimals: u32,
    pub symbol: String,
    pub underlying_symbol: String,
    pub underlying_address: String,
    pub debt_factor: Option<Decimal>,
}

impl DebtTokenParameters {
    fn from_settings(token: &TokenSettings, key: &str) -> Self {
        Self {
            address: key.to_string(),
            decimals: token.decimals,
            symbol: token.symbol.to_string(),
            underlying_symbol: token.symbol.to_string(),
            underlying_address: token.address.to_string(),
            debt_factor: None,
        }
    }

    pub fn decimal_factor(&self) -> Decimal {
        decimal_factor(self.decimals)
    }

    pub fn debt_factor(&self) -> Result<Decimal, StateError> {
        self.debt_factor
            .ok_or_else(|| StateError::missing_parameter(&self.address, "debt_factor"))
    }
}

/// Nostra Alpha risk parameters by underlying symbol:
/// `(collateral_factor, debt_factor, liquidator_fee_beta, liquidator_fee_max, protocol_fee)`.
const NOSTRA_ALPHA_RISK_PARAMETERS: &[(&str, [Decimal; 5])] = &[
    ("ETH", [dec!(0.8), dec!(0.9), dec!(2.75), dec!(0.25), dec!(0.02)]),
    ("WBTC", [dec!(0.7), dec!(0.8), dec!(2.75), dec!(0.25), dec!(0.02)]),
    ("USDC", [dec!(0.9), dec!(0.95), dec!(1.65), dec!(0.15), dec!(0.02)]),
    ("DAI", [dec!(0.8), dec!(0.95), dec!(2.2), dec!(0.2), dec!(0.02)]),
    ("USDT", [dec!(0.8), dec!(0.95), dec!(1.65), dec!(0.15), dec!(0.02)]),
    ("wstETH", [dec!(0.8), dec!(0.9), dec!(999999), dec!(0.25), dec!(0.02)]),
    ("LORDS", [dec!(1), dec!(0.8), dec!(1), dec!(0), dec!(0)]),
    ("STRK", [dec!(0.6), dec!(0.8), dec!(999999), dec!(0.35), dec!(0.02)]),
];

/// Collateral and debt token parameters of one protocol, keyed by the token
/// id used in that protocol's portfolios.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenParameters {
    pub protocol: ProtocolId,
    pub collateral: BTreeMap<String, CollateralTokenParameters>,
    pub debt: BTreeMap<String, DebtTokenParameters>,
}

impl TokenParameters {
    /// Empty parameters.
    pub fn new(protocol: ProtocolId) -> Self {
        Self {
            protocol,
            collateral: BTreeMap::new(),
            debt: BTreeMap::new(),
        }
    }

    /// Everything known without chain calls.
    ///
    /// - Hashstack: underlying tokens (and V1 pool tokens) keyed by symbol, factors 1
    /// - Nostra: token metadata from the address tables, Alpha risk parameters
    /// - zkLend: nothing, parameters come from records
    pub fn for_protocol(protocol: ProtocolId) -> Self {
        let mut parameters = Self::new(protocol);
        match protocol {
            ProtocolId::ZkLend => {}
            ProtocolId::HashstackV0 | ProtocolId::HashstackV1 => {
                for token in TOKEN_SETTINGS.iter() {
                    parameters.insert_hashstack_token(token, false);
                }
                if protocol == ProtocolId::HashstackV1 {
                    for token in HASHSTACK_V1_POOL_TOKENS {
                        parameters.insert_hashstack_token(token, true);
                    }
                }
            }
            ProtocolId::NostraAlpha => parameters.insert_nostra_tokens(NOSTRA_ALPHA_TOKEN_ADDRESSES, true),
            ProtocolId::NostraMainnet => {
                parameters.insert_nostra_tokens(NOSTRA_MAINNET_TOKEN_ADDRESSES, false)
            }
        }
        parameters
    }

    fn insert_hashstack_token(&mut self, token: &TokenSettings, unpriced: bool) {
        let mut collateral = CollateralTokenParameters::from_settings(token, token.symbol);
        collateral.collateral_factor = Some(Decimal::ONE);
        collateral.unpriced = unpriced;
        let mut debt = DebtTokenParameters::from_settings(token, token.symbol);
        debt.debt_factor = Some(Decimal::ONE);
        self.collateral.insert(token.symbol.to_string(), collateral);
        self.debt.insert(token.symbol.to_string(), debt);
    }

    fn insert_nostra_tokens(&mut self, tokens: &[(&str, &str)], with_alpha_risk: bool) {
        for (symbol, address) in tokens {
            let kind = match NostraTokenKind::from_symbol(symbol) {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(symbol, error = %e, "Skipping Nostra token");
                    continue;
                }
            };
            let underlying_symbol = nostra_underlying_symbol(symbol);
            let Some(underlying) = TOKEN_SETTINGS.get_by_symbol(underlying_symbol) else {
                warn!(symbol, "Skipping Nostra token with unknown underlying");
                continue;
            };
            let risk = with_alpha_risk
                .then(|| {
                    NOSTRA_ALPHA_RISK_PARAMETERS
                        .iter()
                        .find(|(s, _)| *s == underlying_symbol)
                        .map(|(_, risk)| *risk)
                })
                .flatten();

            if kind.is_collateral() {
                let mut collateral = CollateralTokenParameters::from_settings(underlying, address);
                collateral.symbol = symbol.to_string();
                collateral.is_interest_bearing = Some(kind.is_interest_bearing());
                if let Some([cf, _, beta, max, fee]) = risk {
                    collateral.collateral_factor = Some(cf);
                    collateral.liquidator_fee_beta = Some(beta);
                    collateral.liquidator_fee_max = Some(max);
                    collateral.protocol_fee = Some(fee);
                }
                self.collateral.insert(address.to_string(), collateral);
            } else {
                let mut debt = DebtTokenParameters::from_settings(underlying, address);
                debt.symbol = symbol.to_string();
                if let Some([_, df, ..]) = risk {
                    debt.debt_factor = Some(df);
                }
                self.debt.insert(address.to_string(), debt);
            }
        }
    }

    /// Merge collected records. Present fields overwrite, absent risk fields
    /// keep their current value.
    pub fn apply_records(&mut self, records: &[TokenParameterRecord]) {
        for record in records {
            match record.side {
                TokenSide::Collateral => {
                    let entry = self
                        .collateral
                        .entry(record.address.clone())
                        .or_insert_with(|| CollateralTokenParameters {
                            address: record.address.clone(),
                            decimals: record.decimals,
                            symbol: record.symbol.clone(),
                            underlying_symbol: record.underlying_symbol.clone(),
                            underlying_address: record.underlying_address.clone(),
                            collateral_factor: None,
                            liquidation_bonus: None,
                            is_interest_bearing: None,
                            protocol_fee: None,
                            liquidator_fee_beta: None,
                            liquidator_fee_max: None,
                            unpriced: false,
                        });
                    entry.decimals = record.decimals;
                    entry.symbol = record.symbol.clone();
                    entry.underlying_symbol = record.underlying_symbol.clone();
                    entry.underlying_address = record.underlying_address.clone();
                    entry.collateral_factor = record.collateral_factor.or(entry.collateral_factor);
                    entry.liquidation_bonus = record.liquidation_bonus.or(entry.liquidation_bonus);
                    entry.is_interest_bearing =
                        record.is_interest_bearing.or(entry.is_interest_bearing);
                    entry.protocol_fee = record.protocol_fee.or(entry.protocol_fee);
                    entry.liquidator_fee_beta =
                        record.liquidator_fee_beta.or(entry.liquidator_fee_beta);
                    entry.liquidator_fee_max =
                        record.liquidator_fee_max.or(entry.liquidator_fee_max);
                }
                TokenSide::Debt => {
                    let entry = self
                        .debt
                        .entry(record.address.clone())
                        .or_insert_with(|| DebtTokenParameters {
                            address: record.address.clone(),
                            decimals: record.decimals,
                            symbol: record.symbol.clone(),
                            underlying_symbol: record.underlying_symbol.clone(),
                            underlying_address: record.underlying_address.clone(),
                            debt_factor: None,
                        });
                    entry.decimals = record.decimals;
                    entry.symbol = record.symbol.clone();
                    entry.underlying_symbol = record.underlying_symbol.clone();
                    entry.underlying_address = record.underlying_address.clone();
                    entry.debt_factor = record.debt_factor.or(entry.debt_factor);
                }
            }
        }
        debug!(
            protocol = %self.protocol,
            records = records.len(),
            collateral_tokens = self.collateral.len(),
            debt_tokens = self.debt.len(),
            "Applied token parameter records"
        );
    }

    pub fn collateral(&self, token: &str) -> Result<&CollateralTokenParameters, StateError> {
        self.collateral
            .get(token)
            .ok_or_else(|| StateError::MissingTokenParameters {
                token: token.to_string(),
            })
    }

    pub fn debt(&self, token: &str) -> Result<&DebtTokenParameters, StateError> {
        self.debt.get(token).ok_or_else(|| StateError::MissingTokenParameters {
            token: token.to_string(),
        })
    }

    /// Underlying address of the token whose underlying symbol is `symbol`.
    pub fn underlying_address(&self, symbol: &str) -> Option<&str> {
        self.collateral
            .values()
            .map(|p| (p.underlying_symbol.as_str(), p.underlying_address.as_str()))
            .chain(
                self.debt
                    .values()
                    .map(|p| (p.underlying_symbol.as_str(), p.underlying_address.as_str())),
            )
            .find(|(underlying_symbol, _)| *underlying_symbol == symbol)
            .map(|(_, address)| address)
    }

    /// Collateral token ids backed by `underlying_address`.
    pub fn collateral_tokens_with_underlying<'a>(
        &'a self,
        underlying_address: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.collateral
            .iter()
            .filter(move |(_, p)| p.underlying_address == underlying_address)
            .map(|(token, _)| token.as_str())
    }

    /// Debt token ids backed by `underlying_address`.
    pub fn debt_tokens_with_underlying<'a>(
        &'a self,
        underlying_address: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.debt
            .iter()
            .filter(move |(_, p)| p.underlying_address == underlying_address)
            .map(|(token, _)| token.as_str())
    }

    /// Interest-bearing collateral token sharing the debt token's underlying.
    pub fn interest_bearing_collateral_token(&self, debt_token: &str) -> Option<&str> {
        let underlying = &self.debt.get(debt_token)?.underlying_address;
        self.collateral
            .iter()
            .find(|(_, p)| p.is_interest_bearing() && &p.underlying_address == underlying)
            .map(|(token, _)| token.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derisk_chain::tokens::{ETH, USDC};

    fn nostra_address(symbol: &str) -> &'static str {
        NOSTRA_ALPHA_TOKEN_ADDRESSES
            .iter()
            .find(|(s, _)| *s == symbol)
            .map(|(_, a)| *a)
            .unwrap()
    }

    #[test]
    fn test_hashstack_parameters_keyed_by_symbol() {
        let parameters = TokenParameters::for_protocol(ProtocolId::HashstackV1);
        let eth = parameters.collateral("ETH").unwrap();
        assert_eq!(eth.underlying_address, ETH.address);
        assert_eq!(eth.collateral_factor().unwrap(), Decimal::ONE);
        assert!(!eth.unpriced);
        assert!(parameters.collateral("mySwap: ETH/USDC Pool").unwrap().unpriced);
        assert_eq!(parameters.debt("USDC").unwrap().decimal_factor(), dec!(1000000));
        assert!(TokenParameters::for_protocol(ProtocolId::HashstackV0)
            .collateral("mySwap: ETH/USDC Pool")
            .is_err());
    }

    #[test]
    fn test_nostra_alpha_static_parameters() {
        let parameters = TokenParameters::for_protocol(ProtocolId::NostraAlpha);
        let ib_eth = parameters.collateral(nostra_address("iETH-c")).unwrap();
        assert_eq!(ib_eth.underlying_symbol, "ETH");
        assert!(ib_eth.is_interest_bearing());
        assert_eq!(ib_eth.collateral_factor().unwrap(), dec!(0.8));
        assert_eq!(ib_eth.liquidator_fee_beta().unwrap(), dec!(2.75));
        assert!(!parameters
            .collateral(nostra_address("nETH-c"))
            .unwrap()
            .is_interest_bearing());
        assert_eq!(
            parameters.debt(nostra_address("dUSDC")).unwrap().debt_factor().unwrap(),
            dec!(0.95)
        );
        assert_eq!(
            parameters.interest_bearing_collateral_token(nostra_address("dETH")),
            Some(nostra_address("iETH-c"))
        );
        assert_eq!(parameters.underlying_address("USDC"), Some(USDC.address));
        assert_eq!(
            parameters.collateral_tokens_with_underlying(ETH.address).count(),
            2
        );
    }

    #[test]
    fn test_mainnet_risk_comes_from_records() {
        let mut parameters = TokenParameters::for_protocol(ProtocolId::NostraMainnet);
        let address = NOSTRA_MAINNET_TOKEN_ADDRESSES[0].1;
        assert!(matches!(
            parameters.collateral(address).unwrap().collateral_factor(),
            Err(StateError::MissingTokenParameters { .. })
        ));

        parameters.apply_records(&[TokenParameterRecord {
            side: TokenSide::Collateral,
            address: address.to_string(),
            decimals: 8,
            symbol: "iWBTC-c".to_string(),
            underlying_symbol: "WBTC".to_string(),
            underlying_address: derisk_chain::tokens::WBTC.address.to_string(),
            collateral_factor: Some(dec!(0.7)),
            debt_factor: None,
            liquidation_bonus: None,
            is_interest_bearing: None,
            protocol_fee: None,
            liquidator_fee_beta: None,
            liquidator_fee_max: None,
        }]);
        let collateral = parameters.collateral(address).unwrap();
        assert_eq!(collateral.collateral_factor().unwrap(), dec!(0.7));
        // Not overwritten by an absent field.
        assert!(collateral.is_interest_bearing());
    }

    #[test]
    fn test_missing_token() {
        let parameters = TokenParameters::for_protocol(ProtocolId::ZkLend);
        assert!(matches!(
            parameters.debt(ETH.address),
            Err(StateError::MissingTokenParameters { .. })
        ));
    }
}
