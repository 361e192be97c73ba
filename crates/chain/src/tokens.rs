//! Static settings of the underlying tokens tracked across protocols.
//!
//! Contains symbol, decimals and Starknet address of every underlying token,
//! the default collateral/debt pairs swept by the main chart, and a
//! `LazyLock` registry for lookups by symbol or address.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::felt::add_leading_zeros;

/// Underlying token settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenSettings {
    /// Token symbol (e.g., "ETH", "USDC")
    pub symbol: &'static str,
    /// Token decimals
    pub decimals: u32,
    /// Token contract address
    pub address: &'static str,
}

impl TokenSettings {
    pub const fn new(symbol: &'static str, decimals: u32, address: &'static str) -> Self {
        Self {
            symbol,
            decimals,
            address,
        }
    }

    /// `10^decimals`.
    pub fn decimal_factor(&self) -> Decimal {
        Decimal::from_i128_with_scale(10i128.pow(self.decimals), 0)
    }
}

pub const ETH: TokenSettings = TokenSettings::new(
    "ETH",
    18,
    "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7",
);

pub const WBTC: TokenSettings = TokenSettings::new(
    "WBTC",
    8,
    "0x03fe2b97c1fd336e750087d68b9b867997fd64a2661ff3ca5a7c771641e8e7ac",
);

pub const USDC: TokenSettings = TokenSettings::new(
    "USDC",
    6,
    "0x053c91253bc9682c04929ca02ed00b3e423f6710d2ee7e0d5ebb06f3ecf368a8",
);

pub const DAI: TokenSettings = TokenSettings::new(
    "DAI",
    18,
    "0x00da114221cb83fa859dbdb4c44beeaa0bb37c7537ad5ae66fe5e0efd20e6eb3",
);

pub const USDT: TokenSettings = TokenSettings::new(
    "USDT",
    6,
    "0x068f5c6a61780768455de69077e07e89787839bf8166decfbf92b645209c0fb8",
);

pub const WSTETH: TokenSettings = TokenSettings::new(
    "wstETH",
    18,
    "0x042b8f0484674ca266ac5d08e4ac6a3fe65bd3129795def2dca5c34ecc5f96d2",
);

pub const LORDS: TokenSettings = TokenSettings::new(
    "LORDS",
    18,
    "0x0124aeb495b947201f5fac96fd1138e326ad86195b98df6dec9009158a533b49",
);

pub const STRK: TokenSettings = TokenSettings::new(
    "STRK",
    18,
    "0x04718f5a0fc34cc1af16a1cdee98ffb20c31f5cd61d6ab07201858f4287c938d",
);

/// The DAI deployed alongside Nostra Mainnet.
pub const DAI_V2: TokenSettings = TokenSettings::new(
    "DAI V2",
    18,
    "0x05574eb6b8789a91466f902c380d978e472db68170ff82a5b650b95a58ddf4ad",
);

/// All tracked underlying tokens.
pub const TOKENS: &[TokenSettings] = &[ETH, WBTC, USDC, DAI, USDT, WSTETH, LORDS, STRK, DAI_V2];

/// Default `(collateral, debt)` pairs for the main chart.
pub const PAIRS: &[(&str, &str)] = &[
    ("ETH", "USDC"),
    ("ETH", "USDT"),
    ("ETH", "DAI"),
    ("ETH", "DAI V2"),
    ("WBTC", "USDC"),
    ("WBTC", "USDT"),
    ("WBTC", "DAI"),
    ("WBTC", "DAI V2"),
    ("STRK", "USDC"),
    ("STRK", "USDT"),
    ("STRK", "DAI"),
    ("STRK", "DAI V2"),
];

/// Token lookups by symbol and by normalised address.
pub struct TokenRegistry {
    by_symbol: HashMap<&'static str, &'static TokenSettings>,
    by_address: HashMap<String, &'static TokenSettings>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        let mut by_symbol = HashMap::with_capacity(TOKENS.len());
        let mut by_address = HashMap::with_capacity(TOKENS.len());

        for token in TOKENS {
            by_symbol.insert(token.symbol, token);
            by_address.insert(token.address.to_string(), token);
        }

        Self {
            by_symbol,
            by_address,
        }
    }

    /// Get token by symbol.
    pub fn get_by_symbol(&self, symbol: &str) -> Option<&'static TokenSettings> {
        self.by_symbol.get(symbol).copied()
    }

    /// Get token by address, with or without leading zeros.
    pub fn get_by_address(&self, address: &str) -> Option<&'static TokenSettings> {
        let normalised = add_leading_zeros(address).ok()?;
        self.by_address.get(&normalised).copied()
    }

    /// Symbol of the token at `address`.
    pub fn symbol(&self, address: &str) -> Option<&'static str> {
        self.get_by_address(address).map(|token| token.symbol)
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static TokenSettings> {
        TOKENS.iter()
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global token registry instance.
pub static TOKEN_SETTINGS: LazyLock<TokenRegistry> = LazyLock::new(TokenRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_registry_lookup() {
        let registry = TokenRegistry::new();
        assert_eq!(registry.get_by_symbol("USDT").unwrap().decimals, 6);
        assert_eq!(
            registry.symbol("0x49d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7"),
            Some("ETH")
        );
        assert_eq!(registry.symbol("0x1234"), None);
        assert_eq!(registry.symbol("not an address"), None);
    }

    #[test]
    fn test_decimal_factor() {
        assert_eq!(WBTC.decimal_factor(), dec!(100000000));
        assert_eq!(USDC.decimal_factor(), dec!(1000000));
    }

    #[test]
    fn test_pairs_use_known_tokens() {
        for (collateral, debt) in PAIRS {
            assert!(TOKEN_SETTINGS.get_by_symbol(collateral).is_some());
            assert!(TOKEN_SETTINGS.get_by_symbol(debt).is_some());
        }
    }
}
