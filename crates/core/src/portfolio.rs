//! Token -> raw amount ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::settings;
use crate::error::StateError;

/// Raw (pre-interest-index) amounts keyed by token id.
///
/// Missing tokens read as zero. After every mutation, amounts whose magnitude
/// is below the token's rounding epsilon are snapped to exactly zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Portfolio {
    amounts: BTreeMap<String, Decimal>,
}

impl Portfolio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Portfolio holding one token.
    pub fn single(token: impl Into<String>, value: Decimal) -> Self {
        let mut portfolio = Self::new();
        portfolio.set_value(token, value);
        portfolio
    }

    /// Amount of `token`, zero if absent.
    pub fn get(&self, token: &str) -> Decimal {
        self.amounts.get(token).copied().unwrap_or(Decimal::ZERO)
    }

    /// Add `delta` to `token`, failing if the sum leaves the `Decimal` range.
    pub fn increase_value(&mut self, token: &str, delta: Decimal) -> Result<(), StateError> {
        let value = self
            .get(token)
            .checked_add(delta)
            .ok_or_else(|| StateError::overflow(format!("{token} balance")))?;
        self.amounts.insert(token.to_string(), round(token, value));
        Ok(())
    }

    /// Token-wise sum of two portfolios.
    ///
    /// Amounts are summed as stored, without snapping dust.
    pub fn merged(&self, other: &Portfolio) -> Result<Portfolio, StateError> {
        let mut sum = self.clone();
        for (token, amount) in other.iter() {
            let value = sum
                .get(token)
                .checked_add(amount)
                .ok_or_else(|| StateError::overflow(format!("{token} balance")))?;
            sum.amounts.insert(token.to_string(), value);
        }
        Ok(sum)
    }

    pub fn set_value(&mut self, token: impl Into<String>, value: Decimal) {
        let token = token.into();
        let value = round(&token, value);
        self.amounts.insert(token, value);
    }

    /// Every stored entry, zeros included.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Decimal)> + '_ {
        self.amounts.iter().map(|(token, amount)| (token.as_str(), *amount))
    }

    /// Entries with a strictly positive amount.
    pub fn positive(&self) -> impl Iterator<Item = (&str, Decimal)> + '_ {
        self.iter().filter(|(_, amount)| *amount > Decimal::ZERO)
    }

    pub fn has_positive(&self, token: &str) -> bool {
        self.get(token) > Decimal::ZERO
    }

    /// True if any amount is positive.
    pub fn has_any_positive(&self) -> bool {
        self.positive().next().is_some()
    }

    /// True if every amount is zero.
    pub fn is_zero(&self) -> bool {
        self.amounts.values().all(Decimal::is_zero)
    }

    pub fn tokens(&self) -> impl Iterator<Item = &str> + '_ {
        self.amounts.keys().map(String::as_str)
    }
}

fn round(token: &str, value: Decimal) -> Decimal {
    if value.abs() < settings().rounding.epsilon(token) {
        Decimal::ZERO
    } else {
        value
    }
}

/// Missing entries compare equal to zero entries.
impl PartialEq for Portfolio {
    fn eq(&self, other: &Self) -> bool {
        self.tokens()
            .chain(other.tokens())
            .all(|token| self.get(token) == other.get(token))
    }
}

impl FromIterator<(String, Decimal)> for Portfolio {
    fn from_iter<I: IntoIterator<Item = (String, Decimal)>>(iter: I) -> Self {
        let mut portfolio = Self::new();
        for (token, value) in iter {
            portfolio.set_value(token, value);
        }
        portfolio
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use derisk_chain::tokens::{DAI_V2, ETH, USDC};
    use rust_decimal_macros::dec;

    fn wei(value: u64) -> Decimal {
        Decimal::from(value) * Decimal::from(1_000_000_000u64) * Decimal::from(1_000_000_000u64)
    }

    #[test]
    fn test_missing_token_is_zero() {
        let portfolio = Portfolio::new();
        assert_eq!(portfolio.get(ETH.address), Decimal::ZERO);
        assert!(!portfolio.has_positive(ETH.address));
        assert!(portfolio.is_zero());
    }

    #[test]
    fn test_dust_rounds_to_zero() {
        let mut portfolio = Portfolio::new();
        portfolio.increase_value(ETH.address, wei(1)).unwrap();
        portfolio.increase_value(ETH.address, -wei(1) + dec!(1)).unwrap();
        assert_eq!(portfolio.get(ETH.address), Decimal::ZERO);

        portfolio.increase_value(USDC.address, dec!(1000000)).unwrap();
        portfolio.increase_value(USDC.address, dec!(-999999)).unwrap();
        assert_eq!(portfolio.get(USDC.address), Decimal::ZERO);

        // Above the USDC threshold survives.
        portfolio.set_value(USDC.address, dec!(20000));
        assert_eq!(portfolio.get(USDC.address), dec!(20000));
    }

    #[test]
    fn test_negative_dust_rounds_to_zero() {
        let mut portfolio = Portfolio::single(USDC.address, dec!(5000000));
        portfolio.increase_value(USDC.address, dec!(-5000001)).unwrap();
        assert_eq!(portfolio.get(USDC.address), Decimal::ZERO);
    }

    #[test]
    fn test_dai_v2_dust_rounds_to_zero() {
        let mut portfolio = Portfolio::new();
        portfolio.increase_value(DAI_V2.address, dec!(9000000000000000)).unwrap();
        assert_eq!(portfolio.get(DAI_V2.address), Decimal::ZERO);

        portfolio.increase_value(DAI_V2.address, dec!(20000000000000000)).unwrap();
        assert_eq!(portfolio.get(DAI_V2.address), dec!(20000000000000000));
    }

    #[test]
    fn test_overflow_is_an_error() {
        let mut portfolio = Portfolio::single(ETH.address, Decimal::MAX);
        assert!(matches!(
            portfolio.increase_value(ETH.address, Decimal::MAX),
            Err(StateError::InvariantViolation { .. })
        ));
        assert_eq!(portfolio.get(ETH.address), Decimal::MAX);

        let other = Portfolio::single(ETH.address, Decimal::ONE);
        assert!(portfolio.merged(&other).is_err());
    }

    #[test]
    fn test_symbol_keys_use_symbol_epsilon() {
        let portfolio = Portfolio::single("USDC", dec!(50000));
        assert_eq!(portfolio.get("USDC"), dec!(50000));
    }

    #[test]
    fn test_add_sums_matching_tokens() {
        let a = Portfolio::single(ETH.address, wei(2));
        let mut b = Portfolio::single(ETH.address, wei(3));
        b.set_value(USDC.address, dec!(1000000));

        let sum = a.merged(&b).unwrap();
        assert_eq!(sum.get(ETH.address), wei(5));
        assert_eq!(sum.get(USDC.address), dec!(1000000));
        assert_eq!(b.merged(&a).unwrap(), sum);
    }

    #[test]
    fn test_merge_keeps_dust() {
        let a = Portfolio::single(ETH.address, wei(1));
        let mut b = Portfolio::new();
        b.amounts.insert(ETH.address.to_string(), -wei(1) + dec!(1));

        let sum = a.merged(&b).unwrap();
        assert_eq!(sum.get(ETH.address), dec!(1));
    }

    #[test]
    fn test_equality_ignores_zero_entries() {
        let mut a = Portfolio::single(ETH.address, wei(1));
        a.set_value(USDC.address, Decimal::ZERO);
        let b = Portfolio::single(ETH.address, wei(1));
        assert_eq!(a, b);
        assert_ne!(a, Portfolio::new());
    }

    #[test]
    fn test_positive_filters() {
        let mut portfolio = Portfolio::single(ETH.address, wei(1));
        portfolio.set_value(USDC.address, Decimal::ZERO);
        let positive: Vec<&str> = portfolio.positive().map(|(token, _)| token).collect();
        assert_eq!(positive, vec![ETH.address]);
        assert!(portfolio.has_any_positive());
    }

    #[test]
    fn test_serializes_as_map() {
        let portfolio = Portfolio::single("ETH", dec!(1000000000000000000));
        let json = serde_json::to_string(&portfolio).unwrap();
        assert_eq!(json, r#"{"ETH":"1000000000000000000"}"#);
        let parsed: Portfolio = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, portfolio);
    }
}
