//! Loan entities and their USD valuation.
//!
//! A loan entity is one user (zkLend, Nostra) or one loan (Hashstack) with a
//! collateral and a debt [`Portfolio`] plus protocol-specific sub-ledgers.
//! Valuation divides raw amounts by the token's decimal factor, applies the
//! interest index and, when risk-adjusting, the collateral or debt factor.

use derisk_api::Prices;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{checked, StateError};
use crate::interest_rate::InterestRateModel;
use crate::portfolio::Portfolio;
use crate::token_parameters::TokenParameters;

/// Read access shared by every loan entity.
pub trait LoanEntity {
    fn user(&self) -> &str;
    fn collateral(&self) -> &Portfolio;
    fn debt(&self) -> &Portfolio;

    fn has_collateral(&self) -> bool {
        self.collateral().has_any_positive()
    }

    fn has_debt(&self) -> bool {
        self.debt().has_any_positive()
    }
}

/// zkLend user. Only deposits with collateral enabled count as collateral.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZkLendLoanEntity {
    pub user: String,
    pub deposit: Portfolio,
    pub collateral: Portfolio,
    pub debt: Portfolio,
    pub collateral_enabled: BTreeMap<String, bool>,
}

impl ZkLendLoanEntity {
    pub fn is_collateral_enabled(&self, token: &str) -> bool {
        self.collateral_enabled.get(token).copied().unwrap_or(false)
    }
}

impl LoanEntity for ZkLendLoanEntity {
    fn user(&self) -> &str {
        &self.user
    }
    fn collateral(&self) -> &Portfolio {
        &self.collateral
    }
    fn debt(&self) -> &Portfolio {
        &self.debt
    }
}

/// Nostra user. Collateral is the sum of both collateral sub-ledgers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NostraLoanEntity {
    pub user: String,
    pub non_interest_bearing_collateral: Portfolio,
    pub interest_bearing_collateral: Portfolio,
    pub collateral: Portfolio,
    pub debt: Portfolio,
}

impl NostraLoanEntity {
    /// Rebuild `collateral` from the sub-ledgers.
    pub fn recompute_collateral(&mut self) -> Result<(), StateError> {
        self.collateral = self
            .non_interest_bearing_collateral
            .merged(&self.interest_bearing_collateral)?;
        Ok(())
    }
}

impl LoanEntity for NostraLoanEntity {
    fn user(&self) -> &str {
        &self.user
    }
    fn collateral(&self) -> &Portfolio {
        &self.collateral
    }
    fn debt(&self) -> &Portfolio {
        &self.debt
    }
}

/// Hashstack loan. Collateral is original plus borrowed collateral.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HashstackLoanEntity {
    pub user: String,
    /// V0 only; decides the liquidation threshold
    pub debt_category: Option<u64>,
    pub original_collateral: Portfolio,
    /// Borrowed funds still held by the protocol
    pub borrowed_collateral: Portfolio,
    pub collateral: Portfolio,
    pub debt: Portfolio,
}

impl HashstackLoanEntity {
    pub fn recompute_collateral(&mut self) -> Result<(), StateError> {
        self.collateral = self.original_collateral.merged(&self.borrowed_collateral)?;
        Ok(())
    }
}

impl LoanEntity for HashstackLoanEntity {
    fn user(&self) -> &str {
        &self.user
    }
    fn collateral(&self) -> &Portfolio {
        &self.collateral
    }
    fn debt(&self) -> &Portfolio {
        &self.debt
    }
}

/// Protocol-independent view of one loan entity.
#[derive(Debug, Clone, Copy)]
pub struct EntityView<'a> {
    /// User address, or loan id for Hashstack
    pub id: &'a str,
    pub user: &'a str,
    pub debt_category: Option<u64>,
    pub collateral: &'a Portfolio,
    pub debt: &'a Portfolio,
}

impl<'a> EntityView<'a> {
    pub fn new(id: &'a str, entity: &'a impl LoanEntity) -> Self {
        Self {
            id,
            user: entity.user(),
            debt_category: None,
            collateral: entity.collateral(),
            debt: entity.debt(),
        }
    }

    pub fn with_debt_category(mut self, debt_category: Option<u64>) -> Self {
        self.debt_category = debt_category;
        self
    }

    pub fn has_collateral(&self) -> bool {
        self.collateral.has_any_positive()
    }

    pub fn has_debt(&self) -> bool {
        self.debt.has_any_positive()
    }
}

/// One entity as stored in the checkpoint table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanEntityRecord {
    pub entity_id: String,
    pub user: String,
    #[serde(default)]
    pub debt_category: Option<u64>,
    /// Sub-ledger name -> portfolio
    pub ledgers: BTreeMap<String, Portfolio>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub collateral_enabled: BTreeMap<String, bool>,
}

impl LoanEntityRecord {
    fn ledger(&self, name: &str) -> Portfolio {
        self.ledgers.get(name).cloned().unwrap_or_default()
    }
}

impl ZkLendLoanEntity {
    pub fn to_record(&self, entity_id: &str) -> LoanEntityRecord {
        LoanEntityRecord {
            entity_id: entity_id.to_string(),
            user: self.user.clone(),
            debt_category: None,
            ledgers: BTreeMap::from([
                ("deposit".to_string(), self.deposit.clone()),
                ("collateral".to_string(), self.collateral.clone()),
                ("debt".to_string(), self.debt.clone()),
            ]),
            collateral_enabled: self.collateral_enabled.clone(),
        }
    }

    pub fn from_record(record: &LoanEntityRecord) -> Self {
        Self {
            user: record.user.clone(),
            deposit: record.ledger("deposit"),
            collateral: record.ledger("collateral"),
            debt: record.ledger("debt"),
            collateral_enabled: record.collateral_enabled.clone(),
        }
    }
}

impl NostraLoanEntity {
    pub fn to_record(&self, entity_id: &str) -> LoanEntityRecord {
        LoanEntityRecord {
            entity_id: entity_id.to_string(),
            user: self.user.clone(),
            debt_category: None,
            ledgers: BTreeMap::from([
                (
                    "non_interest_bearing_collateral".to_string(),
                    self.non_interest_bearing_collateral.clone(),
                ),
                (
                    "interest_bearing_collateral".to_string(),
                    self.interest_bearing_collateral.clone(),
                ),
                ("debt".to_string(), self.debt.clone()),
            ]),
            collateral_enabled: BTreeMap::new(),
        }
    }

    pub fn from_record(record: &LoanEntityRecord) -> Result<Self, StateError> {
        let mut entity = Self {
            user: record.user.clone(),
            non_interest_bearing_collateral: record.ledger("non_interest_bearing_collateral"),
            interest_bearing_collateral: record.ledger("interest_bearing_collateral"),
            collateral: Portfolio::new(),
            debt: record.ledger("debt"),
        };
        entity.recompute_collateral()?;
        Ok(entity)
    }
}

impl HashstackLoanEntity {
    pub fn to_record(&self, entity_id: &str) -> LoanEntityRecord {
        LoanEntityRecord {
            entity_id: entity_id.to_string(),
            user: self.user.clone(),
            debt_category: self.debt_category,
            ledgers: BTreeMap::from([
                ("original_collateral".to_string(), self.original_collateral.clone()),
                ("borrowed_collateral".to_string(), self.borrowed_collateral.clone()),
                ("debt".to_string(), self.debt.clone()),
            ]),
            collateral_enabled: BTreeMap::new(),
        }
    }

    pub fn from_record(record: &LoanEntityRecord) -> Result<Self, StateError> {
        let mut entity = Self {
            user: record.user.clone(),
            debt_category: record.debt_category,
            original_collateral: record.ledger("original_collateral"),
            borrowed_collateral: record.ledger("borrowed_collateral"),
            collateral: Portfolio::new(),
            debt: record.ledger("debt"),
        };
        entity.recompute_collateral()?;
        Ok(entity)
    }
}

/// USD price of an underlying token.
pub fn price_of(prices: &Prices, underlying_address: &str) -> Result<Decimal, StateError> {
    prices
        .get(underlying_address)
        .copied()
        .ok_or_else(|| StateError::MissingPrice {
            token: underlying_address.to_string(),
        })
}

/// USD value of a collateral portfolio, optionally times collateral factors.
pub fn compute_collateral_usd(
    collateral: &Portfolio,
    parameters: &TokenParameters,
    model: &InterestRateModel,
    prices: &Prices,
    risk_adjusted: bool,
) -> Result<Decimal, StateError> {
    let mut total = Decimal::ZERO;
    for (token, amount) in collateral.iter() {
        if amount.is_zero() {
            continue;
        }
        let token_parameters = parameters.collateral(token)?;
        if token_parameters.unpriced {
            continue;
        }
        let usd = face_value_usd(
            amount,
            token_parameters.decimal_factor(),
            model.get(token),
            price_of(prices, &token_parameters.underlying_address)?,
        )?;
        let usd = if risk_adjusted {
            checked(usd.checked_mul(token_parameters.collateral_factor()?), "collateral USD")?
        } else {
            usd
        };
        total = checked(total.checked_add(usd), "collateral USD")?;
    }
    Ok(total)
}

/// USD value of a debt portfolio, optionally divided by debt factors.
pub fn compute_debt_usd(
    debt: &Portfolio,
    parameters: &TokenParameters,
    model: &InterestRateModel,
    prices: &Prices,
    risk_adjusted: bool,
) -> Result<Decimal, StateError> {
    let mut total = Decimal::ZERO;
    for (token, amount) in debt.iter() {
        if amount.is_zero() {
            continue;
        }
        let token_parameters = parameters.debt(token)?;
        let usd = face_value_usd(
            amount,
            token_parameters.decimal_factor(),
            model.get(token),
            price_of(prices, &token_parameters.underlying_address)?,
        )?;
        let usd = if risk_adjusted {
            checked(usd.checked_div(token_parameters.debt_factor()?), "debt USD")?
        } else {
            usd
        };
        total = checked(total.checked_add(usd), "debt USD")?;
    }
    Ok(total)
}

/// `raw / decimal_factor * index * price`.
pub fn face_value_usd(
    raw: Decimal,
    decimal_factor: Decimal,
    index: Decimal,
    price: Decimal,
) -> Result<Decimal, StateError> {
    let usd = raw
        .checked_div(decimal_factor)
        .and_then(|face| face.checked_mul(index))
        .and_then(|face| face.checked_mul(price));
    checked(usd, "token USD value")
}

/// `collateral_usd / debt_usd`; `Decimal::MAX` without debt or when the
/// ratio exceeds the `Decimal` range.
pub fn health_factor(collateral_usd: Decimal, debt_usd: Decimal) -> Decimal {
    if debt_usd.is_zero() {
        Decimal::MAX
    } else {
        collateral_usd.checked_div(debt_usd).unwrap_or(Decimal::MAX)
    }
}

/// Whether the portfolio holds a positive amount of a collateral token backed
/// by `underlying_address`.
pub fn has_positive_collateral_with_underlying(
    portfolio: &Portfolio,
    parameters: &TokenParameters,
    underlying_address: &str,
) -> bool {
    portfolio.positive().any(|(token, _)| {
        parameters
            .collateral
            .get(token)
            .is_some_and(|p| p.underlying_address == underlying_address)
    })
}

/// Whether the portfolio holds a positive amount of a debt token backed by
/// `underlying_address`.
pub fn has_positive_debt_with_underlying(
    portfolio: &Portfolio,
    parameters: &TokenParameters,
    underlying_address: &str,
) -> bool {
    portfolio.positive().any(|(token, _)| {
        parameters
            .debt
            .get(token)
            .is_some_and(|p| p.underlying_address == underlying_address)
    })
}

/// `"<token>: <face amount>"` per positive entry, joined by `", "`.
///
/// Tokens are shown by symbol and amounts are rounded to 4 decimal places.
pub fn format_breakdown(
    portfolio: &Portfolio,
    model: &InterestRateModel,
    decimals: impl Fn(&str) -> Option<(String, Decimal)>,
) -> String {
    portfolio
        .positive()
        .map(|(token, amount)| match decimals(token) {
            Some((symbol, factor)) => {
                format!("{symbol}: {}", (amount / factor * model.get(token)).round_dp(4))
            }
            None => format!("{token}: {}", amount.round_dp(4)),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
