//! zkLend market events.

use rust_decimal::Decimal;

use crate::error::DecodeError;
use crate::events::RawEvent;
use crate::felt::RAY_SCALE;

/// zkLend market contract.
pub const ZKLEND_MARKET_ADDRESS: &str =
    "0x04c0a5193d58f74fbace4b74dcf65481e734ed1714121bdc571da345540efa05";

const NAMESPACE: &str = "zklend::market::Market::";

/// Decoded zkLend market event. Token fields are underlying token addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZkLendEvent {
    /// Interest accumulators were refreshed
    AccumulatorsSync {
        token: String,
        lending_accumulator: Decimal,
        debt_accumulator: Decimal,
    },
    Deposit {
        user: String,
        token: String,
        face_amount: Decimal,
    },
    Withdrawal {
        user: String,
        token: String,
        face_amount: Decimal,
    },
    CollateralEnabled {
        user: String,
        token: String,
    },
    CollateralDisabled {
        user: String,
        token: String,
    },
    Borrowing {
        user: String,
        token: String,
        raw_amount: Decimal,
        face_amount: Decimal,
    },
    Repayment {
        repayer: String,
        beneficiary: String,
        token: String,
        raw_amount: Decimal,
        face_amount: Decimal,
    },
    Liquidation {
        liquidator: String,
        user: String,
        debt_token: String,
        debt_raw_amount: Decimal,
        debt_face_amount: Decimal,
        collateral_token: String,
        collateral_amount: Decimal,
    },
}

impl ZkLendEvent {
    /// Decode a raw market event.
    pub fn decode(event: &RawEvent) -> Result<Self, DecodeError> {
        let name = event
            .key_name
            .strip_prefix(NAMESPACE)
            .unwrap_or(&event.key_name);

        let decoded = match name {
            // `token`, `lending_accumulator`, `debt_accumulator`
            "AccumulatorsSync" => Self::AccumulatorsSync {
                token: event.address(0)?,
                lending_accumulator: event.scaled(1, RAY_SCALE)?,
                debt_accumulator: event.scaled(2, RAY_SCALE)?,
            },
            // `user`, `token`, `face_amount`
            "Deposit" => Self::Deposit {
                user: event.address(0)?,
                token: event.address(1)?,
                face_amount: event.amount(2)?,
            },
            "Withdrawal" => Self::Withdrawal {
                user: event.address(0)?,
                token: event.address(1)?,
                face_amount: event.amount(2)?,
            },
            // `user`, `token`
            "CollateralEnabled" => Self::CollateralEnabled {
                user: event.address(0)?,
                token: event.address(1)?,
            },
            "CollateralDisabled" => Self::CollateralDisabled {
                user: event.address(0)?,
                token: event.address(1)?,
            },
            // `user`, `token`, `raw_amount`, `face_amount`
            "Borrowing" => Self::Borrowing {
                user: event.address(0)?,
                token: event.address(1)?,
                raw_amount: event.amount(2)?,
                face_amount: event.amount(3)?,
            },
            // `repayer`, `beneficiary`, `token`, `raw_amount`, `face_amount`
            "Repayment" => Self::Repayment {
                repayer: event.address(0)?,
                beneficiary: event.address(1)?,
                token: event.address(2)?,
                raw_amount: event.amount(3)?,
                face_amount: event.amount(4)?,
            },
            // `liquidator`, `user`, `debt_token`, `debt_raw_amount`, `debt_face_amount`,
            // `collateral_token`, `collateral_amount`
            "Liquidation" => Self::Liquidation {
                liquidator: event.address(0)?,
                user: event.address(1)?,
                debt_token: event.address(2)?,
                debt_raw_amount: event.amount(3)?,
                debt_face_amount: event.amount(4)?,
                collateral_token: event.address(5)?,
                collateral_amount: event.amount(6)?,
            },
            _ => {
                return Err(DecodeError::UnknownEvent {
                    key_name: event.key_name.clone(),
                })
            }
        };
        Ok(decoded)
    }

    /// The user whose position the event changes, if any.
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::AccumulatorsSync { .. } => None,
            Self::Deposit { user, .. }
            | Self::Withdrawal { user, .. }
            | Self::CollateralEnabled { user, .. }
            | Self::CollateralDisabled { user, .. }
            | Self::Borrowing { user, .. }
            | Self::Liquidation { user, .. } => Some(user),
            Self::Repayment { beneficiary, .. } => Some(beneficiary),
        }
    }
}

/// Accumulator updates go first so that same-transaction deposits use them.
pub(crate) fn event_order(key_name: &str) -> Option<u8> {
    match key_name.strip_prefix(NAMESPACE).unwrap_or(key_name) {
        "AccumulatorsSync" => Some(0),
        "Deposit" | "Withdrawal" | "CollateralEnabled" | "CollateralDisabled" | "Borrowing"
        | "Repayment" | "Liquidation" => Some(1),
        _ => None,
    }
}
