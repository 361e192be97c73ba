//! Hashstack V0 events.
//!
//! Hashstack events carry the full post-event loan and collateral records,
//! so decoded amounts are final face amounts rather than deltas. Token fields
//! are resolved to underlying token symbols.

use rust_decimal::Decimal;

use crate::error::DecodeError;
use crate::events::RawEvent;
use crate::tokens::TOKEN_SETTINGS;

/// Hashstack V0 router contract.
pub const HASHSTACK_V0_ADDRESS: &str =
    "0x03dcf5c72ba60eb7b2fe151032769d49dd3df6b04fa3141dffd6e2aa162b7a6e";

/// Loan record embedded in V0 events.
///
/// Layout from `offset`: `id`, `owner`, `market`, `commitment`, `amount`, ``,
/// `current_market`, `current_amount`, ``, `is_loan_withdrawn`,
/// `debt_category`, `state`, `l3_integration`, `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRecord {
    pub loan_id: u64,
    pub owner: String,
    /// Borrowed token
    pub market: String,
    /// Outstanding debt (face)
    pub amount: Decimal,
    /// Token the borrowed funds currently sit in
    pub current_market: String,
    pub current_amount: Decimal,
    pub debt_category: u64,
}

/// Fields in one V0 loan record.
pub(crate) const LOAN_RECORD_LEN: usize = 14;

impl LoanRecord {
    fn decode(event: &RawEvent, offset: usize) -> Result<Self, DecodeError> {
        Ok(Self {
            loan_id: event.id(offset)?,
            owner: event.address(offset + 1)?,
            market: symbol(event, offset + 2)?,
            amount: event.amount(offset + 4)?,
            current_market: symbol(event, offset + 6)?,
            current_amount: event.amount(offset + 7)?,
            debt_category: event.id(offset + 10)?,
        })
    }
}

/// Resolve the token address at `index` to its symbol.
pub(crate) fn symbol(event: &RawEvent, index: usize) -> Result<String, DecodeError> {
    let address = event.field(index)?;
    TOKEN_SETTINGS
        .symbol(address)
        .map(str::to_string)
        .ok_or_else(|| DecodeError::UnknownToken {
            address: address.to_string(),
        })
}

/// Decoded Hashstack V0 event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashstackV0Event {
    NewLoan {
        loan: LoanRecord,
        collateral_token: String,
        collateral_amount: Decimal,
    },
    /// Collateral record after a top-up
    CollateralAdded {
        loan_id: u64,
        token: String,
        amount: Decimal,
    },
    CollateralWithdrawal {
        loan_id: u64,
        token: String,
        amount: Decimal,
    },
    LoanWithdrawal {
        loan: LoanRecord,
    },
    LoanRepaid {
        loan: LoanRecord,
    },
    LoanSwap {
        old: LoanRecord,
        new: LoanRecord,
    },
    LoanInterestDeducted {
        loan_id: u64,
        token: String,
        amount: Decimal,
    },
    Liquidated {
        loan: LoanRecord,
    },
}

impl HashstackV0Event {
    /// Decode a raw event.
    pub fn decode(event: &RawEvent) -> Result<Self, DecodeError> {
        let decoded = match event.key_name.as_str() {
            // [loan_record], [collateral] `market`, `amount`, ``, `current_amount`, ...
            "new_loan" => {
                let loan = LoanRecord::decode(event, 0)?;
                // Several early loans carry a shorter record.
                let (collateral_token, collateral_amount) =
                    match (symbol(event, 14), event.amount(17)) {
                        (Ok(token), Ok(amount)) => (token, amount),
                        _ => (symbol(event, 13)?, event.amount(16)?),
                    };
                Self::NewLoan {
                    loan,
                    collateral_token,
                    collateral_amount,
                }
            }
            // [collateral_record] `market`, `amount`, ``, `current_amount`, ..., [loan_id] at 9
            "collateral_added" => Self::CollateralAdded {
                loan_id: event.id(9)?,
                token: symbol(event, 0)?,
                amount: event.amount(3)?,
            },
            "collateral_withdrawal" => Self::CollateralWithdrawal {
                loan_id: event.id(9)?,
                token: symbol(event, 0)?,
                amount: event.amount(3)?,
            },
            // [collateral_record], [accrued_interest], ``, [loan_id] at 11
            "loan_interest_deducted" => Self::LoanInterestDeducted {
                loan_id: event.id(11)?,
                token: symbol(event, 0)?,
                amount: event.amount(3)?,
            },
            "loan_withdrawal" => Self::LoanWithdrawal {
                loan: LoanRecord::decode(event, 0)?,
            },
            "loan_repaid" => Self::LoanRepaid {
                loan: LoanRecord::decode(event, 0)?,
            },
            "liquidated" => Self::Liquidated {
                loan: LoanRecord::decode(event, 0)?,
            },
            "loan_swap" => Self::LoanSwap {
                old: LoanRecord::decode(event, 0)?,
                new: LoanRecord::decode(event, LOAN_RECORD_LEN)?,
            },
            _ => {
                return Err(DecodeError::UnknownEvent {
                    key_name: event.key_name.clone(),
                })
            }
        };
        Ok(decoded)
    }

    /// Loan the event refers to.
    pub fn loan_id(&self) -> u64 {
        match self {
            Self::NewLoan { loan, .. }
            | Self::LoanWithdrawal { loan }
            | Self::LoanRepaid { loan }
            | Self::Liquidated { loan } => loan.loan_id,
            Self::LoanSwap { new, .. } => new.loan_id,
            Self::CollateralAdded { loan_id, .. }
            | Self::CollateralWithdrawal { loan_id, .. }
            | Self::LoanInterestDeducted { loan_id, .. } => *loan_id,
        }
    }
}

pub(crate) fn event_order(key_name: &str) -> Option<u8> {
    match key_name {
        "new_loan" => Some(0),
        "loan_swap" => Some(1),
        "liquidated" => Some(2),
        "loan_withdrawal" => Some(3),
        "loan_repaid" => Some(4),
        "loan_interest_deducted" => Some(5),
        "collateral_added" => Some(6),
        "collateral_withdrawal" => Some(7),
        _ => None,
    }
}
