//! Hashstack V1 events and the rToken/dToken/pool address table.
//!
//! V1 loans can be spent into AMM liquidity, so token fields resolve through
//! [`HASHSTACK_V1_ADDRESSES`] (rTokens, dTokens, pool tokens) before falling
//! back to the underlying token registry.

use rust_decimal::Decimal;

use crate::error::DecodeError;
use crate::events::RawEvent;
use crate::felt::add_leading_zeros;
use crate::tokens::{TokenSettings, TOKEN_SETTINGS};

/// Hashstack V1 rTokens, dTokens and AMM pool tokens as `(address, symbol)`.
pub const HASHSTACK_V1_ADDRESSES: &[(&str, &str)] = &[
    // rTokens
    ("0x00436d8d078de345c11493bd91512eae60cd2713e05bcaa0bb9f0cba90358c6e", "ETH"),
    ("0x03bcecd40212e9b91d92bbe25bb3643ad93f0d230d93237c675f46fac5187e8c", "USDC"),
    ("0x05fa6cc6185eab4b0264a4134e2d4e74be11205351c7c91196cb27d5d97f8d21", "USDT"),
    ("0x019c981ec23aa9cbac1cc1eb7f92cf09ea2816db9cbd932e251c86a2e8fb725f", "DAI"),
    ("0x01320a9910e78afc18be65e4080b51ecc0ee5c0a8b6cc7ef4e685e02b50e57ef", "WBTC"),
    // dTokens
    ("0x01ef7f9f8bf01678dc6d27e2c26fb7e8eac3812a24752e6a1d6a49d153bec9f3", "ETH"),
    ("0x021d8d8519f5464ec63c6b9a80a5229c5ddeed57ecded4c8a9dfc34e31b49990", "USDC"),
    ("0x012b8185e237dd0340340faeb3351dbe53f8a42f5a9bf974ddf90ced56e301c7", "USDT"),
    ("0x07eeed99c095f83716e465e2c52a3ec8f47b323041ddc4f97778ac0393b7f358", "DAI"),
    ("0x02614c784267d2026042ab98588f90efbffaade8982567e93530db4ed41201cf", "WBTC"),
];

/// AMM pool tokens a V1 loan can be spent into.
pub const HASHSTACK_V1_POOL_TOKENS: &[TokenSettings] = &[
    TokenSettings::new("JediSwap: DAI/ETH Pool", 18, "0x07e2a13b40fc1119ec55e0bcf9428eedaa581ab3c924561ad4e955f95da63138"),
    TokenSettings::new("JediSwap: DAI/USDC Pool", 18, "0x00cfd39f5244f7b617418c018204a8a9f9a7f72e71f0ef38f968eeb2a9ca302b"),
    TokenSettings::new("JediSwap: DAI/USDT Pool", 18, "0x00f0f5b3eed258344152e1f17baf84a2e1b621cd754b625bec169e8595aea767"),
    TokenSettings::new("JediSwap: ETH/USDC Pool", 18, "0x04d0390b777b424e43839cd1e744799f3de6c176c7e32c1812a41dbd9c19db6a"),
    TokenSettings::new("JediSwap: ETH/USDT Pool", 18, "0x045e7131d776dddc137e30bdd490b431c7144677e97bf9369f629ed8d3fb7dd6"),
    TokenSettings::new("JediSwap: USDC/USDT Pool", 18, "0x05801bdad32f343035fb242e98d1e9371ae85bc1543962fedea16c59b35bd19b"),
    TokenSettings::new("JediSwap: WBTC/ETH Pool", 18, "0x0260e98362e0949fefff8b4de85367c035e44f734c9f8069b6ce2075ae86b45c"),
    TokenSettings::new("JediSwap: WBTC/USDC Pool", 18, "0x005a8054e5ca0b277b295a830e53bd71a6a6943b42d0dbb22329437522bc80c8"),
    TokenSettings::new("JediSwap: WBTC/USDT Pool", 18, "0x044d13ad98a46fd2322ef2637e5e4c292ce8822f47b7cb9a1d581176a801c1a0"),
    TokenSettings::new("mySwap: DAI/ETH Pool", 18, "0x07c662b10f409d7a0a69c8da79b397fd91187ca5f6230ed30effef2dceddc5b3"),
    TokenSettings::new("mySwap: DAI/USDC Pool", 12, "0x0611e8f4f3badf1737b9e8f0ca77dd2f6b46a1d33ce4eed951c6b18ac497d505"),
    TokenSettings::new("mySwap: ETH/USDC Pool", 12, "0x022b05f9396d2c48183f6deaf138a57522bcc8b35b67dee919f76403d1783136"),
    TokenSettings::new("mySwap: ETH/USDT Pool", 12, "0x041f9a1e9a4d924273f5a5c0c138d52d66d2e6a8bee17412c6b0f48fe059ae04"),
    TokenSettings::new("mySwap: USDC/USDT Pool", 6, "0x01ea237607b7d9d2e9997aa373795929807552503683e35d8739f4dc46652de1"),
    TokenSettings::new("mySwap: WBTC/USDC Pool", 7, "0x025b392609604c75d62dde3d6ae98e124a31b49123b8366d7ce0066ccb94f696"),
];

/// Symbol for a V1 token address: rToken/dToken, pool token or underlying.
pub fn resolve_token_symbol(address: &str) -> Result<String, DecodeError> {
    let unknown = || DecodeError::UnknownToken {
        address: address.to_string(),
    };
    let normalised = add_leading_zeros(address).map_err(|_| unknown())?;

    HASHSTACK_V1_ADDRESSES
        .iter()
        .find(|(candidate, _)| *candidate == normalised)
        .map(|(_, symbol)| *symbol)
        .or_else(|| {
            HASHSTACK_V1_POOL_TOKENS
                .iter()
                .find(|token| token.address == normalised)
                .map(|token| token.symbol)
        })
        .or_else(|| TOKEN_SETTINGS.symbol(&normalised))
        .map(str::to_string)
        .ok_or_else(unknown)
}

fn symbol(event: &RawEvent, index: usize) -> Result<String, DecodeError> {
    resolve_token_symbol(event.field(index)?)
}

/// Loan record embedded in V1 events.
///
/// Layout from `offset`: `loan_id`, `borrower`, `market`, `amount`, ``,
/// `current_market`, `current_amount`, ``, `state`, `l3_integration`,
/// `l3_category`, `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRecordV1 {
    pub loan_id: u64,
    pub borrower: String,
    pub market: String,
    pub amount: Decimal,
    pub current_market: String,
    pub current_amount: Decimal,
}

const LOAN_RECORD_LEN: usize = 12;

impl LoanRecordV1 {
    fn decode(event: &RawEvent, offset: usize) -> Result<Self, DecodeError> {
        Ok(Self {
            loan_id: event.id(offset)?,
            borrower: event.address(offset + 1)?,
            market: symbol(event, offset + 2)?,
            amount: event.amount(offset + 3)?,
            current_market: symbol(event, offset + 5)?,
            current_amount: event.amount(offset + 6)?,
        })
    }
}

/// Collateral record: `loan_id`, `collateral_token`, `amount`, ``, `created_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollateralRecordV1 {
    pub loan_id: u64,
    pub token: String,
    pub amount: Decimal,
}

impl CollateralRecordV1 {
    fn decode(event: &RawEvent, offset: usize) -> Result<Self, DecodeError> {
        Ok(Self {
            loan_id: event.id(offset)?,
            token: symbol(event, offset + 1)?,
            amount: event.amount(offset + 2)?,
        })
    }
}

/// Decoded Hashstack V1 event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HashstackV1Event {
    NewLoan {
        loan: LoanRecordV1,
        collateral: CollateralRecordV1,
    },
    CollateralAdded {
        collateral: CollateralRecordV1,
    },
    /// Borrowed funds were moved into another token
    LoanSpent {
        old: LoanRecordV1,
        new: LoanRecordV1,
    },
    LoanTransferred {
        loan_id: u64,
        sender: String,
        receiver: String,
    },
    LoanRepaid {
        old: LoanRecordV1,
        new: LoanRecordV1,
        collateral: CollateralRecordV1,
    },
}

impl HashstackV1Event {
    /// Decode a raw event.
    pub fn decode(event: &RawEvent) -> Result<Self, DecodeError> {
        let decoded = match event.key_name.as_str() {
            "new_loan" => Self::NewLoan {
                loan: LoanRecordV1::decode(event, 0)?,
                collateral: CollateralRecordV1::decode(event, LOAN_RECORD_LEN)?,
            },
            "collateral_added" => Self::CollateralAdded {
                collateral: CollateralRecordV1::decode(event, 0)?,
            },
            "loan_spent" => Self::LoanSpent {
                old: LoanRecordV1::decode(event, 0)?,
                new: LoanRecordV1::decode(event, LOAN_RECORD_LEN)?,
            },
            "loan_transferred" => Self::LoanTransferred {
                loan_id: event.id(0)?,
                sender: event.address(1)?,
                receiver: event.address(2)?,
            },
            "loan_repaid" => Self::LoanRepaid {
                old: LoanRecordV1::decode(event, 0)?,
                new: LoanRecordV1::decode(event, LOAN_RECORD_LEN)?,
                collateral: CollateralRecordV1::decode(event, 2 * LOAN_RECORD_LEN)?,
            },
            _ => {
                return Err(DecodeError::UnknownEvent {
                    key_name: event.key_name.clone(),
                })
            }
        };
        Ok(decoded)
    }
}

/// `loan_repaid` goes after the other loan-altering events of the block.
pub(crate) fn event_order(key_name: &str) -> Option<u8> {
    match key_name {
        "new_loan" => Some(0),
        "loan_transferred" => Some(1),
        "loan_spent" => Some(2),
        "loan_repaid" => Some(3),
        "collateral_added" => Some(4),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::ETH;
    use rust_decimal_macros::dec;

    #[test]
    fn test_resolve_token_symbol() {
        assert_eq!(
            resolve_token_symbol("0x436d8d078de345c11493bd91512eae60cd2713e05bcaa0bb9f0cba90358c6e").unwrap(),
            "ETH"
        );
        assert_eq!(
            resolve_token_symbol("0x022b05f9396d2c48183f6deaf138a57522bcc8b35b67dee919f76403d1783136").unwrap(),
            "mySwap: ETH/USDC Pool"
        );
        assert_eq!(resolve_token_symbol(ETH.address).unwrap(), "ETH");
        assert!(matches!(
            resolve_token_symbol("0x42"),
            Err(DecodeError::UnknownToken { .. })
        ));
    }

    #[test]
    fn test_decode_new_loan() {
        let mut data = vec!["0x0".to_string(); 17];
        data[0] = "0x3".into();
        data[1] = "0xbeef".into();
        data[2] = HASHSTACK_V1_ADDRESSES[6].0.into(); // dUSDC
        data[3] = "0x3e8".into();
        data[5] = ETH.address.into();
        data[6] = "0x2".into();
        data[12] = "0x3".into();
        data[13] = HASHSTACK_V1_ADDRESSES[0].0.into(); // rETH
        data[14] = "0x1".into();
        let event = RawEvent::new(1, "new_loan", data, "0x1");

        match HashstackV1Event::decode(&event).unwrap() {
            HashstackV1Event::NewLoan { loan, collateral } => {
                assert_eq!(loan.loan_id, 3);
                assert_eq!(loan.market, "USDC");
                assert_eq!(loan.amount, dec!(1000));
                assert_eq!(loan.current_market, "ETH");
                assert_eq!(collateral.loan_id, 3);
                assert_eq!(collateral.token, "ETH");
                assert_eq!(collateral.amount, dec!(1));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_loan_transferred() {
        let event = RawEvent::new(
            1,
            "loan_transferred",
            vec!["0x3".into(), "0xa".into(), "0xb".into()],
            "0x1",
        );
        match HashstackV1Event::decode(&event).unwrap() {
            HashstackV1Event::LoanTransferred { loan_id, receiver, .. } => {
                assert_eq!(loan_id, 3);
                assert!(receiver.ends_with('b'));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
