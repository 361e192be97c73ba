//! Nostra (Alpha and Mainnet) events and contract addresses.
//!
//! Positions live in Nostra's own tokens: `d*` debt tokens, `n*-c`
//! non-interest-bearing collateral tokens and `i*-c` interest-bearing
//! collateral tokens. Every token emits Mint/Burn (and, on Alpha, Transfer);
//! the interest rate model emits `InterestStateUpdated`.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::events::RawEvent;
use crate::felt::WAD_SCALE;

pub const NOSTRA_ALPHA_INTEREST_RATE_MODEL_ADDRESS: &str =
    "0x03d39f7248fb2bfb960275746470f7fb470317350ad8656249ec66067559e892";

pub const NOSTRA_ALPHA_CDP_MANAGER_ADDRESS: &str =
    "0x06d272e18e66289eeb874d0206a23afba148ef35f250accfdfdca085a478aec0";

/// Its first event is a withdrawal; its loan state changes are ignored.
pub const NOSTRA_ALPHA_DEFERRED_BATCH_CALL_ADAPTER_ADDRESS: &str =
    "0x05a0042fa9bb87ed72fbee4d5a2da416528ebc84a569081ad02e9ad60b0af7d7";

/// Alpha collateral and debt tokens as `(symbol, address)`.
pub const NOSTRA_ALPHA_TOKEN_ADDRESSES: &[(&str, &str)] = &[
    ("iWBTC-c", "0x00687b5d9e591844169bc6ad7d7256c4867a10cee6599625b9d78ea17a7caef9"),
    ("nWBTC-c", "0x06b59e2a746e141f90ec8b6e88e695265567ab3bdcf27059b4a15c89b0b7bd53"),
    ("dWBTC", "0x075b0d87aca8dee25df35cdc39a82b406168fa23a76fc3f03abbfdc6620bb6d7"),
    ("iETH-c", "0x070f8a4fcd75190661ca09a7300b7c93fab93971b67ea712c664d7948a8a54c6"),
    ("nETH-c", "0x0553cea5d1dc0e0157ffcd36a51a0ced717efdadd5ef1b4644352bb45bd35453"),
    ("dETH", "0x040b091cb020d91f4a4b34396946b4d4e2a450dbd9410432ebdbfe10e55ee5e5"),
    ("iUSDC-c", "0x029959a546dda754dc823a7b8aa65862c5825faeaaf7938741d8ca6bfdc69e4e"),
    ("nUSDC-c", "0x047e794d7c49c49fd2104a724cfa69a92c5a4b50a5753163802617394e973833"),
    ("dUSDC", "0x03b6058a9f6029b519bc72b2cc31bcb93ca704d0ab79fec2ae5d43f79ac07f7a"),
    ("iDAI-c", "0x01ac55cabf2b79cf39b17ba0b43540a64205781c4b7850e881014aea6f89be58"),
    ("nDAI-c", "0x04403e420521e7a4ca0dc5192af81ca0bb36de343564a9495e11c8d9ba6e9d17"),
    ("dDAI", "0x0362b4455f5f4cc108a5a1ab1fd2cc6c4f0c70597abb541a99cf2734435ec9cb"),
    ("iUSDT-c", "0x055ba2baf189b98c59f6951a584a3a7d7d6ff2c4ef88639794e739557e1876f0"),
    ("nUSDT-c", "0x003cd2066f3c8b4677741b39db13acebba843bbbaa73d657412102ab4fd98601"),
    ("dUSDT", "0x065c6c7119b738247583286021ea05acc6417aa86d391dcdda21843c1fc6e9c6"),
];

pub const NOSTRA_MAINNET_INTEREST_RATE_MODEL_ADDRESS: &str =
    "0x059a943ca214c10234b9a3b61c558ac20c005127d183b86a99a8f3c60a08b4ff";

pub const NOSTRA_MAINNET_CDP_MANAGER_ADDRESS: &str =
    "0x073f6addc9339de9822cab4dac8c9431779c09077f02ba7bc36904ea342dd9eb";

/// First event is a withdrawal; ignored like the Alpha adapter.
pub const NOSTRA_MAINNET_IGNORED_ADDRESS: &str =
    "0x05fc7053cca20fcb38550d7554c84fa6870e2b9e7ebd66398a67697ba440f12b";

/// Mainnet collateral and debt tokens as `(symbol, address)`.
pub const NOSTRA_MAINNET_TOKEN_ADDRESSES: &[(&str, &str)] = &[
    ("iWBTC-c", "0x05b7d301fa769274f20e89222169c0fad4d846c366440afc160aafadd6f88f0c"),
    ("nWBTC-c", "0x036b68238f3a90639d062669fdec08c4d0bdd09826b1b6d24ef49de6d8141eaa"),
    ("dWBTC", "0x0491480f21299223b9ce770f23a2c383437f9fbf57abc2ac952e9af8cdb12c97"),
    ("iETH-c", "0x057146f6409deb4c9fa12866915dd952aa07c1eb2752e451d7f3b042086bdeb8"),
    ("nETH-c", "0x044debfe17e4d9a5a1e226dabaf286e72c9cc36abbe71c5b847e669da4503893"),
    ("dETH", "0x00ba3037d968790ac486f70acaa9a1cab10cf5843bb85c986624b4d0e5a82e74"),
    ("iUSDC-c", "0x05dcd26c25d9d8fd9fc860038dcb6e4d835e524eb8a85213a8cda5b7fff845f6"),
    ("nUSDC-c", "0x05f296e1b9f4cf1ab452c218e72e02a8713cee98921dad2d3b5706235e128ee4"),
    ("dUSDC", "0x063d69ae657bd2f40337c39bf35a870ac27ddf91e6623c2f52529db4c1619a51"),
    ("iDAI-c", "0x04f18ffc850cdfa223a530d7246d3c6fc12a5969e0aa5d4a88f470f5fe6c46e9"),
    ("nDAI-c", "0x005c4676bcb21454659479b3cd0129884d914df9c9b922c1c649696d2e058d70"),
    ("dDAI", "0x066037c083c33330a8460a65e4748ceec275bbf5f28aa71b686cbc0010e12597"),
    ("iUSDT-c", "0x0453c4c996f1047d9370f824d68145bd5e7ce12d00437140ad02181e1d11dc83"),
    ("nUSDT-c", "0x0514bd7ee8c97d4286bd481c54aa0793e43edbfb7e1ab9784c4b30469dcf9313"),
    ("dUSDT", "0x024e9b0d6bc79e111e6872bb1ada2a874c25712cf08dfc5bcf0de008a7cca55f"),
    ("iwstETH-c", "0x009377fdde350e01e0397820ea83ed3b4f05df30bfb8cf8055d62cafa1b2106a"),
    ("nwstETH-c", "0x05eb6de9c7461b3270d029f00046c8a10d27d4f4a4c931a4ea9769c72ef4edbb"),
    ("dwstETH", "0x0348cc417fc877a7868a66510e8e0d0f3f351f5e6b0886a86b652fcb30a3d1fb"),
    ("iLORDS-c", "0x0739760bce37f89b6c1e6b1198bb8dc7166b8cf21509032894f912c9d5de9cbd"),
    ("nLORDS-c", "0x02530a305dd3d92aad5cf97e373a3d07577f6c859337fb0444b9e851ee4a2dd4"),
    ("dLORDS", "0x035778d24792bbebcf7651146896df5f787641af9e2a3db06480a637fbc9fff8"),
    ("iSTRK-c", "0x07c2e1e733f28daa23e78be3a4f6c724c0ab06af65f6a95b5e0545215f1abc1b"),
    ("nSTRK-c", "0x040f5a6b7a6d3c472c12ca31ae6250b462c6d35bbdae17bd52f6c6ca065e30cf"),
    ("dSTRK", "0x001258eae3eae5002125bebf062d611a772e8aea3a1879b64a19f363ebd00947"),
    ("dDAI V2", "0x06726ec97bae4e28efa8993a8e0853bd4bad0bd71de44c23a1cd651b026b00e7"),
];

const TRANSFER_NAMESPACED: &str = "openzeppelin::token::erc20_v070::erc20::ERC20::Transfer";
const TOKEN_NAMESPACE: &str = "nostra::core::tokenization::lib::nostra_token::NostraTokenComponent::";

/// Role of a Nostra token, inferred from its symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NostraTokenKind {
    /// `d*`
    Debt,
    /// `n*-c`
    NonInterestBearingCollateral,
    /// `i*-c`
    InterestBearingCollateral,
}

impl NostraTokenKind {
    /// Infer the token role from its symbol.
    pub fn from_symbol(symbol: &str) -> Result<Self, DecodeError> {
        let is_collateral = symbol.ends_with("-c");
        match (symbol.chars().next(), is_collateral) {
            (Some('d'), false) => Ok(Self::Debt),
            (Some('n'), true) => Ok(Self::NonInterestBearingCollateral),
            (Some('i'), true) => Ok(Self::InterestBearingCollateral),
            _ => Err(DecodeError::UnexpectedValue {
                field: "nostra token symbol",
                value: symbol.to_string(),
            }),
        }
    }

    pub fn is_collateral(&self) -> bool {
        !matches!(self, Self::Debt)
    }

    pub fn is_interest_bearing(&self) -> bool {
        matches!(self, Self::Debt | Self::InterestBearingCollateral)
    }
}

/// Decoded Nostra event. `token` is the emitting Nostra token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NostraEvent {
    /// New cumulative indices for a debt token and its interest-bearing collateral
    InterestStateUpdated {
        debt_token: String,
        lending_index: Decimal,
        borrow_index: Decimal,
    },
    Mint {
        token: String,
        user: String,
        face_amount: Decimal,
    },
    Burn {
        token: String,
        user: String,
        face_amount: Decimal,
    },
    /// Moves raw amounts; mints and burns show up with the zero address
    Transfer {
        token: String,
        sender: String,
        recipient: String,
        raw_amount: Decimal,
    },
}

impl NostraEvent {
    /// Decode a raw event.
    pub fn decode(event: &RawEvent) -> Result<Self, DecodeError> {
        let name = event
            .key_name
            .strip_prefix(TOKEN_NAMESPACE)
            .unwrap_or(&event.key_name);

        let decoded = match name {
            // `debtToken`, `lendingRate`, ``, `borrowRate`, ``, `lendIndex`, ``, `borrowIndex`, ``
            "InterestStateUpdated" => Self::InterestStateUpdated {
                debt_token: event.address(0)?,
                lending_index: event.scaled(5, WAD_SCALE)?,
                borrow_index: event.scaled(7, WAD_SCALE)?,
            },
            // `user`, `amount`, ``
            "Mint" => Self::Mint {
                token: event.emitter()?,
                user: event.address(0)?,
                face_amount: event.amount(1)?,
            },
            "Burn" => Self::Burn {
                token: event.emitter()?,
                user: event.address(0)?,
                face_amount: event.amount(1)?,
            },
            // `sender`, `recipient`, `value`, ``
            "Transfer" | TRANSFER_NAMESPACED => Self::Transfer {
                token: event.emitter()?,
                sender: event.address(0)?,
                recipient: event.address(1)?,
                raw_amount: event.amount(2)?,
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

pub(crate) fn alpha_event_order(key_name: &str) -> Option<u8> {
    match key_name {
        "InterestStateUpdated" => Some(0),
        "Transfer" => Some(1),
        TRANSFER_NAMESPACED => Some(2),
        "Burn" => Some(3),
        "Mint" => Some(4),
        _ => None,
    }
}

pub(crate) fn mainnet_event_order(key_name: &str) -> Option<u8> {
    match key_name.strip_prefix(TOKEN_NAMESPACE) {
        Some("Burn") => Some(2),
        Some("Mint") => Some(4),
        Some(_) => None,
        None => match key_name {
            "InterestStateUpdated" => Some(0),
            "Burn" => Some(1),
            "Mint" => Some(3),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_token_kind_from_symbol() {
        assert_eq!(NostraTokenKind::from_symbol("dETH").unwrap(), NostraTokenKind::Debt);
        assert_eq!(
            NostraTokenKind::from_symbol("nUSDC-c").unwrap(),
            NostraTokenKind::NonInterestBearingCollateral
        );
        assert_eq!(
            NostraTokenKind::from_symbol("iwstETH-c").unwrap(),
            NostraTokenKind::InterestBearingCollateral
        );
        assert!(NostraTokenKind::from_symbol("iETH").is_err());
        assert!(NostraTokenKind::from_symbol("").is_err());
    }

    #[test]
    fn test_every_listed_token_has_a_kind() {
        for (symbol, _) in NOSTRA_ALPHA_TOKEN_ADDRESSES
            .iter()
            .chain(NOSTRA_MAINNET_TOKEN_ADDRESSES)
        {
            assert!(NostraTokenKind::from_symbol(symbol).is_ok(), "{symbol}");
        }
    }

    #[test]
    fn test_decode_interest_state_updated() {
        let data = vec![
            "0x40b091cb020d91f4a4b34396946b4d4e2a450dbd9410432ebdbfe10e55ee5e5",
            "0x0",
            "0x0",
            "0x0",
            "0x0",
            "0xde0b6b3a7640000",
            "0x0",
            "0xf43fc2c04ee0000",
            "0x0",
        ];
        let event = RawEvent::new(
            5,
            "InterestStateUpdated",
            data.into_iter().map(String::from).collect(),
            NOSTRA_ALPHA_INTEREST_RATE_MODEL_ADDRESS,
        );
        assert_eq!(
            NostraEvent::decode(&event).unwrap(),
            NostraEvent::InterestStateUpdated {
                debt_token: NOSTRA_ALPHA_TOKEN_ADDRESSES[5].1.to_string(),
                lending_index: dec!(1),
                borrow_index: dec!(1.1),
            }
        );
    }

    #[test]
    fn test_decode_namespaced_mint() {
        let event = RawEvent::new(
            5,
            "nostra::core::tokenization::lib::nostra_token::NostraTokenComponent::Mint",
            vec!["0xabc".into(), "0x64".into(), "0x0".into()],
            "0x57146f6409deb4c9fa12866915dd952aa07c1eb2752e451d7f3b042086bdeb8",
        );
        match NostraEvent::decode(&event).unwrap() {
            NostraEvent::Mint { token, face_amount, .. } => {
                assert_eq!(token, NOSTRA_MAINNET_TOKEN_ADDRESSES[3].1);
                assert_eq!(face_amount, dec!(100));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
