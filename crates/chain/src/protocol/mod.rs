//! Per-protocol event decoding.
//!
//! Each supported lending protocol gets a closed event enum decoded from
//! [`RawEvent`](crate::RawEvent) rows:
//!
//! - [`ZkLendEvent`]: market events, accepted bare or `zklend::market::Market::` namespaced
//! - [`NostraEvent`]: interest-rate-model updates plus token Mint/Burn/Transfer
//! - [`HashstackV0Event`] / [`HashstackV1Event`]: loan-record rewrite events
//!
//! [`ProtocolId`] ties a protocol to its display name, output directory and
//! same-block processing order.

mod hashstack_v0;
mod hashstack_v1;
mod nostra;
mod zklend;

pub use hashstack_v0::{HashstackV0Event, LoanRecord, HASHSTACK_V0_ADDRESS};
pub use hashstack_v1::{
    resolve_token_symbol, CollateralRecordV1, HashstackV1Event, LoanRecordV1,
    HASHSTACK_V1_ADDRESSES, HASHSTACK_V1_POOL_TOKENS,
};
pub use nostra::{
    NostraEvent, NostraTokenKind, NOSTRA_ALPHA_CDP_MANAGER_ADDRESS,
    NOSTRA_ALPHA_DEFERRED_BATCH_CALL_ADAPTER_ADDRESS, NOSTRA_ALPHA_INTEREST_RATE_MODEL_ADDRESS,
    NOSTRA_ALPHA_TOKEN_ADDRESSES, NOSTRA_MAINNET_CDP_MANAGER_ADDRESS,
    NOSTRA_MAINNET_IGNORED_ADDRESS, NOSTRA_MAINNET_INTEREST_RATE_MODEL_ADDRESS,
    NOSTRA_MAINNET_TOKEN_ADDRESSES,
};
pub use zklend::{ZkLendEvent, ZKLEND_MARKET_ADDRESS};

use serde::{Deserialize, Serialize};

use crate::events::{sort_events, RawEvent};

/// Supported lending protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolId {
    ZkLend,
    NostraAlpha,
    NostraMainnet,
    HashstackV0,
    HashstackV1,
}

impl ProtocolId {
    /// Every protocol, in processing order.
    pub const ALL: [ProtocolId; 5] = [
        ProtocolId::ZkLend,
        ProtocolId::HashstackV0,
        ProtocolId::HashstackV1,
        ProtocolId::NostraAlpha,
        ProtocolId::NostraMainnet,
    ];

    /// Display name used in tables.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ZkLend => "zkLend",
            Self::NostraAlpha => "Nostra Alpha",
            Self::NostraMainnet => "Nostra Mainnet",
            Self::HashstackV0 => "Hashstack V0",
            Self::HashstackV1 => "Hashstack V1",
        }
    }

    /// Parse from string (e.g., from config).
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace([' ', '-'], "_").as_str() {
            "zklend" => Some(Self::ZkLend),
            "nostra_alpha" | "nostraalpha" => Some(Self::NostraAlpha),
            "nostra_mainnet" | "nostramainnet" | "nostra" => Some(Self::NostraMainnet),
            "hashstack_v0" | "hashstackv0" | "hashstack" => Some(Self::HashstackV0),
            "hashstack_v1" | "hashstackv1" => Some(Self::HashstackV1),
            _ => None,
        }
    }

    /// Directory name for per-protocol outputs and checkpoints.
    pub fn directory(&self) -> &'static str {
        match self {
            Self::ZkLend => "zklend",
            Self::NostraAlpha => "nostra_alpha",
            Self::NostraMainnet => "nostra_mainnet",
            Self::HashstackV0 => "hashstack_v0",
            Self::HashstackV1 => "hashstack_v1",
        }
    }

    /// Processing rank of an event within a transaction. Lower goes first.
    pub fn event_order(&self, key_name: &str) -> Option<u8> {
        match self {
            Self::ZkLend => zklend::event_order(key_name),
            Self::NostraAlpha => nostra::alpha_event_order(key_name),
            Self::NostraMainnet => nostra::mainnet_event_order(key_name),
            Self::HashstackV0 => hashstack_v0::event_order(key_name),
            Self::HashstackV1 => hashstack_v1::event_order(key_name),
        }
    }

    /// Sort a batch of this protocol's events into processing order.
    ///
    /// Hashstack V1 splits one user operation across transactions of the same
    /// block, so its events are ordered by block and event kind only.
    pub fn sort_events(&self, events: &mut [RawEvent]) {
        match self {
            Self::HashstackV1 => events.sort_by_key(|event| {
                (
                    event.block_number,
                    hashstack_v1::event_order(&event.key_name).unwrap_or(u8::MAX),
                )
            }),
            _ => sort_events(events, |key_name| self.event_order(key_name)),
        }
    }
}

impl std::fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
