//! Starknet event plumbing for the lending-state engine.
//!
//! This crate provides:
//! - The raw event row delivered by the indexer and typed field accessors
//! - Felt decoding and address normalisation
//! - Per-protocol event enums with decoders and same-block ordering tables
//! - Known token and contract addresses
//! - A JSON-lines event feed reader
//!
//! Supports zkLend, Nostra (Alpha and Mainnet) and Hashstack (V0 and V1).

mod error;
mod events;
pub mod felt;
mod feed;
pub mod protocol;
pub mod tokens;

pub use error::DecodeError;
pub use events::{sort_events, RawEvent};
pub use feed::JsonLinesFeed;
pub use protocol::{
    HashstackV0Event, HashstackV1Event, NostraEvent, NostraTokenKind, ProtocolId, ZkLendEvent,
};
pub use tokens::{TokenSettings, TOKEN_SETTINGS};
