//! Client-side sync engine for a zero-knowledge rollup.
//!
//! [`CoreSdk`] downloads rollup blocks from a [`RollupProvider`], replays
//! their note commitments into a local Merkle tree, maintains the alias and
//! spending key registry and feeds every tracked account's state. Storage,
//! cryptography and proving are injected as services.

pub mod account;
pub mod aliases;
pub mod config;
pub mod crypto;
pub mod events;
pub mod provider;
pub mod queue;
pub mod rollup;
pub mod sdk;
pub mod storage;
pub mod types;
pub mod utils;
pub mod world_state;

#[cfg(test)]
mod test_utils;

pub use config::{CoreSdkOptions, SerialQueueMode};
pub use provider::{RollupProvider, ServerRollupProvider};
pub use sdk::{CoreSdk, CoreSdkError, CoreSdkServices, SdkInitState, SdkStatus};
