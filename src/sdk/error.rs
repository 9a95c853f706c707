use super::status::SdkInitState;
use crate::account::AccountStateError;
use crate::crypto::CryptoError;
use crate::provider::RollupProviderError;
use crate::queue::QueueError;
use crate::rollup::DecodeError;
use crate::storage::StorageError;
use crate::types::{AliasHash, PublicKey, RollupMarker};
use crate::world_state::WorldStateError;

/// Top level error type of the CoreSdk.
#[derive(Debug, thiserror::Error)]
pub enum CoreSdkError {
	#[error("Cannot {operation} while the SDK is {state:?}")]
	InvalidState {
		operation: &'static str,
		state: SdkInitState,
	},

	#[error("Rollup provider error: {0}")]
	Provider(#[from] RollupProviderError),

	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("World state error: {0}")]
	WorldState(#[from] WorldStateError),

	#[error("Queue error: {0}")]
	Queue(#[from] QueueError),

	#[error("Block decoding error: {0}")]
	Decode(#[from] DecodeError),

	#[error("Account state error: {0}")]
	Account(#[from] AccountStateError),

	#[error("Crypto error: {0}")]
	Crypto(#[from] CryptoError),

	#[error("Serialization error: {0}")]
	Serialization(#[from] bincode::Error),

	#[error("Provider returned rollup {actual}, expected {expected}")]
	NonContiguousBlocks { expected: u32, actual: u32 },

	#[error("Account {0} is not tracked")]
	UnknownAccount(PublicKey),

	#[error("Account {0} has no private key")]
	NoPrivateKey(PublicKey),

	#[error("Private key does not belong to account {0}")]
	KeyMismatch(PublicKey),

	#[error("Account {account} holds {available} of asset {asset_id}, {required} required")]
	InsufficientNotes {
		account: PublicKey,
		asset_id: u32,
		required: u128,
		available: u128,
	},

	#[error("Alias {alias_hash} is registered to {owner}")]
	AliasAlreadyRegistered { alias_hash: AliasHash, owner: PublicKey },

	#[error("Timed out at rollup {synced} waiting for rollup {target}")]
	SyncTimeout { target: RollupMarker, synced: RollupMarker },
}
