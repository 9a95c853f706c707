//! Durable local state
//!
//! Two capabilities back the sync engine: a relational-style [`Database`]
//! holding sync markers, aliases, spending keys, accounts, notes, user
//! transactions and lease locks, and a [`KeyValueStore`] holding Merkle tree
//! nodes. Both are shared by every process using the same storage volume, so
//! every reader re-derives its view from them rather than trusting memory.

mod memory;

pub use memory::{MemoryDatabase, MemoryKeyValueStore};

use crate::rollup::ProofId;
use crate::types::{AliasHash, Hash, PrivateKey, PublicKey, RollupMarker, TxId, UNSYNCED};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Key of the rollup contract the local data was synced against.
pub const ROLLUP_CONTRACT_ADDRESS_KEY: &str = "rollupContractAddress";
/// Key of the local schema version.
pub const DATA_VERSION_KEY: &str = "dataVersion";
/// Key of the authoritative core sync marker.
pub const SYNCED_TO_ROLLUP_KEY: &str = "syncedToRollup";
/// Key of the raw genesis blob kept for rebuilds.
pub const GENESIS_DATA_KEY: &str = "genesisData";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("Storage mutex poisoned")]
	Poisoned,

	#[error("Storage has been closed")]
	Closed,

	#[error("Snapshot I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("Snapshot serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Invalid stored value for {key}: {reason}")]
	InvalidValue { key: String, reason: String },
}

/// An alias claimed by an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasRecord {
	pub alias_hash: AliasHash,
	pub account_public_key: PublicKey,
	/// Leaf position of the registering proof.
	pub index: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingKeyRecord {
	pub account_public_key: PublicKey,
	pub key: PublicKey,
	pub tree_index: u64,
}

/// A locally tracked account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
	pub account_public_key: PublicKey,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub private_key: Option<PrivateKey>,
	pub synced_to_rollup: RollupMarker,
}

impl AccountRecord {
	pub fn new(account_public_key: PublicKey, private_key: Option<PrivateKey>) -> Self {
		Self {
			account_public_key,
			private_key,
			synced_to_rollup: UNSYNCED,
		}
	}
}

/// A value note owned by a tracked account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
	pub commitment: Hash,
	pub nullifier: Hash,
	pub owner: PublicKey,
	pub value: u128,
	pub asset_id: u32,
	/// Leaf index, `None` while the note only exists in a local proof.
	pub index: Option<u64>,
	pub nullified: bool,
	/// Spent by a local proof that has not been confirmed yet.
	pub pending_spend: bool,
}

/// A transaction affecting a tracked account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTxRecord {
	pub tx_id: TxId,
	pub account_public_key: PublicKey,
	pub proof_id: ProofId,
	pub asset_id: u32,
	/// Net change to the account's balance in `asset_id`.
	pub value: i128,
	pub created: DateTime<Utc>,
	pub settled: Option<DateTime<Utc>>,
}

/// Cross-process lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
	pub name: String,
	pub holder: String,
	pub expires: DateTime<Utc>,
}

/// Relational store shared by every process of one logical SDK.
#[async_trait::async_trait]
pub trait Database: Send + Sync {
	async fn get_key(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError>;
	async fn set_key(&self, name: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Upserts keyed by account public key.
	async fn set_aliases(&self, aliases: &[AliasRecord]) -> Result<(), StorageError>;
	/// The most recent claim of `alias_hash`, by leaf index.
	async fn get_alias_by_hash(&self, alias_hash: &AliasHash) -> Result<Option<AliasRecord>, StorageError>;
	async fn get_alias_by_account(&self, account_public_key: &PublicKey)
	-> Result<Option<AliasRecord>, StorageError>;

	async fn add_spending_keys(&self, keys: &[SpendingKeyRecord]) -> Result<(), StorageError>;
	async fn get_spending_keys(&self, account_public_key: &PublicKey)
	-> Result<Vec<SpendingKeyRecord>, StorageError>;

	async fn upsert_account(&self, account: &AccountRecord) -> Result<(), StorageError>;
	async fn get_account(&self, account_public_key: &PublicKey) -> Result<Option<AccountRecord>, StorageError>;
	async fn get_accounts(&self) -> Result<Vec<AccountRecord>, StorageError>;
	/// Removes the account with its notes and transactions.
	async fn remove_account(&self, account_public_key: &PublicKey) -> Result<(), StorageError>;

	/// Inserts or replaces the note with the same commitment.
	async fn add_note(&self, note: &NoteRecord) -> Result<(), StorageError>;
	async fn get_note_by_nullifier(&self, nullifier: &Hash) -> Result<Option<NoteRecord>, StorageError>;
	/// Unspent notes of an account, confirmed or pending.
	async fn get_notes(&self, owner: &PublicKey) -> Result<Vec<NoteRecord>, StorageError>;
	async fn nullify_note(&self, nullifier: &Hash) -> Result<Option<NoteRecord>, StorageError>;

	async fn add_user_tx(&self, tx: &UserTxRecord) -> Result<(), StorageError>;
	async fn get_user_txs(&self, account_public_key: &PublicKey) -> Result<Vec<UserTxRecord>, StorageError>;
	/// Marks the transaction settled. Returns false if it is unknown or already settled.
	async fn settle_user_tx(
		&self,
		account_public_key: &PublicKey,
		tx_id: &TxId,
		settled: DateTime<Utc>,
	) -> Result<bool, StorageError>;

	/// Takes the lease if it is free, expired, or already held by `holder`.
	async fn acquire_lock(&self, name: &str, holder: &str, ttl: chrono::Duration) -> Result<bool, StorageError>;
	/// Pushes the expiry forward. Returns false if `holder` lost the lease.
	async fn extend_lock(&self, name: &str, holder: &str, ttl: chrono::Duration) -> Result<bool, StorageError>;
	async fn release_lock(&self, name: &str, holder: &str) -> Result<(), StorageError>;

	/// Erases everything.
	async fn clear(&self) -> Result<(), StorageError>;
	/// Makes every completed write durable.
	async fn flush(&self) -> Result<(), StorageError> {
		Ok(())
	}
	async fn close(&self) -> Result<(), StorageError>;
}

/// Flat key/value store holding Merkle tree nodes.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
	/// Applies all writes or none.
	async fn put_batch(&self, entries: Vec<(String, Vec<u8>)>) -> Result<(), StorageError>;
	async fn clear(&self) -> Result<(), StorageError>;
	/// Makes every completed write durable.
	async fn flush(&self) -> Result<(), StorageError> {
		Ok(())
	}
	async fn close(&self) -> Result<(), StorageError>;
}

/// Reads the core sync marker, `-1` when absent.
pub async fn read_synced_to_rollup(db: &dyn Database) -> Result<RollupMarker, StorageError> {
	match db.get_key(SYNCED_TO_ROLLUP_KEY).await? {
		None => Ok(UNSYNCED),
		Some(bytes) => {
			let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| StorageError::InvalidValue {
				key: SYNCED_TO_ROLLUP_KEY.to_string(),
				reason: format!("expected 8 bytes, got {}", bytes.len()),
			})?;
			Ok(i64::from_be_bytes(bytes))
		}
	}
}

pub async fn write_synced_to_rollup(db: &dyn Database, marker: RollupMarker) -> Result<(), StorageError> {
	db.set_key(SYNCED_TO_ROLLUP_KEY, marker.to_be_bytes().to_vec()).await
}
