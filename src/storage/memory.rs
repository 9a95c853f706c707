//! In-memory storage with optional JSON snapshots on disk.

use super::{
	AccountRecord, AliasRecord, Database, KeyValueStore, LockRecord, NoteRecord, SpendingKeyRecord,
	StorageError, UserTxRecord,
};
use crate::types::{AliasHash, Hash, PublicKey, TxId};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot<T> {
	saved_at: DateTime<Utc>,
	data: T,
}

async fn load_snapshot<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StorageError> {
	if !tokio::fs::try_exists(path).await? {
		debug!("No snapshot at {:?}, starting empty", path);
		return Ok(T::default());
	}
	let content = tokio::fs::read_to_string(path).await?;
	let snapshot: Snapshot<T> = serde_json::from_str(&content)?;
	info!("Loaded snapshot {:?} saved at {}", path, snapshot.saved_at.to_rfc3339());
	Ok(snapshot.data)
}

async fn save_snapshot<T: Serialize>(path: &Path, data: T) -> Result<(), StorageError> {
	let snapshot = Snapshot {
		saved_at: Utc::now(),
		data,
	};
	let content = serde_json::to_string(&snapshot)?;
	if let Some(parent) = path.parent() {
		tokio::fs::create_dir_all(parent).await?;
	}
	let tmp = path.with_extension("tmp");
	tokio::fs::write(&tmp, content).await?;
	tokio::fs::rename(&tmp, path).await?;
	debug!("Saved snapshot {:?}", path);
	Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DatabaseTables {
	/// Hex encoded values.
	keys: BTreeMap<String, String>,
	aliases: Vec<AliasRecord>,
	spending_keys: Vec<SpendingKeyRecord>,
	accounts: Vec<AccountRecord>,
	notes: Vec<NoteRecord>,
	user_txs: Vec<UserTxRecord>,
	locks: Vec<LockRecord>,
}

/// [`Database`] held in memory. When opened with a path, the tables are loaded
/// from and persisted to a JSON snapshot there.
#[derive(Default)]
pub struct MemoryDatabase {
	tables: Mutex<DatabaseTables>,
	snapshot_path: Option<PathBuf>,
	closed: AtomicBool,
}

impl MemoryDatabase {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn open(path: PathBuf) -> Result<Self, StorageError> {
		let tables = load_snapshot(&path).await?;
		Ok(Self {
			tables: Mutex::new(tables),
			snapshot_path: Some(path),
			closed: AtomicBool::new(false),
		})
	}

	/// Writes the snapshot file, if one is configured.
	pub async fn persist(&self) -> Result<(), StorageError> {
		let Some(path) = &self.snapshot_path else {
			return Ok(());
		};
		let tables = self.with_tables(|tables| tables.clone())?;
		save_snapshot(path, tables).await
	}

	fn with_tables<R>(&self, f: impl FnOnce(&mut DatabaseTables) -> R) -> Result<R, StorageError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(StorageError::Closed);
		}
		let mut tables = self.tables.lock().map_err(|_| StorageError::Poisoned)?;
		Ok(f(&mut tables))
	}
}

#[async_trait::async_trait]
impl Database for MemoryDatabase {
	async fn get_key(&self, name: &str) -> Result<Option<Vec<u8>>, StorageError> {
		let value = self.with_tables(|tables| tables.keys.get(name).cloned())?;
		value
			.map(|encoded| {
				hex::decode(encoded).map_err(|e| StorageError::InvalidValue {
					key: name.to_string(),
					reason: e.to_string(),
				})
			})
			.transpose()
	}

	async fn set_key(&self, name: &str, value: Vec<u8>) -> Result<(), StorageError> {
		self.with_tables(|tables| {
			tables.keys.insert(name.to_string(), hex::encode(value));
		})
	}

	async fn set_aliases(&self, aliases: &[AliasRecord]) -> Result<(), StorageError> {
		self.with_tables(|tables| {
			for alias in aliases {
				match tables
					.aliases
					.iter_mut()
					.find(|a| a.account_public_key == alias.account_public_key)
				{
					Some(existing) => *existing = alias.clone(),
					None => tables.aliases.push(alias.clone()),
				}
			}
		})
	}

	async fn get_alias_by_hash(&self, alias_hash: &AliasHash) -> Result<Option<AliasRecord>, StorageError> {
		self.with_tables(|tables| {
			tables
				.aliases
				.iter()
				.filter(|a| &a.alias_hash == alias_hash)
				.max_by_key(|a| a.index)
				.cloned()
		})
	}

	async fn get_alias_by_account(
		&self,
		account_public_key: &PublicKey,
	) -> Result<Option<AliasRecord>, StorageError> {
		self.with_tables(|tables| {
			tables
				.aliases
				.iter()
				.find(|a| &a.account_public_key == account_public_key)
				.cloned()
		})
	}

	async fn add_spending_keys(&self, keys: &[SpendingKeyRecord]) -> Result<(), StorageError> {
		self.with_tables(|tables| {
			for key in keys {
				let exists = tables
					.spending_keys
					.iter()
					.any(|k| k.account_public_key == key.account_public_key && k.key == key.key);
				if !exists {
					tables.spending_keys.push(key.clone());
				}
			}
		})
	}

	async fn get_spending_keys(
		&self,
		account_public_key: &PublicKey,
	) -> Result<Vec<SpendingKeyRecord>, StorageError> {
		self.with_tables(|tables| {
			tables
				.spending_keys
				.iter()
				.filter(|k| &k.account_public_key == account_public_key)
				.cloned()
				.collect()
		})
	}

	async fn upsert_account(&self, account: &AccountRecord) -> Result<(), StorageError> {
		self.with_tables(|tables| {
			match tables
				.accounts
				.iter_mut()
				.find(|a| a.account_public_key == account.account_public_key)
			{
				Some(existing) => *existing = account.clone(),
				None => tables.accounts.push(account.clone()),
			}
		})
	}

	async fn get_account(&self, account_public_key: &PublicKey) -> Result<Option<AccountRecord>, StorageError> {
		self.with_tables(|tables| {
			tables
				.accounts
				.iter()
				.find(|a| &a.account_public_key == account_public_key)
				.cloned()
		})
	}

	async fn get_accounts(&self) -> Result<Vec<AccountRecord>, StorageError> {
		self.with_tables(|tables| tables.accounts.clone())
	}

	async fn remove_account(&self, account_public_key: &PublicKey) -> Result<(), StorageError> {
		self.with_tables(|tables| {
			tables.accounts.retain(|a| &a.account_public_key != account_public_key);
			tables.notes.retain(|n| &n.owner != account_public_key);
			tables.user_txs.retain(|t| &t.account_public_key != account_public_key);
		})
	}

	async fn add_note(&self, note: &NoteRecord) -> Result<(), StorageError> {
		self.with_tables(|tables| {
			match tables.notes.iter_mut().find(|n| n.commitment == note.commitment) {
				Some(existing) => *existing = note.clone(),
				None => tables.notes.push(note.clone()),
			}
		})
	}

	async fn get_note_by_nullifier(&self, nullifier: &Hash) -> Result<Option<NoteRecord>, StorageError> {
		self.with_tables(|tables| tables.notes.iter().find(|n| &n.nullifier == nullifier).cloned())
	}

	async fn get_notes(&self, owner: &PublicKey) -> Result<Vec<NoteRecord>, StorageError> {
		self.with_tables(|tables| {
			tables
				.notes
				.iter()
				.filter(|n| &n.owner == owner && !n.nullified)
				.cloned()
				.collect()
		})
	}

	async fn nullify_note(&self, nullifier: &Hash) -> Result<Option<NoteRecord>, StorageError> {
		self.with_tables(|tables| {
			tables
				.notes
				.iter_mut()
				.find(|n| &n.nullifier == nullifier && !n.nullified)
				.map(|note| {
					note.nullified = true;
					note.pending_spend = false;
					note.clone()
				})
		})
	}

	async fn add_user_tx(&self, tx: &UserTxRecord) -> Result<(), StorageError> {
		self.with_tables(|tables| {
			match tables
				.user_txs
				.iter_mut()
				.find(|t| t.tx_id == tx.tx_id && t.account_public_key == tx.account_public_key)
			{
				Some(existing) => *existing = tx.clone(),
				None => tables.user_txs.push(tx.clone()),
			}
		})
	}

	async fn get_user_txs(&self, account_public_key: &PublicKey) -> Result<Vec<UserTxRecord>, StorageError> {
		self.with_tables(|tables| {
			let mut txs: Vec<_> = tables
				.user_txs
				.iter()
				.filter(|t| &t.account_public_key == account_public_key)
				.cloned()
				.collect();
			txs.sort_by(|a, b| b.created.cmp(&a.created));
			txs
		})
	}

	async fn settle_user_tx(
		&self,
		account_public_key: &PublicKey,
		tx_id: &TxId,
		settled: DateTime<Utc>,
	) -> Result<bool, StorageError> {
		self.with_tables(|tables| {
			match tables
				.user_txs
				.iter_mut()
				.find(|t| &t.tx_id == tx_id && &t.account_public_key == account_public_key)
			{
				Some(tx) if tx.settled.is_none() => {
					tx.settled = Some(settled);
					true
				}
				_ => false,
			}
		})
	}

	async fn acquire_lock(&self, name: &str, holder: &str, ttl: chrono::Duration) -> Result<bool, StorageError> {
		let now = Utc::now();
		self.with_tables(|tables| match tables.locks.iter_mut().find(|l| l.name == name) {
			Some(lock) if lock.holder != holder && lock.expires > now => false,
			Some(lock) => {
				lock.holder = holder.to_string();
				lock.expires = now + ttl;
				true
			}
			None => {
				tables.locks.push(LockRecord {
					name: name.to_string(),
					holder: holder.to_string(),
					expires: now + ttl,
				});
				true
			}
		})
	}

	async fn extend_lock(&self, name: &str, holder: &str, ttl: chrono::Duration) -> Result<bool, StorageError> {
		let now = Utc::now();
		self.with_tables(|tables| {
			match tables.locks.iter_mut().find(|l| l.name == name && l.holder == holder) {
				Some(lock) => {
					lock.expires = now + ttl;
					true
				}
				None => false,
			}
		})
	}

	async fn release_lock(&self, name: &str, holder: &str) -> Result<(), StorageError> {
		self.with_tables(|tables| tables.locks.retain(|l| !(l.name == name && l.holder == holder)))
	}

	async fn clear(&self) -> Result<(), StorageError> {
		self.with_tables(|tables| *tables = DatabaseTables::default())
	}

	async fn flush(&self) -> Result<(), StorageError> {
		self.persist().await
	}

	async fn close(&self) -> Result<(), StorageError> {
		if self.closed.load(Ordering::Acquire) {
			return Ok(());
		}
		self.persist().await?;
		self.closed.store(true, Ordering::Release);
		Ok(())
	}
}

/// [`KeyValueStore`] held in memory, optionally snapshotted like [`MemoryDatabase`].
#[derive(Default)]
pub struct MemoryKeyValueStore {
	entries: Mutex<BTreeMap<String, Vec<u8>>>,
	snapshot_path: Option<PathBuf>,
	closed: AtomicBool,
}

impl MemoryKeyValueStore {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn open(path: PathBuf) -> Result<Self, StorageError> {
		let encoded: BTreeMap<String, String> = load_snapshot(&path).await?;
		let entries = encoded
			.into_iter()
			.map(|(key, value)| {
				let value = hex::decode(&value).map_err(|e| StorageError::InvalidValue {
					key: key.clone(),
					reason: e.to_string(),
				})?;
				Ok((key, value))
			})
			.collect::<Result<BTreeMap<_, _>, StorageError>>()?;
		Ok(Self {
			entries: Mutex::new(entries),
			snapshot_path: Some(path),
			closed: AtomicBool::new(false),
		})
	}

	pub async fn persist(&self) -> Result<(), StorageError> {
		let Some(path) = &self.snapshot_path else {
			return Ok(());
		};
		let encoded: BTreeMap<String, String> = self.with_entries(|entries| {
			entries
				.iter()
				.map(|(key, value)| (key.clone(), hex::encode(value)))
				.collect()
		})?;
		save_snapshot(path, encoded).await
	}

	/// Number of stored entries.
	pub fn len(&self) -> Result<usize, StorageError> {
		self.with_entries(|entries| entries.len())
	}

	pub fn is_empty(&self) -> Result<bool, StorageError> {
		Ok(self.len()? == 0)
	}

	fn with_entries<R>(&self, f: impl FnOnce(&mut BTreeMap<String, Vec<u8>>) -> R) -> Result<R, StorageError> {
		if self.closed.load(Ordering::Acquire) {
			return Err(StorageError::Closed);
		}
		let mut entries = self.entries.lock().map_err(|_| StorageError::Poisoned)?;
		Ok(f(&mut entries))
	}
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryKeyValueStore {
	async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		self.with_entries(|entries| entries.get(key).cloned())
	}

	async fn put_batch(&self, batch: Vec<(String, Vec<u8>)>) -> Result<(), StorageError> {
		self.with_entries(|entries| entries.extend(batch))
	}

	async fn clear(&self) -> Result<(), StorageError> {
		self.with_entries(|entries| entries.clear())
	}

	async fn flush(&self) -> Result<(), StorageError> {
		self.persist().await
	}

	async fn close(&self) -> Result<(), StorageError> {
		if self.closed.load(Ordering::Acquire) {
			return Ok(());
		}
		self.persist().await?;
		self.closed.store(true, Ordering::Release);
		Ok(())
	}
}
