//! Alias and spending key registry
//!
//! Alias claims and spending keys come from two sources: account registration
//! proofs in confirmed rollups, and the packed per-account records of the
//! genesis blob. Both are turned into storage records here.

use crate::crypto::NoteAlgorithms;
use crate::rollup::codec::{Reader, Writer};
use crate::rollup::{BlockContext, DecodeError, NOTES_PER_TX, OffchainTxData, ProofId};
use crate::storage::{AliasRecord, SpendingKeyRecord};
use crate::types::{AliasHash, PublicKey};

use std::sync::Arc;
use tracing::{debug, warn};

/// Alias and spending key records derived from a batch of rollups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryUpdates {
	pub aliases: Vec<AliasRecord>,
	pub spending_keys: Vec<SpendingKeyRecord>,
}

impl RegistryUpdates {
	pub fn is_empty(&self) -> bool {
		self.aliases.is_empty() && self.spending_keys.is_empty()
	}
}

fn spending_key_records(
	account_public_key: PublicKey,
	keys: [PublicKey; 2],
	first_index: u64,
) -> impl Iterator<Item = SpendingKeyRecord> {
	keys.into_iter()
		.zip(first_index..)
		.filter(|(key, _)| !key.is_zero())
		.map(move |(key, tree_index)| SpendingKeyRecord {
			account_public_key,
			key,
			tree_index,
		})
}

/// Collects alias claims and spending keys from the account proofs of `blocks`.
///
/// A claim is only accepted when the commitment recomputed from its offchain
/// data equals the proof's first note commitment. Within one rollup the last
/// slot claiming an alias hash wins.
pub fn process_aliases(blocks: &[Arc<BlockContext>], note_algorithms: &dyn NoteAlgorithms) -> RegistryUpdates {
	let mut updates = RegistryUpdates::default();

	for block in blocks {
		let mut rollup_aliases: Vec<AliasRecord> = Vec::new();

		for tx in block.transactions() {
			if tx.proof.proof_id != ProofId::Account {
				continue;
			}
			let OffchainTxData::Account(data) = tx.offchain else {
				continue;
			};

			let commitment = note_algorithms.account_note_commitment(
				&data.alias_hash,
				&data.account_public_key,
				&data.spending_public_key1,
			);
			if commitment != tx.proof.note_commitment1 {
				warn!(
					"Rollup {} slot {}: account commitment does not match offchain data, skipping",
					block.rollup_id(),
					tx.slot
				);
				continue;
			}

			rollup_aliases.retain(|alias| alias.alias_hash != data.alias_hash);
			rollup_aliases.push(AliasRecord {
				alias_hash: data.alias_hash,
				account_public_key: data.account_public_key,
				index: tx.leaf_index,
			});
			updates.spending_keys.extend(spending_key_records(
				data.account_public_key,
				[data.spending_public_key1, data.spending_public_key2],
				tx.leaf_index,
			));
		}

		if !rollup_aliases.is_empty() {
			debug!("Rollup {}: {} alias claims", block.rollup_id(), rollup_aliases.len());
		}
		updates.aliases.extend(rollup_aliases);
	}

	updates
}

/// One packed account record of the genesis blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenesisAccount {
	pub alias_hash: AliasHash,
	pub account_public_key: PublicKey,
	pub spending_public_keys: [PublicKey; 2],
}

/// Parses `u32 count` followed by `count` records of
/// `aliasHash(28) accountPk(32) spendingPk1(32) spendingPk2(32)`.
pub fn parse_genesis_accounts(buf: &[u8]) -> Result<Vec<GenesisAccount>, DecodeError> {
	if buf.is_empty() {
		return Ok(Vec::new());
	}
	let mut reader = Reader::new(buf);
	let count = reader.u32()? as usize;
	let record_len = AliasHash::SIZE + PublicKey::SIZE * 3;
	if reader.remaining() < count.saturating_mul(record_len) {
		return Err(DecodeError::UnexpectedEnd {
			offset: reader.offset(),
			needed: count.saturating_mul(record_len),
			available: reader.remaining(),
		});
	}

	let mut accounts = Vec::with_capacity(count);
	for _ in 0..count {
		accounts.push(GenesisAccount {
			alias_hash: AliasHash(reader.array()?),
			account_public_key: PublicKey(reader.array()?),
			spending_public_keys: [PublicKey(reader.array()?), PublicKey(reader.array()?)],
		});
	}
	reader.finish()?;
	Ok(accounts)
}

pub fn encode_genesis_accounts(accounts: &[GenesisAccount]) -> Vec<u8> {
	let mut writer = Writer::new();
	writer.u32(accounts.len() as u32);
	for account in accounts {
		writer
			.bytes(account.alias_hash.as_bytes())
			.bytes(account.account_public_key.as_bytes())
			.bytes(account.spending_public_keys[0].as_bytes())
			.bytes(account.spending_public_keys[1].as_bytes());
	}
	writer.into_inner()
}

/// Records for genesis accounts. Record `i` occupies leaves `2i` and `2i + 1`.
pub fn genesis_records(accounts: &[GenesisAccount]) -> RegistryUpdates {
	let mut updates = RegistryUpdates::default();
	for (i, account) in accounts.iter().enumerate() {
		let index = i as u64 * NOTES_PER_TX;
		updates.aliases.push(AliasRecord {
			alias_hash: account.alias_hash,
			account_public_key: account.account_public_key,
			index,
		});
		updates.spending_keys.extend(spending_key_records(
			account.account_public_key,
			account.spending_public_keys,
			index,
		));
	}
	updates
}
