use super::{AccountState, AccountStateError, AccountStateEvent, AccountStateFactory, ProofOutput};
use crate::crypto::NoteAlgorithms;
use crate::events::EventDispatcher;
use crate::rollup::{BlockContext, BlockTransaction, OffchainTxData};
use crate::storage::{AccountRecord, Database, NoteRecord, UserTxRecord};
use crate::types::{PrivateKey, PublicKey, RollupMarker};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

/// Default [`AccountState`]: finds the account's notes by trial decryption.
/// Accounts added without a private key only track their sync progress and
/// the transactions they are party to through account proofs.
pub struct UserState {
	account_public_key: PublicKey,
	private_key: Option<PrivateKey>,
	db: Arc<dyn Database>,
	note_algorithms: Arc<dyn NoteAlgorithms>,
	synced_to_rollup: watch::Sender<RollupMarker>,
	events: EventDispatcher<AccountStateEvent>,
}

impl UserState {
	pub fn new(account: AccountRecord, db: Arc<dyn Database>, note_algorithms: Arc<dyn NoteAlgorithms>) -> Self {
		let (synced_to_rollup, _) = watch::channel(account.synced_to_rollup);
		Self {
			account_public_key: account.account_public_key,
			private_key: account.private_key,
			db,
			note_algorithms,
			synced_to_rollup,
			events: EventDispatcher::new(),
		}
	}

	fn emit_updated(&self) {
		self.events.dispatch(&AccountStateEvent::Updated {
			account_public_key: self.account_public_key,
			synced_to_rollup: self.synced_to_rollup(),
		});
	}

	/// Applies one transaction: spends, received notes and its user tx record.
	async fn process_transaction(
		&self,
		block: &BlockContext,
		tx: BlockTransaction<'_>,
	) -> Result<(), AccountStateError> {
		for nullifier in tx.proof.nullifiers() {
			if nullifier.is_zero() {
				continue;
			}
			if let Some(note) = self.db.nullify_note(&nullifier).await? {
				debug!("Account {}: note {} spent", self.account_public_key, note.commitment);
			}
		}

		let mut received = 0u128;
		if let Some(private_key) = &self.private_key {
			let commitments = tx.proof.note_commitments();
			for (position, view_note) in tx.offchain.view_notes() {
				let Some(note) = self.note_algorithms.decrypt_note(view_note, private_key) else {
					continue;
				};
				let commitment = self.note_algorithms.value_note_commitment(&note);
				if commitment != commitments[position] {
					debug!(
						"Account {}: decrypted note in rollup {} slot {} does not match its commitment",
						self.account_public_key,
						block.rollup_id(),
						tx.slot
					);
					continue;
				}
				self.db
					.add_note(&NoteRecord {
						commitment,
						nullifier: self.note_algorithms.value_note_nullifier(&commitment, private_key),
						owner: self.account_public_key,
						value: note.value,
						asset_id: note.asset_id,
						index: Some(tx.leaf_index + position as u64),
						nullified: false,
						pending_spend: false,
					})
					.await?;
				received = received.saturating_add(note.value);
			}
		}

		let tx_id = tx.proof.tx_id();
		if self
			.db
			.settle_user_tx(&self.account_public_key, &tx_id, block.created)
			.await?
		{
			debug!("Account {}: settled tx {}", self.account_public_key, tx_id);
			return Ok(());
		}

		let is_own_registration = match tx.offchain {
			OffchainTxData::Account(data) => data.account_public_key == self.account_public_key,
			_ => false,
		};
		if received > 0 || is_own_registration {
			self.db
				.add_user_tx(&UserTxRecord {
					tx_id,
					account_public_key: self.account_public_key,
					proof_id: tx.proof.proof_id,
					asset_id: tx.proof.asset_id,
					value: i128::try_from(received).unwrap_or(i128::MAX),
					created: block.created,
					settled: Some(block.created),
				})
				.await?;
		}
		Ok(())
	}

	async fn set_synced_to_rollup(&self, rollup_id: RollupMarker) -> Result<(), AccountStateError> {
		let mut record = self
			.db
			.get_account(&self.account_public_key)
			.await?
			.unwrap_or_else(|| AccountRecord::new(self.account_public_key, self.private_key));
		record.synced_to_rollup = rollup_id;
		self.db.upsert_account(&record).await?;
		self.synced_to_rollup.send_replace(rollup_id);
		Ok(())
	}
}

#[async_trait::async_trait]
impl AccountState for UserState {
	fn account_public_key(&self) -> PublicKey {
		self.account_public_key
	}

	fn synced_to_rollup(&self) -> RollupMarker {
		*self.synced_to_rollup.borrow()
	}

	async fn sync_from_db(&self) -> Result<(), AccountStateError> {
		if let Some(record) = self.db.get_account(&self.account_public_key).await? {
			self.synced_to_rollup.send_if_modified(|synced| {
				let changed = *synced != record.synced_to_rollup;
				*synced = record.synced_to_rollup;
				changed
			});
		}
		Ok(())
	}

	async fn process_blocks(&self, blocks: &[Arc<BlockContext>]) -> Result<(), AccountStateError> {
		let mut applied = 0usize;
		for block in blocks {
			let synced = self.synced_to_rollup();
			let rollup_id = block.rollup_id();
			if i64::from(rollup_id) <= synced {
				debug!("Account {}: rollup {} already applied", self.account_public_key, rollup_id);
				continue;
			}
			if i64::from(rollup_id) != synced + 1 {
				return Err(AccountStateError::OutOfOrder {
					account: self.account_public_key,
					synced,
					rollup_id,
				});
			}

			for tx in block.transactions() {
				self.process_transaction(block, tx).await?;
			}
			self.set_synced_to_rollup(i64::from(rollup_id)).await?;
			applied += 1;
		}

		if applied > 0 {
			info!(
				"Account {} synced to rollup {} ({} blocks)",
				self.account_public_key,
				self.synced_to_rollup(),
				applied
			);
			self.emit_updated();
		}
		Ok(())
	}

	async fn await_synchronised(
		&self,
		latest_rollup_id: RollupMarker,
		timeout: Option<Duration>,
	) -> Result<(), AccountStateError> {
		let mut receiver = self.synced_to_rollup.subscribe();
		let reached = receiver.wait_for(|synced| *synced >= latest_rollup_id);
		let result = match timeout {
			Some(timeout) => tokio::time::timeout(timeout, reached).await.ok().map(|r| r.is_ok()),
			None => Some(reached.await.is_ok()),
		};
		match result {
			Some(true) => Ok(()),
			_ => Err(AccountStateError::Timeout {
				account: self.account_public_key,
				target: latest_rollup_id,
				synced: self.synced_to_rollup(),
			}),
		}
	}

	async fn add_proof(&self, proof: &ProofOutput) -> Result<(), AccountStateError> {
		if proof.account_public_key != self.account_public_key {
			return Err(AccountStateError::NotOwner {
				expected: self.account_public_key,
				actual: proof.account_public_key,
			});
		}

		for nullifier in &proof.spent_nullifiers {
			if let Some(mut note) = self.db.get_note_by_nullifier(nullifier).await? {
				note.pending_spend = true;
				self.db.add_note(&note).await?;
			}
		}

		if let Some(private_key) = &self.private_key {
			for note in proof.output_notes.iter().filter(|n| n.owner == self.account_public_key) {
				let commitment = self.note_algorithms.value_note_commitment(note);
				self.db
					.add_note(&NoteRecord {
						commitment,
						nullifier: self.note_algorithms.value_note_nullifier(&commitment, private_key),
						owner: self.account_public_key,
						value: note.value,
						asset_id: note.asset_id,
						index: None,
						nullified: false,
						pending_spend: false,
					})
					.await?;
			}
		}

		self.db
			.add_user_tx(&UserTxRecord {
				tx_id: proof.tx_id,
				account_public_key: self.account_public_key,
				proof_id: proof.proof_id,
				asset_id: proof.asset_id,
				value: proof.value,
				created: proof.created,
				settled: None,
			})
			.await?;

		debug!(
			"Account {}: added pending {:?} proof {}",
			self.account_public_key, proof.proof_id, proof.tx_id
		);
		self.emit_updated();
		Ok(())
	}

	fn events(&self) -> &EventDispatcher<AccountStateEvent> {
		&self.events
	}
}

/// Factory producing [`UserState`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserStateFactory;

impl AccountStateFactory for UserStateFactory {
	fn create(
		&self,
		account: AccountRecord,
		db: Arc<dyn Database>,
		note_algorithms: Arc<dyn NoteAlgorithms>,
	) -> Arc<dyn AccountState> {
		Arc::new(UserState::new(account, db, note_algorithms))
	}
}
