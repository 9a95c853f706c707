//! Proof requests. Every request runs on the serial queue so it never sees a
//! half-applied sync step, and hands its result to the owning account state
//! before returning.

use super::{CoreSdk, CoreSdkError, CoreSdkInner};
use crate::account::{AccountState, ProofOutput};
use crate::crypto::TreeNote;
use crate::provider::Tx;
use crate::rollup::{InnerProofData, OffchainAccountData, OffchainJoinSplitData, ProofId};
use crate::types::{AliasHash, Hash, PrivateKey, PublicKey, TxId};

use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Where the value of a payment comes from or goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentAction {
	/// Shield `value` from the public address `from` into a note for the sender.
	Deposit { from: Hash },
	/// Transfer `value` to another account.
	Send { to: PublicKey },
	/// Unshield `value` to the public address `to`.
	Withdraw { to: Hash },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
	pub account_public_key: PublicKey,
	pub asset_id: u32,
	pub value: u128,
	pub action: PaymentAction,
}

/// Registers `alias_hash` and spending keys for an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRequest {
	pub account_public_key: PublicKey,
	pub alias_hash: AliasHash,
	pub spending_public_keys: [PublicKey; 2],
}

fn new_note(owner: PublicKey, value: u128, asset_id: u32) -> TreeNote {
	TreeNote {
		owner,
		value,
		asset_id,
		note_secret: Hash(rand::random()),
	}
}

impl CoreSdk {
	/// Builds a deposit, transfer or withdrawal proof.
	pub async fn create_payment_proof(&self, request: PaymentRequest) -> Result<ProofOutput, CoreSdkError> {
		self.inner.require_running("create payment proof")?;
		let inner = self.inner.clone();
		self.inner
			.queue()?
			.push(move || async move { inner.build_payment_proof(request).await })
			.await?
	}

	/// Builds an account registration proof.
	pub async fn create_account_proof(&self, request: AccountRequest) -> Result<ProofOutput, CoreSdkError> {
		self.inner.require_running("create account proof")?;
		let inner = self.inner.clone();
		self.inner
			.queue()?
			.push(move || async move { inner.build_account_proof(request).await })
			.await?
	}

	/// Submits proofs to the rollup provider.
	pub async fn send_proofs(&self, proofs: &[ProofOutput]) -> Result<Vec<TxId>, CoreSdkError> {
		self.inner.require_running("send proofs")?;
		let txs = proofs.iter().map(|proof| proof.tx.clone()).collect();
		let tx_ids = self.inner.services.provider.send_txs(txs).await?;
		info!("Submitted {} transactions", tx_ids.len());
		Ok(tx_ids)
	}
}

impl CoreSdkInner {
	async fn spending_account(
		&self,
		account_public_key: &PublicKey,
	) -> Result<(Arc<dyn AccountState>, PrivateKey), CoreSdkError> {
		let account = self.account_state(account_public_key)?;
		let private_key = self
			.services
			.db
			.get_account(account_public_key)
			.await?
			.and_then(|record| record.private_key)
			.ok_or(CoreSdkError::NoPrivateKey(*account_public_key))?;
		Ok((account, private_key))
	}

	async fn build_payment_proof(&self, request: PaymentRequest) -> Result<ProofOutput, CoreSdkError> {
		let PaymentRequest {
			account_public_key,
			asset_id,
			value,
			action,
		} = request;
		let (account, _) = self.spending_account(&account_public_key).await?;
		let note_algorithms = self.services.note_algorithms.as_ref();

		let (inputs, input_total) = match action {
			PaymentAction::Deposit { .. } => (Vec::new(), 0),
			_ => {
				let notes: Vec<_> = self
					.services
					.db
					.get_notes(&account_public_key)
					.await?
					.into_iter()
					.filter(|note| note.asset_id == asset_id)
					.collect();
				let picked = self.services.note_picker.pick(&notes, value).ok_or_else(|| {
					let available = notes
						.iter()
						.filter(|note| note.index.is_some() && !note.nullified && !note.pending_spend)
						.fold(0u128, |sum, note| sum.saturating_add(note.value));
					CoreSdkError::InsufficientNotes {
						account: account_public_key,
						asset_id,
						required: value,
						available,
					}
				})?;
				let total = picked.iter().fold(0u128, |sum, note| sum.saturating_add(note.value));
				(picked, total)
			}
		};

		let mut inner = InnerProofData::padding();
		inner.asset_id = asset_id;
		let (output1, output2, delta) = match &action {
			PaymentAction::Deposit { from } => {
				inner.proof_id = ProofId::Deposit;
				inner.public_value = value;
				inner.public_owner = *from;
				(Some(new_note(account_public_key, value, asset_id)), None, i128::try_from(value).unwrap_or(i128::MAX))
			}
			PaymentAction::Send { to } => {
				inner.proof_id = ProofId::Send;
				let change = input_total - value;
				let delta = if *to == account_public_key {
					0
				} else {
					-i128::try_from(value).unwrap_or(i128::MAX)
				};
				(
					Some(new_note(*to, value, asset_id)),
					(change > 0).then(|| new_note(account_public_key, change, asset_id)),
					delta,
				)
			}
			PaymentAction::Withdraw { to } => {
				inner.proof_id = ProofId::Withdraw;
				inner.public_value = value;
				inner.public_owner = *to;
				let change = input_total - value;
				(
					None,
					(change > 0).then(|| new_note(account_public_key, change, asset_id)),
					-i128::try_from(value).unwrap_or(i128::MAX),
				)
			}
		};

		let spent_nullifiers: Vec<Hash> = inputs.iter().map(|note| note.nullifier).collect();
		inner.nullifier1 = spent_nullifiers.first().copied().unwrap_or(Hash::ZERO);
		inner.nullifier2 = spent_nullifiers.get(1).copied().unwrap_or(Hash::ZERO);

		let mut view_notes = [Vec::new(), Vec::new()];
		for (position, note) in [&output1, &output2].into_iter().enumerate() {
			let Some(note) = note else {
				continue;
			};
			let commitment = note_algorithms.value_note_commitment(note);
			if position == 0 {
				inner.note_commitment1 = commitment;
			} else {
				inner.note_commitment2 = commitment;
			}
			view_notes[position] = note_algorithms.encrypt_note(note)?;
		}

		let proof_data = self.services.prover.prove(&inner).await?;
		let offchain_tx_data = OffchainJoinSplitData { view_notes, tx_ref_no: 0 }.encode();
		let output = ProofOutput {
			tx_id: inner.tx_id(),
			account_public_key,
			proof_id: inner.proof_id,
			asset_id,
			value: delta,
			spent_nullifiers,
			output_notes: [output1, output2].into_iter().flatten().collect(),
			tx: Tx {
				proof_data,
				offchain_tx_data,
				deposit_signature: None,
			},
			created: Utc::now(),
		};

		account.add_proof(&output).await?;
		info!(
			"Created {:?} proof {} for account {}, value {}",
			output.proof_id, output.tx_id, account_public_key, value
		);
		Ok(output)
	}

	async fn build_account_proof(&self, request: AccountRequest) -> Result<ProofOutput, CoreSdkError> {
		let AccountRequest {
			account_public_key,
			alias_hash,
			spending_public_keys,
		} = request;
		let account = self.account_state(&account_public_key)?;
		if let Some(existing) = self.services.db.get_alias_by_hash(&alias_hash).await? {
			if existing.account_public_key != account_public_key {
				return Err(CoreSdkError::AliasAlreadyRegistered {
					alias_hash,
					owner: existing.account_public_key,
				});
			}
		}

		let note_algorithms = self.services.note_algorithms.as_ref();
		let mut inner = InnerProofData::padding();
		inner.proof_id = ProofId::Account;
		inner.note_commitment1 =
			note_algorithms.account_note_commitment(&alias_hash, &account_public_key, &spending_public_keys[0]);
		if !spending_public_keys[1].is_zero() {
			inner.note_commitment2 =
				note_algorithms.account_note_commitment(&alias_hash, &account_public_key, &spending_public_keys[1]);
		}

		let proof_data = self.services.prover.prove(&inner).await?;
		let offchain_tx_data = OffchainAccountData {
			account_public_key,
			alias_hash,
			spending_public_key1: spending_public_keys[0],
			spending_public_key2: spending_public_keys[1],
			tx_ref_no: 0,
		}
		.encode();
		let output = ProofOutput {
			tx_id: inner.tx_id(),
			account_public_key,
			proof_id: ProofId::Account,
			asset_id: 0,
			value: 0,
			spent_nullifiers: Vec::new(),
			output_notes: Vec::new(),
			tx: Tx {
				proof_data,
				offchain_tx_data,
				deposit_signature: None,
			},
			created: Utc::now(),
		};

		account.add_proof(&output).await?;
		info!("Created account proof {} for {}", output.tx_id, account_public_key);
		Ok(output)
	}
}
