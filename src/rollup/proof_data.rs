//! Decoding of rollup proof data.
//!
//! A rollup buffer is a fixed-width public-input header, `rollup_size` inner
//! proofs (padding slots are all zero), a recursive proof output placeholder,
//! the defi interaction notes and the previous defi interaction hash.

use super::codec::{DecodeError, Reader, Writer};
use crate::types::{Hash, TxId};

pub const NUM_BRIDGE_CALLS_PER_BLOCK: usize = 4;
pub const NUM_ASSETS: usize = 4;
pub const RECURSIVE_PROOF_OUTPUT_WORDS: usize = 16;
/// Each inner proof slot consumes this many leaves in the data tree.
pub const NOTES_PER_TX: u64 = 2;

const WORD: usize = 32;
pub const INNER_PROOF_LENGTH: usize = 8 * WORD;

/// Type tag of an inner proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ProofId {
	Padding = 0,
	Deposit = 1,
	Withdraw = 2,
	Send = 3,
	Account = 4,
	DefiDeposit = 5,
	DefiClaim = 6,
}

impl ProofId {
	pub fn from_u64(value: u64) -> Result<Self, DecodeError> {
		Ok(match value {
			0 => Self::Padding,
			1 => Self::Deposit,
			2 => Self::Withdraw,
			3 => Self::Send,
			4 => Self::Account,
			5 => Self::DefiDeposit,
			6 => Self::DefiClaim,
			other => return Err(DecodeError::UnknownProofId(other)),
		})
	}
}

/// One transaction slot of a rollup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerProofData {
	pub proof_id: ProofId,
	pub note_commitment1: Hash,
	pub note_commitment2: Hash,
	pub nullifier1: Hash,
	pub nullifier2: Hash,
	pub public_value: u128,
	pub public_owner: Hash,
	pub asset_id: u32,
}

impl InnerProofData {
	pub fn padding() -> Self {
		Self {
			proof_id: ProofId::Padding,
			note_commitment1: Hash::ZERO,
			note_commitment2: Hash::ZERO,
			nullifier1: Hash::ZERO,
			nullifier2: Hash::ZERO,
			public_value: 0,
			public_owner: Hash::ZERO,
			asset_id: 0,
		}
	}

	pub fn is_padding(&self) -> bool {
		self.proof_id == ProofId::Padding
	}

	pub(crate) fn decode(reader: &mut Reader<'_>) -> Result<Self, DecodeError> {
		Ok(Self {
			proof_id: ProofId::from_u64(reader.word_u64()?)?,
			note_commitment1: reader.word()?,
			note_commitment2: reader.word()?,
			nullifier1: reader.word()?,
			nullifier2: reader.word()?,
			public_value: reader.word_u128()?,
			public_owner: reader.word()?,
			asset_id: reader.word_u32()?,
		})
	}

	pub(crate) fn encode_into(&self, writer: &mut Writer) {
		writer
			.word_u64(self.proof_id as u64)
			.word(&self.note_commitment1)
			.word(&self.note_commitment2)
			.word(&self.nullifier1)
			.word(&self.nullifier2)
			.word_u128(self.public_value)
			.word(&self.public_owner)
			.word_u64(self.asset_id as u64);
	}

	pub fn to_bytes(&self) -> Vec<u8> {
		let mut writer = Writer::new();
		self.encode_into(&mut writer);
		writer.into_inner()
	}

	pub fn tx_id(&self) -> TxId {
		TxId::from_proof_bytes(&self.to_bytes())
	}

	pub fn note_commitments(&self) -> [Hash; 2] {
		[self.note_commitment1, self.note_commitment2]
	}

	pub fn nullifiers(&self) -> [Hash; 2] {
		[self.nullifier1, self.nullifier2]
	}
}

/// Decoded rollup public inputs and inner proofs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupProofData {
	pub rollup_id: u32,
	pub rollup_size: u32,
	pub data_start_index: u64,
	pub old_data_root: Hash,
	pub new_data_root: Hash,
	pub old_null_root: Hash,
	pub new_null_root: Hash,
	pub old_data_roots_root: Hash,
	pub new_data_roots_root: Hash,
	pub old_defi_root: Hash,
	pub new_defi_root: Hash,
	pub bridge_call_datas: [Hash; NUM_BRIDGE_CALLS_PER_BLOCK],
	pub defi_deposit_sums: [u128; NUM_BRIDGE_CALLS_PER_BLOCK],
	pub asset_ids: [u32; NUM_ASSETS],
	pub total_tx_fees: [u128; NUM_ASSETS],
	pub num_rollup_txs: u32,
	/// Exactly `rollup_size` entries, padding included.
	pub inner_proofs: Vec<InnerProofData>,
	pub defi_interaction_notes: [Hash; NUM_BRIDGE_CALLS_PER_BLOCK],
	pub prev_defi_interaction_hash: Hash,
}

impl RollupProofData {
	pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
		let mut reader = Reader::new(buf);

		let rollup_id = reader.word_u32()?;
		let rollup_size = reader.word_u32()?;
		let data_start_index = reader.word_u64()?;
		let old_data_root = reader.word()?;
		let new_data_root = reader.word()?;
		let old_null_root = reader.word()?;
		let new_null_root = reader.word()?;
		let old_data_roots_root = reader.word()?;
		let new_data_roots_root = reader.word()?;
		let old_defi_root = reader.word()?;
		let new_defi_root = reader.word()?;

		let mut bridge_call_datas = [Hash::ZERO; NUM_BRIDGE_CALLS_PER_BLOCK];
		for value in bridge_call_datas.iter_mut() {
			*value = reader.word()?;
		}
		let mut defi_deposit_sums = [0u128; NUM_BRIDGE_CALLS_PER_BLOCK];
		for value in defi_deposit_sums.iter_mut() {
			*value = reader.word_u128()?;
		}
		let mut asset_ids = [0u32; NUM_ASSETS];
		for value in asset_ids.iter_mut() {
			*value = reader.word_u32()?;
		}
		let mut total_tx_fees = [0u128; NUM_ASSETS];
		for value in total_tx_fees.iter_mut() {
			*value = reader.word_u128()?;
		}
		let num_rollup_txs = reader.word_u32()?;

		if rollup_size == 0 {
			return Err(DecodeError::InvalidRollup("rollup size is zero".to_string()));
		}
		if num_rollup_txs > rollup_size {
			return Err(DecodeError::InvalidRollup(format!(
				"{} txs declared in a rollup of size {}",
				num_rollup_txs, rollup_size
			)));
		}
		let expected = (rollup_size as usize).saturating_mul(INNER_PROOF_LENGTH);
		if reader.remaining() < expected {
			return Err(DecodeError::UnexpectedEnd {
				offset: reader.offset(),
				needed: expected,
				available: reader.remaining(),
			});
		}

		let inner_proofs = (0..rollup_size)
			.map(|_| InnerProofData::decode(&mut reader))
			.collect::<Result<Vec<_>, _>>()?;

		// Recursive proof output is opaque to the client.
		reader.take(RECURSIVE_PROOF_OUTPUT_WORDS * WORD)?;

		let mut defi_interaction_notes = [Hash::ZERO; NUM_BRIDGE_CALLS_PER_BLOCK];
		for value in defi_interaction_notes.iter_mut() {
			*value = reader.word()?;
		}
		let prev_defi_interaction_hash = reader.word()?;
		reader.finish()?;

		Ok(Self {
			rollup_id,
			rollup_size,
			data_start_index,
			old_data_root,
			new_data_root,
			old_null_root,
			new_null_root,
			old_data_roots_root,
			new_data_roots_root,
			old_defi_root,
			new_defi_root,
			bridge_call_datas,
			defi_deposit_sums,
			asset_ids,
			total_tx_fees,
			num_rollup_txs,
			inner_proofs,
			defi_interaction_notes,
			prev_defi_interaction_hash,
		})
	}

	pub fn encode(&self) -> Vec<u8> {
		let mut writer = Writer::new();
		writer
			.word_u64(self.rollup_id as u64)
			.word_u64(self.rollup_size as u64)
			.word_u64(self.data_start_index)
			.word(&self.old_data_root)
			.word(&self.new_data_root)
			.word(&self.old_null_root)
			.word(&self.new_null_root)
			.word(&self.old_data_roots_root)
			.word(&self.new_data_roots_root)
			.word(&self.old_defi_root)
			.word(&self.new_defi_root);
		for value in &self.bridge_call_datas {
			writer.word(value);
		}
		for value in &self.defi_deposit_sums {
			writer.word_u128(*value);
		}
		for value in &self.asset_ids {
			writer.word_u64(*value as u64);
		}
		for value in &self.total_tx_fees {
			writer.word_u128(*value);
		}
		writer.word_u64(self.num_rollup_txs as u64);
		for proof in &self.inner_proofs {
			proof.encode_into(&mut writer);
		}
		writer.bytes(&[0u8; RECURSIVE_PROOF_OUTPUT_WORDS * WORD]);
		for value in &self.defi_interaction_notes {
			writer.word(value);
		}
		writer.word(&self.prev_defi_interaction_hash);
		writer.into_inner()
	}

	/// All note commitments of the rollup in leaf order, two per slot.
	pub fn note_commitments(&self) -> Vec<Hash> {
		self.inner_proofs
			.iter()
			.flat_map(|proof| proof.note_commitments())
			.collect()
	}

	/// Non-padding inner proofs paired with their slot index and their index
	/// into the block's offchain data.
	pub fn real_proofs(&self) -> impl Iterator<Item = (usize, usize, &InnerProofData)> {
		self.inner_proofs
			.iter()
			.enumerate()
			.filter(|(_, proof)| !proof.is_padding())
			.enumerate()
			.map(|(offchain_index, (slot, proof))| (slot, offchain_index, proof))
	}

	/// Leaf index of the first note commitment of `slot`.
	pub fn slot_leaf_index(&self, slot: usize) -> u64 {
		self.data_start_index + slot as u64 * NOTES_PER_TX
	}
}
