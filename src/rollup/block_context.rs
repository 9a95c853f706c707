use super::codec::DecodeError;
use super::offchain::OffchainTxData;
use super::proof_data::{InnerProofData, RollupProofData};
use crate::provider::Block;

use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A decoded block, shared read-only between the core tree and every AccountState.
#[derive(Debug, Clone)]
pub struct BlockContext {
	pub rollup: RollupProofData,
	/// Decoded offchain data, parallel to the non-padding inner proofs.
	pub offchain_tx_data: Vec<OffchainTxData>,
	pub created: DateTime<Utc>,
}

impl BlockContext {
	pub fn from_block(block: &Block) -> Result<Arc<Self>, DecodeError> {
		let rollup = RollupProofData::decode(&block.rollup_proof_data)?;
		if rollup.rollup_id != block.rollup_id {
			return Err(DecodeError::InvalidRollup(format!(
				"block {} carries proof data for rollup {}",
				block.rollup_id, rollup.rollup_id
			)));
		}

		let real_proofs = rollup.real_proofs().count();
		if block.offchain_tx_data.len() != real_proofs {
			return Err(DecodeError::InvalidRollup(format!(
				"rollup {} has {} real proofs but {} offchain entries",
				rollup.rollup_id,
				real_proofs,
				block.offchain_tx_data.len()
			)));
		}

		let offchain_tx_data = rollup
			.real_proofs()
			.map(|(_, offchain_index, proof)| OffchainTxData::decode(proof.proof_id, &block.offchain_tx_data[offchain_index]))
			.collect::<Result<Vec<_>, _>>()?;

		Ok(Arc::new(Self {
			rollup,
			offchain_tx_data,
			created: block.created,
		}))
	}

	pub fn rollup_id(&self) -> u32 {
		self.rollup.rollup_id
	}

	/// Non-padding proofs with their slot, leaf index and offchain data.
	pub fn transactions(&self) -> impl Iterator<Item = BlockTransaction<'_>> {
		self.rollup
			.real_proofs()
			.map(move |(slot, offchain_index, proof)| BlockTransaction {
				slot,
				leaf_index: self.rollup.slot_leaf_index(slot),
				proof,
				offchain: &self.offchain_tx_data[offchain_index],
			})
	}
}

/// One real transaction inside a block.
#[derive(Debug, Clone, Copy)]
pub struct BlockTransaction<'a> {
	pub slot: usize,
	/// Leaf index of the slot's first note commitment.
	pub leaf_index: u64,
	pub proof: &'a InnerProofData,
	pub offchain: &'a OffchainTxData,
}
