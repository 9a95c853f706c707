use crate::provider::RollupProviderStatus;
use crate::types::{Hash, RollupMarker, UNSYNCED};

use serde::{Deserialize, Serialize};

/// Lifecycle of a CoreSdk. Transitions only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SdkInitState {
	Uninitialized,
	Initialized,
	Running,
	Stopping,
	Destroyed,
}

impl SdkInitState {
	/// Whether storage is open and the queue accepts tasks.
	pub fn is_open(&self) -> bool {
		matches!(self, Self::Initialized | Self::Running)
	}
}

/// Snapshot of the local view of the rollup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdkStatus {
	pub chain_id: u32,
	pub rollup_contract_address: String,
	pub verifier_contract_address: String,
	pub rollup_size: u32,
	pub prover_less: bool,
	pub fee_paying_asset_ids: Vec<u32>,
	pub synced_to_rollup: RollupMarker,
	pub latest_rollup_id: RollupMarker,
	pub data_root: Hash,
	pub data_size: u64,
}

impl Default for SdkStatus {
	fn default() -> Self {
		Self {
			chain_id: 0,
			rollup_contract_address: String::new(),
			verifier_contract_address: String::new(),
			rollup_size: 0,
			prover_less: false,
			fee_paying_asset_ids: Vec::new(),
			synced_to_rollup: UNSYNCED,
			latest_rollup_id: UNSYNCED,
			data_root: Hash::ZERO,
			data_size: 0,
		}
	}
}

impl SdkStatus {
	/// Copies the chain facts reported by the provider.
	pub fn apply_remote(&mut self, remote: &RollupProviderStatus) {
		self.chain_id = remote.blockchain_status.chain_id;
		self.rollup_contract_address = remote.blockchain_status.rollup_contract_address.clone();
		self.verifier_contract_address = remote.blockchain_status.verifier_contract_address.clone();
		self.rollup_size = remote.rollup_size;
		self.prover_less = remote.prover_less;
		self.fee_paying_asset_ids = remote.fee_paying_asset_ids.clone();
		self.latest_rollup_id = remote.blockchain_status.latest_rollup_id;
	}

	pub fn is_synced(&self) -> bool {
		self.synced_to_rollup >= self.latest_rollup_id
	}
}
