//! Types exchanged with the rollup provider.

use crate::types::{Hash, TxId};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chain-level facts reported by the rollup provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockchainStatus {
	pub chain_id: u32,
	pub rollup_contract_address: String,
	pub verifier_contract_address: String,
	/// Highest published rollup id, `-1` when nothing has been published.
	pub latest_rollup_id: i64,
}

/// Fee configuration for one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFee {
	pub asset_id: u32,
	pub base_fee: u128,
}

/// Response of the provider's status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupProviderStatus {
	pub blockchain_status: BlockchainStatus,
	pub rollup_size: u32,
	pub prover_less: bool,
	#[serde(default)]
	pub fee_paying_asset_ids: Vec<u32>,
	#[serde(default)]
	pub fees: Vec<AssetFee>,
}

/// A published rollup block as returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
	pub rollup_id: u32,
	pub tx_hash: Hash,
	pub created: DateTime<Utc>,
	#[serde(with = "hex::serde")]
	pub rollup_proof_data: Vec<u8>,
	/// One entry per non-padding inner proof, in slot order.
	#[serde(with = "hex_vec")]
	pub offchain_tx_data: Vec<Vec<u8>>,
	#[serde(default)]
	pub gas_used: u64,
	#[serde(default)]
	pub gas_price: u128,
}

/// Genesis state: packed per-account records plus the subtree roots covering them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialWorldState {
	#[serde(with = "hex::serde")]
	pub initial_accounts: Vec<u8>,
	pub initial_subtree_roots: Vec<Hash>,
}

/// A locally built transaction submitted to the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tx {
	#[serde(with = "hex::serde")]
	pub proof_data: Vec<u8>,
	#[serde(with = "hex::serde")]
	pub offchain_tx_data: Vec<u8>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deposit_signature: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendTxsResponse {
	pub tx_ids: Vec<TxId>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LatestRollupIdResponse {
	pub latest_rollup_id: i64,
}

/// Severity of a diagnostic record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientLogLevel {
	Info,
	Warn,
	Error,
}

/// Diagnostic record sent to the provider's client log sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientLogRecord {
	pub level: ClientLogLevel,
	pub message: String,
	pub details: serde_json::Value,
	pub timestamp: DateTime<Utc>,
}

impl ClientLogRecord {
	pub fn error(message: impl Into<String>, details: serde_json::Value) -> Self {
		Self {
			level: ClientLogLevel::Error,
			message: message.into(),
			details,
			timestamp: Utc::now(),
		}
	}

	pub fn warn(message: impl Into<String>, details: serde_json::Value) -> Self {
		Self {
			level: ClientLogLevel::Warn,
			..Self::error(message, details)
		}
	}
}

/// Error types for rollup provider requests.
#[derive(Debug, thiserror::Error)]
pub enum RollupProviderError {
	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),

	#[error("Bad response status {status} from {endpoint}")]
	BadStatus { endpoint: String, status: u16 },

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("Invalid provider URL: {0}")]
	InvalidUrl(String),

	#[error("Provider unavailable: {0}")]
	Unavailable(String),
}

/// Hex encoding for a list of byte buffers.
mod hex_vec {
	use serde::{Deserialize, Deserializer, Serializer, de::Error, ser::SerializeSeq};

	pub fn serialize<S: Serializer>(values: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
		let mut seq = serializer.serialize_seq(Some(values.len()))?;
		for value in values {
			seq.serialize_element(&hex::encode(value))?;
		}
		seq.end()
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
		let strings = Vec::<String>::deserialize(deserializer)?;
		strings
			.iter()
			.map(|s| hex::decode(s.trim_start_matches("0x")).map_err(D::Error::custom))
			.collect()
	}
}
