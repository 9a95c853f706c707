//! Rollup provider integration
//!
//! The rollup provider is an untrusted remote server publishing rollup blocks,
//! the genesis state and accepting transactions. The sync engine talks to it only
//! through the [`RollupProvider`] trait; [`ServerRollupProvider`] is the HTTP
//! implementation.

/// HTTP client for the rollup provider
mod client;
/// Wire types exchanged with the provider
mod types;

pub use client::ServerRollupProvider;
pub use types::*;

use crate::types::TxId;

use tokio::sync::broadcast;

/// Remote data feed consumed by the CoreSdk.
#[async_trait::async_trait]
pub trait RollupProvider: Send + Sync {
	async fn get_status(&self) -> Result<RollupProviderStatus, RollupProviderError>;

	/// Highest published rollup id, `-1` when none exists yet.
	async fn get_latest_rollup_id(&self) -> Result<i64, RollupProviderError>;

	/// Up to `max_count` blocks starting at rollup `from`, in rollup id order.
	async fn get_blocks(&self, from: u32, max_count: u32) -> Result<Vec<Block>, RollupProviderError>;

	async fn get_initial_world_state(&self) -> Result<InitialWorldState, RollupProviderError>;

	async fn send_txs(&self, txs: Vec<Tx>) -> Result<Vec<TxId>, RollupProviderError>;

	/// Best-effort diagnostic sink.
	async fn client_log(&self, record: ClientLogRecord) -> Result<(), RollupProviderError>;

	/// Sink for routine client console output. Providers without a separate
	/// console endpoint receive it through [`RollupProvider::client_log`].
	async fn client_console_log(&self, record: ClientLogRecord) -> Result<(), RollupProviderError> {
		self.client_log(record).await
	}

	/// Receiver for server version mismatch notifications, if the provider emits them.
	fn version_mismatch(&self) -> Option<broadcast::Receiver<String>> {
		None
	}
}
