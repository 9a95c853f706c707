//! CoreSdk configuration.

use std::time::Duration;

/// Current local schema version. A stored value that differs triggers a full
/// erase of local durable state on init.
pub const DATA_VERSION: u32 = 1;

/// Rollups are requested in chunks of this size, aligned to its multiples.
pub const DEFAULT_BLOCK_BATCH_SIZE: u32 = 128;

/// How the SerialQueue serializes tasks.
#[derive(Debug, Clone, Default)]
pub enum SerialQueueMode {
	/// Tasks are serialized within this process only.
	#[default]
	InProcess,
	/// Tasks additionally hold a named lease in the shared database so that
	/// several processes sharing one storage volume never interleave.
	CrossProcess {
		/// Name of the lock record.
		name: String,
		/// Lease lifetime. The holder extends it while a task runs.
		lease_ttl: Duration,
		/// Interval between acquisition retries and lease extensions.
		ping_interval: Duration,
	},
}

impl SerialQueueMode {
	pub fn cross_process(name: impl Into<String>) -> Self {
		Self::CrossProcess {
			name: name.into(),
			lease_ttl: Duration::from_secs(10),
			ping_interval: Duration::from_millis(500),
		}
	}
}

/// Options for a CoreSdk instance.
#[derive(Debug, Clone)]
pub struct CoreSdkOptions {
	/// Sleep between sync iterations once fully caught up.
	pub poll_interval: Duration,
	/// Minimum length of a sync iteration while still catching up.
	pub min_sync_interval: Duration,
	/// Sleep after a failed sync iteration.
	pub sync_error_backoff: Duration,
	/// Maximum number of rollups requested per batch.
	pub block_batch_size: u32,
	/// Local/cross-process serialization mode.
	pub serial_queue: SerialQueueMode,
	/// Schema marker persisted alongside the rollup contract address.
	pub data_version: u32,
	/// Identifies this instance on the cross-process broadcast channel.
	/// A random id is generated when unset.
	pub instance_id: Option<String>,
}

impl Default for CoreSdkOptions {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_secs(10),
			min_sync_interval: Duration::from_secs(1),
			sync_error_backoff: Duration::from_secs(10),
			block_batch_size: DEFAULT_BLOCK_BATCH_SIZE,
			serial_queue: SerialQueueMode::InProcess,
			data_version: DATA_VERSION,
			instance_id: None,
		}
	}
}

impl CoreSdkOptions {
	/// Number of blocks to ask for when fetching from `from`. The first batch
	/// after genesis is shortened so later batches start on a multiple of the
	/// batch size.
	pub fn batch_size_from(&self, from: u32) -> u32 {
		let batch = self.block_batch_size.max(1);
		batch - (from % batch)
	}
}
