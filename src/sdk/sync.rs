//! The sync engine: genesis bootstrap, the sync loop and its steps.

use super::{CoreSdkError, CoreSdkInner, SdkInitState};
use crate::account::AccountState;
use crate::aliases::{RegistryUpdates, genesis_records, parse_genesis_accounts, process_aliases};
use crate::events::SdkEvent;
use crate::provider::{Block, InitialWorldState};
use crate::rollup::BlockContext;
use crate::storage::{GENESIS_DATA_KEY, read_synced_to_rollup, write_synced_to_rollup};
use crate::types::{Hash, RollupMarker, UNSYNCED};
use crate::world_state::{WorldState, subtree_root};

use serde_json::json;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What one `sync` step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
	/// Nothing to fetch.
	UpToDate,
	/// Lagging accounts were fed blocks the core tree already holds.
	AccountsCaughtUp,
	/// A batch was applied to the core tree and forwarded to accounts.
	Synced,
	/// The tree disagreed with a batch root or with the stored sync marker
	/// and was rebuilt from genesis.
	Repaired,
}

/// Runs until the SDK leaves `Running`.
pub(super) async fn run_sync_loop(inner: Arc<CoreSdkInner>) {
	info!("Sync loop started");
	while inner.init_state() == SdkInitState::Running {
		let started = Instant::now();
		let result = match inner.queue() {
			Ok(queue) => {
				let task_inner = inner.clone();
				queue
					.push(move || async move { task_inner.sync().await })
					.await
					.map_err(CoreSdkError::from)
					.and_then(|result| result)
			}
			Err(e) => Err(e),
		};
		if inner.init_state() != SdkInitState::Running {
			break;
		}

		let delay = match result {
			Ok(step) => {
				debug!("Sync step: {:?}", step);
				if inner.is_fully_synced() {
					inner.options.poll_interval
				} else {
					catch_up_delay(started.elapsed(), inner.options.min_sync_interval)
				}
			}
			Err(e) => {
				error!("Sync failed: {}", e);
				inner
					.console_report("Sync failed", json!({ "error": e.to_string() }))
					.await;
				inner.options.sync_error_backoff
			}
		};
		let outcome = inner.sleep.sleep(delay).await;
		debug!("Sync loop woke up: {:?}", outcome);
	}
	info!("Sync loop stopped");
}

/// Pause before the next iteration while still catching up. A step shorter
/// than `min_sync_interval` waits the whole interval, a longer one not at all.
fn catch_up_delay(elapsed: Duration, min_sync_interval: Duration) -> Duration {
	if elapsed < min_sync_interval {
		min_sync_interval
	} else {
		Duration::ZERO
	}
}

/// Decodes `blocks`, which must be consecutive rollups starting at `from`.
fn decode_blocks(blocks: &[Block], from: u32) -> Result<Vec<Arc<BlockContext>>, CoreSdkError> {
	blocks
		.iter()
		.zip(from..)
		.map(|(block, expected)| {
			if block.rollup_id != expected {
				return Err(CoreSdkError::NonContiguousBlocks {
					expected,
					actual: block.rollup_id,
				});
			}
			let context = BlockContext::from_block(block)?;
			debug!(
				"Decoded rollup {} with {} transactions",
				context.rollup_id(),
				context.offchain_tx_data.len()
			);
			Ok(context)
		})
		.collect()
}

/// Feeds each account the blocks past its own marker, all accounts in parallel.
async fn forward_to_accounts(
	accounts: &[Arc<dyn AccountState>],
	blocks: &[Arc<BlockContext>],
) -> Result<usize, CoreSdkError> {
	let tasks = accounts.iter().filter_map(|account| {
		let synced = account.synced_to_rollup();
		let pending: Vec<Arc<BlockContext>> = blocks
			.iter()
			.filter(|block| i64::from(block.rollup_id()) > synced)
			.cloned()
			.collect();
		if pending.is_empty() {
			return None;
		}
		let account = account.clone();
		Some(async move { account.process_blocks(&pending).await })
	});

	let results = futures::future::join_all(tasks).await;
	let forwarded = results.len();
	for result in results {
		result?;
	}
	Ok(forwarded)
}

impl CoreSdkInner {
	/// One sync step. Must run on the queue.
	pub(super) async fn sync(self: &Arc<Self>) -> Result<SyncStep, CoreSdkError> {
		let synced = read_synced_to_rollup(self.services.db.as_ref()).await?;
		let latest = self.services.provider.get_latest_rollup_id().await?;
		{
			let mut world_state = self.world_state.lock().await;
			world_state.sync_from_db().await?;
			// The root history holds the genesis root plus one root per applied rollup.
			let roots_size = world_state.get_roots_size()?;
			if synced != UNSYNCED && roots_size < u64::try_from(synced + 2).unwrap_or(u64::MAX) {
				let data_size = world_state.get_size()?;
				error!(
					"Sync marker at rollup {} but the tree only holds {} roots. Rebuilding from genesis",
					synced, roots_size
				);
				let subtree_depth = world_state.subtree_depth()?;
				self.repair(&mut world_state, subtree_depth).await?;
				drop(world_state);
				self.report(
					"World state behind sync marker",
					json!({
						"syncedToRollup": synced,
						"rootsSize": roots_size,
						"dataSize": data_size,
					}),
				)
				.await;
				return Ok(SyncStep::Repaired);
			}
			let (data_root, data_size) = (world_state.get_root()?, world_state.get_size()?);
			self.status.send_modify(|status| {
				status.synced_to_rollup = synced;
				status.latest_rollup_id = latest.max(synced);
				status.data_root = data_root;
				status.data_size = data_size;
			});
		}

		let accounts = self.account_states();
		for account in &accounts {
			account.sync_from_db().await?;
		}
		let user_synced = accounts
			.iter()
			.map(|account| account.synced_to_rollup())
			.min()
			.unwrap_or(synced);

		if user_synced < synced {
			self.sync_user_states(&accounts, user_synced + 1, synced).await
		} else if synced < latest {
			self.sync_both(u32::try_from(synced + 1).unwrap_or(0)).await
		} else {
			Ok(SyncStep::UpToDate)
		}
	}

	/// Forwards already applied rollups `from..=to` to the accounts behind `to`.
	async fn sync_user_states(
		&self,
		accounts: &[Arc<dyn AccountState>],
		from: RollupMarker,
		to: RollupMarker,
	) -> Result<SyncStep, CoreSdkError> {
		let from = u32::try_from(from).unwrap_or(0);
		let remaining = u32::try_from(to - i64::from(from) + 1).unwrap_or(0);
		let take = self.options.batch_size_from(from).min(remaining);
		let blocks = self.services.provider.get_blocks(from, take).await?;
		if blocks.is_empty() {
			warn!("Provider returned no blocks from rollup {} for lagging accounts", from);
			return Ok(SyncStep::AccountsCaughtUp);
		}
		let blocks = decode_blocks(&blocks, from)?;
		let blocks: Vec<Arc<BlockContext>> = blocks
			.into_iter()
			.filter(|block| i64::from(block.rollup_id()) <= to)
			.collect();

		let lagging: Vec<Arc<dyn AccountState>> = accounts
			.iter()
			.filter(|account| account.synced_to_rollup() < to)
			.cloned()
			.collect();
		let forwarded = forward_to_accounts(&lagging, &blocks).await?;
		self.progress
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.record_account_batch();
		info!(
			"Forwarded rollups {} to {} to {} lagging accounts",
			from,
			from + blocks.len() as u32 - 1,
			forwarded
		);
		Ok(SyncStep::AccountsCaughtUp)
	}

	/// Applies the next batch from `from` to the core tree and every account.
	async fn sync_both(self: &Arc<Self>, from: u32) -> Result<SyncStep, CoreSdkError> {
		let take = self.options.batch_size_from(from);
		let blocks = self.services.provider.get_blocks(from, take).await?;
		if blocks.is_empty() {
			return Ok(SyncStep::UpToDate);
		}
		let blocks = decode_blocks(&blocks, from)?;

		match self.apply_batch(&blocks).await {
			Ok(step) => Ok(step),
			Err(e) => {
				error!("Failed to apply rollups from {}: {}", from, e);
				self.report(
					"Failed to apply rollups",
					json!({
						"from": from,
						"batchSize": blocks.len(),
						"error": e.to_string(),
					}),
				)
				.await;
				Err(e)
			}
		}
	}

	async fn apply_batch(self: &Arc<Self>, blocks: &[Arc<BlockContext>]) -> Result<SyncStep, CoreSdkError> {
		let (Some(first), Some(last)) = (blocks.first(), blocks.last()) else {
			return Ok(SyncStep::UpToDate);
		};
		let mut world_state = self.world_state.lock().await;
		let subtree_depth = world_state.subtree_depth()?;
		let subtree_roots: Vec<Hash> = blocks
			.iter()
			.map(|block| subtree_root(self.services.hasher.as_ref(), &block.rollup.note_commitments(), subtree_depth))
			.collect();
		let new_data_roots: Vec<Hash> = blocks.iter().map(|block| block.rollup.new_data_root).collect();

		let old_root = world_state.get_root()?;
		let old_size = world_state.get_size()?;
		let staged = async {
			world_state
				.insert_elements(first.rollup.data_start_index, &subtree_roots)
				.await?;
			world_state
				.insert_roots(u64::from(first.rollup_id()) + 1, &new_data_roots)
				.await?;
			Ok::<_, CoreSdkError>((world_state.pending_root()?, world_state.pending_size()?))
		}
		.await;
		let (new_root, new_size) = match staged {
			Ok(pending) => pending,
			Err(e) => {
				world_state.rollback();
				return Err(e);
			}
		};

		let expected_root = last.rollup.new_data_root;
		if new_root != expected_root {
			error!(
				"Rollup {} claims data root {}, local tree reached {}. Rebuilding from genesis",
				last.rollup_id(),
				expected_root,
				new_root
			);
			self.repair(&mut world_state, subtree_depth).await?;
			drop(world_state);
			self.report(
				"Merkle tree root mismatch",
				json!({
					"firstRollupId": first.rollup_id(),
					"lastRollupId": last.rollup_id(),
					"oldRoot": old_root,
					"newRoot": new_root,
					"expectedRoot": expected_root,
					"batchSize": blocks.len(),
					"oldSize": old_size,
					"newSize": new_size,
				}),
			)
			.await;
			return Ok(SyncStep::Repaired);
		}

		let committed = async {
			let updates = process_aliases(blocks, self.services.note_algorithms.as_ref());
			self.persist_registry(&updates).await?;
			world_state.commit().await?;
			write_synced_to_rollup(self.services.db.as_ref(), i64::from(last.rollup_id())).await?;
			self.flush_stores().await?;
			Ok::<_, CoreSdkError>(())
		}
		.await;
		if let Err(e) = committed {
			world_state.rollback();
			return Err(e);
		}
		drop(world_state);

		let synced = i64::from(last.rollup_id());
		let latest = {
			let mut latest = 0;
			self.status.send_modify(|status| {
				status.synced_to_rollup = synced;
				status.latest_rollup_id = status.latest_rollup_id.max(synced);
				status.data_root = new_root;
				status.data_size = new_size;
				latest = status.latest_rollup_id;
			});
			latest
		};
		{
			let mut progress = self.progress.lock().unwrap_or_else(PoisonError::into_inner);
			for block in blocks {
				progress.record_rollup(block.rollup_id(), block.offchain_tx_data.len());
			}
			progress.log_progress(synced >= latest);
		}
		info!(
			"Applied rollups {} to {}, data size {}",
			first.rollup_id(),
			last.rollup_id(),
			new_size
		);

		let forwarded = forward_to_accounts(&self.account_states(), blocks).await?;
		if forwarded > 0 {
			self.progress
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.record_account_batch();
		}

		self.sink.emit(SdkEvent::WorldStateUpdated {
			synced_to_rollup: synced,
			latest_rollup_id: latest,
		});
		Ok(SyncStep::Synced)
	}

	/// Discards the tree and rebuilds its genesis skeleton. Aliases and
	/// account progress are left as they are.
	async fn repair(&self, world_state: &mut WorldState, subtree_depth: u32) -> Result<(), CoreSdkError> {
		world_state.rollback();
		self.services.kv.clear().await?;
		world_state.init(subtree_depth).await?;
		write_synced_to_rollup(self.services.db.as_ref(), UNSYNCED).await?;
		self.status.send_modify(|status| status.synced_to_rollup = UNSYNCED);
		self.progress.lock().unwrap_or_else(PoisonError::into_inner).reset();
		self.genesis_sync_with(world_state, true).await?;
		Ok(())
	}

	/// Bootstraps an empty tree from the genesis blob. Returns false when the
	/// tree already holds data.
	pub(super) async fn genesis_sync(&self, commitments_only: bool) -> Result<bool, CoreSdkError> {
		let mut world_state = self.world_state.lock().await;
		self.genesis_sync_with(&mut world_state, commitments_only).await
	}

	async fn genesis_sync_with(
		&self,
		world_state: &mut WorldState,
		commitments_only: bool,
	) -> Result<bool, CoreSdkError> {
		world_state.sync_from_db().await?;
		if world_state.get_size()? > 0 || world_state.get_roots_size()? > 0 {
			debug!("World state already initialized, skipping genesis");
			return Ok(false);
		}

		let initial = self.load_initial_world_state().await?;
		let applied = async {
			world_state.insert_elements(0, &initial.initial_subtree_roots).await?;
			let root = world_state.pending_root()?;
			world_state.insert_roots(0, &[root]).await?;
			if !commitments_only {
				let accounts = parse_genesis_accounts(&initial.initial_accounts)?;
				self.persist_registry(&genesis_records(&accounts)).await?;
				info!("Registered {} genesis accounts", accounts.len());
			}
			world_state.commit().await?;
			self.flush_stores().await?;
			Ok::<_, CoreSdkError>(())
		}
		.await;
		if let Err(e) = applied {
			world_state.rollback();
			return Err(e);
		}

		let (data_root, data_size) = (world_state.get_root()?, world_state.get_size()?);
		self.status.send_modify(|status| {
			status.data_root = data_root;
			status.data_size = data_size;
		});
		info!(
			"Genesis applied: {} subtree roots, data size {}, root {}",
			initial.initial_subtree_roots.len(),
			data_size,
			data_root
		);
		Ok(true)
	}

	/// The genesis blob, fetched once and then served from the database.
	async fn load_initial_world_state(&self) -> Result<InitialWorldState, CoreSdkError> {
		let db = self.services.db.as_ref();
		if let Some(bytes) = db.get_key(GENESIS_DATA_KEY).await? {
			debug!("Using stored genesis data ({} bytes)", bytes.len());
			return Ok(bincode::deserialize(&bytes)?);
		}
		info!("Fetching genesis data from the rollup provider");
		let initial = self.services.provider.get_initial_world_state().await?;
		db.set_key(GENESIS_DATA_KEY, bincode::serialize(&initial)?).await?;
		Ok(initial)
	}

	/// Persists the tree before the database holding the sync marker.
	async fn flush_stores(&self) -> Result<(), CoreSdkError> {
		self.services.kv.flush().await?;
		self.services.db.flush().await?;
		Ok(())
	}

	async fn persist_registry(&self, updates: &RegistryUpdates) -> Result<(), CoreSdkError> {
		if updates.is_empty() {
			return Ok(());
		}
		self.services.db.set_aliases(&updates.aliases).await?;
		self.services.db.add_spending_keys(&updates.spending_keys).await?;
		debug!(
			"Stored {} aliases and {} spending keys",
			updates.aliases.len(),
			updates.spending_keys.len()
		);
		Ok(())
	}
}
