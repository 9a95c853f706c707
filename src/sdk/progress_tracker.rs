//! Progress tracking for the core sync.
//!
//! [`SyncProgressTracker`] follows the highest rollup the core tree has
//! accepted during this session and the gaps seen on the way, counts the
//! transactions they carried and the batches forwarded to account states,
//! and logs progress periodically. A repair starts a fresh session.

use tracing::{info, warn};

const LOG_EVERY_ROLLUPS: u32 = 1000;

#[derive(Debug, Clone)]
pub struct SyncProgressTracker {
	start_rollup: Option<u32>,
	highest_rollup: Option<u32>,
	rollups_processed: usize,
	gaps: Vec<(u32, u32)>,
	transactions_processed: usize,
	account_batches: usize,
	last_logged_rollup: u32,
}

impl Default for SyncProgressTracker {
	fn default() -> Self {
		Self::new()
	}
}

impl SyncProgressTracker {
	pub fn new() -> Self {
		Self {
			start_rollup: None,
			highest_rollup: None,
			rollups_processed: 0,
			gaps: Vec::new(),
			transactions_processed: 0,
			account_batches: 0,
			last_logged_rollup: 0,
		}
	}

	/// Record a rollup accepted into the core tree. Ids at or below the
	/// highest one seen are ignored.
	pub fn record_rollup(&mut self, rollup_id: u32, transactions: usize) {
		match self.highest_rollup {
			Some(highest) if rollup_id <= highest => return,
			Some(highest) if rollup_id > highest + 1 => self.gaps.push((highest, rollup_id)),
			Some(_) => {}
			None => {
				self.start_rollup = Some(rollup_id);
				self.last_logged_rollup = rollup_id;
			}
		}
		self.highest_rollup = Some(rollup_id);
		self.rollups_processed += 1;
		self.transactions_processed += transactions;
	}

	/// Record a batch forwarded to account states.
	pub fn record_account_batch(&mut self) {
		self.account_batches += 1;
	}

	/// Missing ranges between recorded rollups, as `(before, after)` pairs.
	pub fn check_for_gaps(&self) -> Vec<(u32, u32)> {
		self.gaps.clone()
	}

	/// Log every 1000 rollups, or now when forced.
	pub fn log_progress(&mut self, force: bool) {
		let Some(highest) = self.highest_rollup else {
			return;
		};
		if force || highest.saturating_sub(self.last_logged_rollup) >= LOG_EVERY_ROLLUPS {
			info!(
				"Sync progress: {} rollups with {} transactions applied, at rollup {}",
				self.rollups_processed,
				self.transactions_processed,
				highest
			);
			self.last_logged_rollup = highest;
		}
	}

	pub fn get_stats(&self) -> SyncStats {
		SyncStats {
			start_rollup: self.start_rollup,
			highest_rollup: self.highest_rollup,
			rollups_processed: self.rollups_processed,
			transactions_processed: self.transactions_processed,
			account_batches: self.account_batches,
			gaps: self.check_for_gaps(),
		}
	}

	/// Ends the session, warning about gaps.
	pub fn reset(&mut self) {
		for (before, after) in self.check_for_gaps() {
			warn!("Sync session skipped rollups between {} and {}", before, after);
		}
		*self = Self::new();
	}
}

/// Summary of a sync session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStats {
	pub start_rollup: Option<u32>,
	pub highest_rollup: Option<u32>,
	pub rollups_processed: usize,
	pub transactions_processed: usize,
	pub account_batches: usize,
	pub gaps: Vec<(u32, u32)>,
}

impl SyncStats {
	pub fn summary(&self) -> String {
		match (self.start_rollup, self.highest_rollup) {
			(Some(start), Some(highest)) => format!(
				"Synced rollups {} to {}: {} rollups, {} transactions, {} account batches{}",
				start,
				highest,
				self.rollups_processed,
				self.transactions_processed,
				self.account_batches,
				if self.gaps.is_empty() {
					String::new()
				} else {
					format!(" ({} gaps)", self.gaps.len())
				}
			),
			_ => format!("No rollups synced, {} account batches", self.account_batches),
		}
	}
}
