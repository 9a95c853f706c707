//! Append-only Merkle tree stored node by node in a [`KeyValueStore`].
//!
//! Level 0 holds the leaves, level `depth` the root. Absent nodes are the
//! precomputed zero hash of their level. Writes are staged in memory until
//! [`MerkleTree::commit`] flushes them, together with the new root and size,
//! in a single batch.

use super::WorldStateError;
use crate::crypto::Hasher;
use crate::storage::KeyValueStore;
use crate::types::Hash;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct TreeMeta {
	root: Hash,
	size: u64,
	depth: u32,
}

pub struct MerkleTree {
	store: Arc<dyn KeyValueStore>,
	hasher: Arc<dyn Hasher>,
	name: String,
	depth: u32,
	zero_hashes: Vec<Hash>,
	root: Hash,
	size: u64,
	staged: HashMap<(u32, u64), Hash>,
	pending_root: Hash,
	pending_size: u64,
}

impl MerkleTree {
	/// Opens the tree `name`, loading whatever has been committed before.
	pub async fn open(
		store: Arc<dyn KeyValueStore>,
		hasher: Arc<dyn Hasher>,
		name: &str,
		depth: u32,
	) -> Result<Self, WorldStateError> {
		let mut zero_hashes = Vec::with_capacity(depth as usize + 1);
		zero_hashes.push(Hash::ZERO);
		for level in 0..depth as usize {
			let zero = zero_hashes[level];
			zero_hashes.push(hasher.compress(&zero, &zero));
		}
		let empty_root = zero_hashes[depth as usize];

		let mut tree = Self {
			store,
			hasher,
			name: name.to_string(),
			depth,
			zero_hashes,
			root: empty_root,
			size: 0,
			staged: HashMap::new(),
			pending_root: empty_root,
			pending_size: 0,
		};
		tree.sync_from_db().await?;
		Ok(tree)
	}

	/// Committed root.
	pub fn root(&self) -> Hash {
		self.root
	}

	/// Committed number of leaves.
	pub fn size(&self) -> u64 {
		self.size
	}

	pub fn pending_root(&self) -> Hash {
		self.pending_root
	}

	pub fn pending_size(&self) -> u64 {
		self.pending_size
	}

	fn meta_key(&self) -> String {
		format!("{}:meta", self.name)
	}

	fn node_key(&self, level: u32, index: u64) -> String {
		format!("{}:{}:{}", self.name, level, index)
	}

	/// Discards staged writes and reloads root and size from the store.
	pub async fn sync_from_db(&mut self) -> Result<(), WorldStateError> {
		self.staged.clear();
		match self.store.get(&self.meta_key()).await? {
			Some(bytes) => {
				let meta: TreeMeta = bincode::deserialize(&bytes)?;
				if meta.depth != self.depth {
					return Err(WorldStateError::DepthMismatch {
						name: self.name.clone(),
						stored: meta.depth,
						expected: self.depth,
					});
				}
				self.root = meta.root;
				self.size = meta.size;
			}
			None => {
				self.root = self.zero_hashes[self.depth as usize];
				self.size = 0;
			}
		}
		self.pending_root = self.root;
		self.pending_size = self.size;
		Ok(())
	}

	async fn node(&self, level: u32, index: u64) -> Result<Hash, WorldStateError> {
		if let Some(hash) = self.staged.get(&(level, index)) {
			return Ok(*hash);
		}
		match self.store.get(&self.node_key(level, index)).await? {
			Some(bytes) => Hash::from_slice(&bytes).ok_or_else(|| {
				WorldStateError::CorruptNode {
					key: self.node_key(level, index),
					len: bytes.len(),
				}
			}),
			None => Ok(self.zero_hashes[level as usize]),
		}
	}

	/// Stages `values` at `level` starting at `start` and recomputes every
	/// ancestor. Each node at `level` covers `2^level` leaves.
	pub async fn update_elements(&mut self, level: u32, start: u64, values: &[Hash]) -> Result<(), WorldStateError> {
		if values.is_empty() {
			return Ok(());
		}
		let end = start + values.len() as u64;
		let capacity = 1u64 << self.depth.saturating_sub(level);
		if level > self.depth || end > capacity {
			return Err(WorldStateError::OutOfRange {
				name: self.name.clone(),
				level,
				end,
				capacity,
			});
		}

		for (offset, value) in values.iter().enumerate() {
			self.staged.insert((level, start + offset as u64), *value);
		}

		let (mut lo, mut hi) = (start, end - 1);
		for current in level..self.depth {
			let (parent_lo, parent_hi) = (lo >> 1, hi >> 1);
			for parent in parent_lo..=parent_hi {
				let left = self.node(current, parent * 2).await?;
				let right = self.node(current, parent * 2 + 1).await?;
				self.staged.insert((current + 1, parent), self.hasher.compress(&left, &right));
			}
			lo = parent_lo;
			hi = parent_hi;
		}

		self.pending_root = self.node(self.depth, 0).await?;
		self.pending_size = self.pending_size.max(end << level);
		Ok(())
	}

	/// Flushes staged nodes and the new metadata in one batch.
	pub async fn commit(&mut self) -> Result<(), WorldStateError> {
		if self.staged.is_empty() {
			return Ok(());
		}
		let meta = TreeMeta {
			root: self.pending_root,
			size: self.pending_size,
			depth: self.depth,
		};
		let mut batch: Vec<(String, Vec<u8>)> = self
			.staged
			.iter()
			.map(|((level, index), hash)| (self.node_key(*level, *index), hash.0.to_vec()))
			.collect();
		batch.push((self.meta_key(), bincode::serialize(&meta)?));

		debug!("Committing {} nodes to tree {}", batch.len() - 1, self.name);
		self.store.put_batch(batch).await?;
		self.staged.clear();
		self.root = meta.root;
		self.size = meta.size;
		Ok(())
	}

	pub fn rollback(&mut self) {
		self.staged.clear();
		self.pending_root = self.root;
		self.pending_size = self.size;
	}
}
