//! Transactional world state
//!
//! [`WorldState`] wraps two append-only Merkle trees over the shared
//! key/value store: the data tree, which receives one subtree root per
//! rollup, and the root history tree, which records the data root reached
//! after genesis and after every rollup. Writes to both are staged together
//! and become visible through [`WorldState::get_root`] / [`WorldState::get_size`]
//! only once committed.

mod merkle_tree;

pub use merkle_tree::MerkleTree;

use crate::crypto::Hasher;
use crate::storage::{KeyValueStore, StorageError};
use crate::types::Hash;

use std::sync::Arc;
use tracing::debug;

pub const DATA_TREE_DEPTH: u32 = 32;
pub const ROOTS_TREE_DEPTH: u32 = 28;

const DATA_TREE_NAME: &str = "data";
const ROOTS_TREE_NAME: &str = "roots";

#[derive(Debug, thiserror::Error)]
pub enum WorldStateError {
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Tree metadata error: {0}")]
	Metadata(#[from] bincode::Error),

	#[error("World state has not been initialized")]
	NotInitialized,

	#[error("Tree {name} was stored with depth {stored}, expected {expected}")]
	DepthMismatch { name: String, stored: u32, expected: u32 },

	#[error("Corrupt node {key}: {len} bytes")]
	CorruptNode { key: String, len: usize },

	#[error("Write to tree {name} at level {level} ends at {end}, capacity is {capacity}")]
	OutOfRange {
		name: String,
		level: u32,
		end: u64,
		capacity: u64,
	},

	#[error("Insert at leaf {start} is not aligned to subtrees of {subtree_size} leaves")]
	Misaligned { start: u64, subtree_size: u64 },

	#[error("Insert at leaf {start} would leave a gap after the current size {size}")]
	Gap { start: u64, size: u64 },
}

/// Depth of the subtree one rollup occupies: `ceil(log2(rollup_size * 2))`.
pub fn subtree_depth_for(rollup_size: u32) -> u32 {
	let leaves = (rollup_size.max(1) as u64) * crate::rollup::NOTES_PER_TX;
	leaves.next_power_of_two().trailing_zeros()
}

/// Root of the subtree formed by `leaves`, zero padded to `2^subtree_depth`.
pub fn subtree_root(hasher: &dyn Hasher, leaves: &[Hash], subtree_depth: u32) -> Hash {
	let mut padded = leaves.to_vec();
	padded.resize(1usize << subtree_depth, Hash::ZERO);
	hasher.hash_to_tree(&padded)
}

struct Trees {
	subtree_depth: u32,
	data: MerkleTree,
	roots: MerkleTree,
}

pub struct WorldState {
	store: Arc<dyn KeyValueStore>,
	hasher: Arc<dyn Hasher>,
	trees: Option<Trees>,
}

impl WorldState {
	pub fn new(store: Arc<dyn KeyValueStore>, hasher: Arc<dyn Hasher>) -> Self {
		Self {
			store,
			hasher,
			trees: None,
		}
	}

	/// Opens both trees over the store. Re-opening at the same depth only
	/// re-reads committed state, which also makes this the way back after
	/// the store has been erased.
	pub async fn init(&mut self, subtree_depth: u32) -> Result<(), WorldStateError> {
		if let Some(trees) = self.trees.as_mut() {
			if trees.subtree_depth == subtree_depth {
				trees.data.sync_from_db().await?;
				trees.roots.sync_from_db().await?;
				return Ok(());
			}
		}
		let data = MerkleTree::open(self.store.clone(), self.hasher.clone(), DATA_TREE_NAME, DATA_TREE_DEPTH).await?;
		let roots = MerkleTree::open(self.store.clone(), self.hasher.clone(), ROOTS_TREE_NAME, ROOTS_TREE_DEPTH).await?;
		debug!(
			"World state opened with subtree depth {}, data size {}, root {}",
			subtree_depth,
			data.size(),
			data.root()
		);
		self.trees = Some(Trees {
			subtree_depth,
			data,
			roots,
		});
		Ok(())
	}

	fn trees(&self) -> Result<&Trees, WorldStateError> {
		self.trees.as_ref().ok_or(WorldStateError::NotInitialized)
	}

	fn trees_mut(&mut self) -> Result<&mut Trees, WorldStateError> {
		self.trees.as_mut().ok_or(WorldStateError::NotInitialized)
	}

	pub fn subtree_depth(&self) -> Result<u32, WorldStateError> {
		Ok(self.trees()?.subtree_depth)
	}

	/// Stages subtree roots so the first covers leaves from `start_index`.
	/// Rewriting already inserted subtrees is allowed, skipping past the
	/// current size is not.
	pub async fn insert_elements(&mut self, start_index: u64, subtree_roots: &[Hash]) -> Result<(), WorldStateError> {
		let trees = self.trees_mut()?;
		let subtree_size = 1u64 << trees.subtree_depth;
		if start_index % subtree_size != 0 {
			return Err(WorldStateError::Misaligned {
				start: start_index,
				subtree_size,
			});
		}
		let size = trees.data.pending_size();
		if start_index > size {
			return Err(WorldStateError::Gap {
				start: start_index,
				size,
			});
		}
		trees
			.data
			.update_elements(trees.subtree_depth, start_index / subtree_size, subtree_roots)
			.await
	}

	/// Stages data roots into the root history starting at `start_index`.
	pub async fn insert_roots(&mut self, start_index: u64, roots: &[Hash]) -> Result<(), WorldStateError> {
		let trees = self.trees_mut()?;
		trees.roots.update_elements(0, start_index, roots).await
	}

	pub async fn commit(&mut self) -> Result<(), WorldStateError> {
		let trees = self.trees_mut()?;
		trees.data.commit().await?;
		trees.roots.commit().await
	}

	pub fn rollback(&mut self) {
		if let Some(trees) = self.trees.as_mut() {
			trees.data.rollback();
			trees.roots.rollback();
		}
	}

	/// Committed data root.
	pub fn get_root(&self) -> Result<Hash, WorldStateError> {
		Ok(self.trees()?.data.root())
	}

	/// Committed number of data leaves.
	pub fn get_size(&self) -> Result<u64, WorldStateError> {
		Ok(self.trees()?.data.size())
	}

	/// Data root including staged writes.
	pub fn pending_root(&self) -> Result<Hash, WorldStateError> {
		Ok(self.trees()?.data.pending_root())
	}

	pub fn pending_size(&self) -> Result<u64, WorldStateError> {
		Ok(self.trees()?.data.pending_size())
	}

	pub fn get_roots_size(&self) -> Result<u64, WorldStateError> {
		Ok(self.trees()?.roots.size())
	}

	/// Drops staged writes and reloads both trees from the store.
	pub async fn sync_from_db(&mut self) -> Result<(), WorldStateError> {
		let trees = self.trees_mut()?;
		trees.data.sync_from_db().await?;
		trees.roots.sync_from_db().await
	}
}
