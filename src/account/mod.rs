//! Per-account state machines
//!
//! Every account added to the SDK gets an [`AccountState`] that replays
//! core-confirmed blocks to find its notes, nullifications and settled
//! transactions. An account's own `synced_to_rollup` marker never passes the
//! core marker: the CoreSdk only forwards blocks it has already applied.

mod note_picker;
mod user_state;

pub use note_picker::{NotePicker, SmallestFirstNotePicker};
pub use user_state::{UserState, UserStateFactory};

use crate::crypto::{NoteAlgorithms, TreeNote};
use crate::events::EventDispatcher;
use crate::provider::Tx;
use crate::rollup::{BlockContext, ProofId};
use crate::storage::{AccountRecord, Database, StorageError};
use crate::types::{Hash, PublicKey, RollupMarker, TxId};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum AccountStateError {
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),

	#[error("Proof for {actual} cannot be applied to account {expected}")]
	NotOwner { expected: PublicKey, actual: PublicKey },

	#[error("Account {account} is at rollup {synced}, cannot apply rollup {rollup_id}")]
	OutOfOrder {
		account: PublicKey,
		synced: RollupMarker,
		rollup_id: u32,
	},

	#[error("Account {account} did not reach rollup {target} in time, at {synced}")]
	Timeout {
		account: PublicKey,
		target: RollupMarker,
		synced: RollupMarker,
	},
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountStateEvent {
	Updated {
		account_public_key: PublicKey,
		synced_to_rollup: RollupMarker,
	},
}

/// A locally constructed, not yet confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofOutput {
	pub tx_id: TxId,
	pub account_public_key: PublicKey,
	pub proof_id: ProofId,
	pub asset_id: u32,
	/// Net change to the sender's balance.
	pub value: i128,
	/// Nullifiers of the notes this proof spends.
	pub spent_nullifiers: Vec<Hash>,
	/// Notes created by this proof.
	pub output_notes: Vec<TreeNote>,
	pub tx: Tx,
	pub created: DateTime<Utc>,
}

/// What the CoreSdk requires of an account's state machine.
#[async_trait::async_trait]
pub trait AccountState: Send + Sync {
	fn account_public_key(&self) -> PublicKey;

	/// Last rollup this account has fully applied.
	fn synced_to_rollup(&self) -> RollupMarker;

	/// Reloads the progress marker from storage.
	async fn sync_from_db(&self) -> Result<(), AccountStateError>;

	/// Applies core-confirmed blocks, in rollup id order.
	async fn process_blocks(&self, blocks: &[Arc<BlockContext>]) -> Result<(), AccountStateError>;

	fn is_synchronised(&self, latest_rollup_id: RollupMarker) -> bool {
		self.synced_to_rollup() >= latest_rollup_id
	}

	async fn await_synchronised(
		&self,
		latest_rollup_id: RollupMarker,
		timeout: Option<Duration>,
	) -> Result<(), AccountStateError>;

	/// Applies the effects of a local proof ahead of its confirmation.
	async fn add_proof(&self, proof: &ProofOutput) -> Result<(), AccountStateError>;

	fn events(&self) -> &EventDispatcher<AccountStateEvent>;
}

/// Builds the [`AccountState`] of a newly tracked account.
pub trait AccountStateFactory: Send + Sync {
	fn create(
		&self,
		account: AccountRecord,
		db: Arc<dyn Database>,
		note_algorithms: Arc<dyn NoteAlgorithms>,
	) -> Arc<dyn AccountState>;
}
