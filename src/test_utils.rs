//! Test doubles shared by the unit tests: a scripted rollup provider, a block
//! builder, a chain simulator producing consistent data roots, and an
//! AccountState factory that records every forwarded batch.

use crate::account::{
	AccountState, AccountStateError, AccountStateEvent, AccountStateFactory, ProofOutput, UserStateFactory,
};
use crate::aliases::{GenesisAccount, encode_genesis_accounts};
use crate::crypto::{DevNoteAlgorithms, NoteAlgorithms, Sha256Hasher, TreeNote};
use crate::events::EventDispatcher;
use crate::provider::{
	Block, BlockchainStatus, ClientLogRecord, InitialWorldState, RollupProvider, RollupProviderError,
	RollupProviderStatus, Tx,
};
use crate::rollup::{
	BlockContext, InnerProofData, NUM_ASSETS, NUM_BRIDGE_CALLS_PER_BLOCK, OffchainAccountData, OffchainJoinSplitData,
	ProofId, RollupProofData,
};
use crate::storage::{AccountRecord, Database, MemoryKeyValueStore};
use crate::types::{AliasHash, Hash, PrivateKey, PublicKey, RollupMarker, TxId};
use crate::world_state::{WorldState, subtree_depth_for, subtree_root};

use chrono::{DateTime, TimeZone, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// A transaction slot: inner proof plus its encoded offchain data.
#[derive(Debug, Clone)]
pub struct TestTx {
	pub proof: InnerProofData,
	pub offchain: Vec<u8>,
}

pub fn note_for(private_key: &PrivateKey, value: u128, secret: u8) -> TreeNote {
	TreeNote {
		owner: DevNoteAlgorithms.derive_public_key(private_key),
		value,
		asset_id: 0,
		note_secret: Hash([secret; 32]),
	}
}

fn join_split(proof_id: ProofId, nullifiers: &[Hash], outputs: [Option<&TreeNote>; 2], public_value: u128) -> TestTx {
	let mut proof = InnerProofData::padding();
	proof.proof_id = proof_id;
	proof.public_value = public_value;
	proof.nullifier1 = nullifiers.first().copied().unwrap_or(Hash::ZERO);
	proof.nullifier2 = nullifiers.get(1).copied().unwrap_or(Hash::ZERO);

	let mut view_notes = [Vec::new(), Vec::new()];
	for (i, output) in outputs.iter().enumerate() {
		if let Some(note) = output {
			let commitment = DevNoteAlgorithms.value_note_commitment(note);
			if i == 0 {
				proof.note_commitment1 = commitment;
			} else {
				proof.note_commitment2 = commitment;
			}
			view_notes[i] = DevNoteAlgorithms.encrypt_note(note).unwrap();
		}
	}
	let offchain = OffchainJoinSplitData {
		view_notes,
		tx_ref_no: 0,
	}
	.encode();
	TestTx { proof, offchain }
}

/// A deposit creating `note`.
pub fn deposit_tx(note: &TreeNote) -> TestTx {
	join_split(ProofId::Deposit, &[], [Some(note), None], note.value)
}

/// A send spending `nullifiers` and creating `output`.
pub fn send_tx(nullifiers: &[Hash], output: &TreeNote) -> TestTx {
	join_split(ProofId::Send, nullifiers, [Some(output), None], 0)
}

/// An account registration with a correct commitment.
pub fn account_tx(account_public_key: PublicKey, alias_hash: AliasHash, spending_public_key: PublicKey) -> TestTx {
	let mut proof = InnerProofData::padding();
	proof.proof_id = ProofId::Account;
	proof.note_commitment1 =
		DevNoteAlgorithms.account_note_commitment(&alias_hash, &account_public_key, &spending_public_key);
	let offchain = OffchainAccountData {
		account_public_key,
		alias_hash,
		spending_public_key1: spending_public_key,
		spending_public_key2: PublicKey::ZERO,
		tx_ref_no: 0,
	}
	.encode();
	TestTx { proof, offchain }
}

pub fn pending_proof(account_public_key: PublicKey) -> ProofOutput {
	ProofOutput {
		tx_id: TxId([4; 32]),
		account_public_key,
		proof_id: ProofId::Send,
		asset_id: 0,
		value: -10,
		spent_nullifiers: Vec::new(),
		output_notes: Vec::new(),
		tx: Tx {
			proof_data: Vec::new(),
			offchain_tx_data: Vec::new(),
			deposit_signature: None,
		},
		created: Utc::now(),
	}
}

pub fn block_time(rollup_id: u32) -> DateTime<Utc> {
	Utc.timestamp_opt(1_700_000_000 + rollup_id as i64 * 60, 0)
		.single()
		.unwrap_or_default()
}

/// Builds a block slot by slot, padding to the rollup size.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
	rollup_id: u32,
	rollup_size: u32,
	data_start_index: u64,
	old_data_root: Hash,
	new_data_root: Hash,
	slots: Vec<Option<TestTx>>,
}

impl BlockBuilder {
	pub fn new(rollup_id: u32, rollup_size: u32) -> Self {
		Self {
			rollup_id,
			rollup_size,
			data_start_index: 0,
			old_data_root: Hash::ZERO,
			new_data_root: Hash::ZERO,
			slots: Vec::new(),
		}
	}

	pub fn data_start_index(mut self, index: u64) -> Self {
		self.data_start_index = index;
		self
	}

	pub fn roots(mut self, old_data_root: Hash, new_data_root: Hash) -> Self {
		self.old_data_root = old_data_root;
		self.new_data_root = new_data_root;
		self
	}

	pub fn tx(mut self, tx: TestTx) -> Self {
		self.slots.push(Some(tx));
		self
	}

	pub fn padding(mut self) -> Self {
		self.slots.push(None);
		self
	}

	pub fn slots(mut self, slots: Vec<Option<TestTx>>) -> Self {
		self.slots.extend(slots);
		self
	}

	pub fn rollup(&self) -> RollupProofData {
		let mut inner_proofs: Vec<InnerProofData> = self
			.slots
			.iter()
			.map(|slot| slot.as_ref().map(|tx| tx.proof.clone()).unwrap_or_else(InnerProofData::padding))
			.collect();
		inner_proofs.resize(self.rollup_size as usize, InnerProofData::padding());
		RollupProofData {
			rollup_id: self.rollup_id,
			rollup_size: self.rollup_size,
			data_start_index: self.data_start_index,
			old_data_root: self.old_data_root,
			new_data_root: self.new_data_root,
			old_null_root: Hash::ZERO,
			new_null_root: Hash::ZERO,
			old_data_roots_root: Hash::ZERO,
			new_data_roots_root: Hash::ZERO,
			old_defi_root: Hash::ZERO,
			new_defi_root: Hash::ZERO,
			bridge_call_datas: [Hash::ZERO; NUM_BRIDGE_CALLS_PER_BLOCK],
			defi_deposit_sums: [0; NUM_BRIDGE_CALLS_PER_BLOCK],
			asset_ids: [0; NUM_ASSETS],
			total_tx_fees: [0; NUM_ASSETS],
			num_rollup_txs: self.slots.iter().filter(|slot| slot.is_some()).count() as u32,
			inner_proofs,
			defi_interaction_notes: [Hash::ZERO; NUM_BRIDGE_CALLS_PER_BLOCK],
			prev_defi_interaction_hash: Hash::ZERO,
		}
	}

	pub fn build(&self) -> Block {
		Block {
			rollup_id: self.rollup_id,
			tx_hash: Hash::from_u64(self.rollup_id as u64 + 1),
			created: block_time(self.rollup_id),
			rollup_proof_data: self.rollup().encode(),
			offchain_tx_data: self.slots.iter().flatten().map(|tx| tx.offchain.clone()).collect(),
			gas_used: 0,
			gas_price: 0,
		}
	}

	pub fn context(&self) -> Arc<BlockContext> {
		BlockContext::from_block(&self.build()).unwrap()
	}
}

/// Simulates the rollup network: keeps its own world state so every block it
/// produces claims the data root a correct client reaches.
pub struct TestChain {
	rollup_size: u32,
	subtree_depth: u32,
	world_state: WorldState,
	pub initial_world_state: InitialWorldState,
	pub blocks: Vec<Block>,
}

impl TestChain {
	pub async fn new(rollup_size: u32, genesis_accounts: &[GenesisAccount]) -> Self {
		let hasher = Sha256Hasher;
		let subtree_depth = subtree_depth_for(rollup_size);
		let leaves: Vec<Hash> = genesis_accounts
			.iter()
			.flat_map(|account| {
				[
					DevNoteAlgorithms.account_note_commitment(
						&account.alias_hash,
						&account.account_public_key,
						&account.spending_public_keys[0],
					),
					Hash::ZERO,
				]
			})
			.collect();
		let subtree_roots: Vec<Hash> = leaves
			.chunks(1usize << subtree_depth)
			.map(|chunk| subtree_root(&hasher, chunk, subtree_depth))
			.collect();

		let mut world_state = WorldState::new(Arc::new(MemoryKeyValueStore::new()), Arc::new(hasher));
		world_state.init(subtree_depth).await.unwrap();
		world_state.insert_elements(0, &subtree_roots).await.unwrap();
		world_state.commit().await.unwrap();

		Self {
			rollup_size,
			subtree_depth,
			world_state,
			initial_world_state: InitialWorldState {
				initial_accounts: encode_genesis_accounts(genesis_accounts),
				initial_subtree_roots: subtree_roots,
			},
			blocks: Vec::new(),
		}
	}

	pub fn next_rollup_id(&self) -> u32 {
		self.blocks.len() as u32
	}

	/// Appends a block holding `slots` and returns it.
	pub async fn add_block(&mut self, slots: Vec<Option<TestTx>>) -> Block {
		let start = self.world_state.get_size().unwrap();
		let old_root = self.world_state.get_root().unwrap();
		let builder = BlockBuilder::new(self.next_rollup_id(), self.rollup_size)
			.data_start_index(start)
			.slots(slots);
		let leaves = builder.rollup().note_commitments();
		let root = subtree_root(&Sha256Hasher, &leaves, self.subtree_depth);
		self.world_state.insert_elements(start, &[root]).await.unwrap();
		self.world_state.commit().await.unwrap();

		let block = builder
			.roots(old_root, self.world_state.get_root().unwrap())
			.build();
		self.blocks.push(block.clone());
		block
	}

	/// Appends `count` blocks of padding only.
	pub async fn add_empty_blocks(&mut self, count: usize) {
		for _ in 0..count {
			self.add_block(Vec::new()).await;
		}
	}

	pub fn data_size(&self) -> u64 {
		self.world_state.get_size().unwrap()
	}

	pub fn data_root(&self) -> Hash {
		self.world_state.get_root().unwrap()
	}
}

/// Recorded provider interactions.
pub struct MockProviderState {
	pub status: RollupProviderStatus,
	pub blocks: Vec<Block>,
	pub initial_world_state: InitialWorldState,
	pub client_logs: Vec<ClientLogRecord>,
	pub console_logs: Vec<ClientLogRecord>,
	pub get_blocks_calls: Vec<(u32, u32)>,
	pub initial_world_state_calls: usize,
	pub sent_txs: Vec<Tx>,
	pub fail_get_blocks: bool,
	pub fail_get_status: bool,
}

/// Scripted [`RollupProvider`].
pub struct MockRollupProvider {
	state: Mutex<MockProviderState>,
}

impl MockRollupProvider {
	pub fn new(rollup_size: u32) -> Self {
		Self {
			state: Mutex::new(MockProviderState {
				status: RollupProviderStatus {
					blockchain_status: BlockchainStatus {
						chain_id: 1337,
						rollup_contract_address: "0x00000000000000000000000000000000000000aa".to_string(),
						verifier_contract_address: "0x00000000000000000000000000000000000000bb".to_string(),
						latest_rollup_id: -1,
					},
					rollup_size,
					prover_less: true,
					fee_paying_asset_ids: vec![0],
					fees: Vec::new(),
				},
				blocks: Vec::new(),
				initial_world_state: InitialWorldState::default(),
				client_logs: Vec::new(),
				console_logs: Vec::new(),
				get_blocks_calls: Vec::new(),
				initial_world_state_calls: 0,
				sent_txs: Vec::new(),
				fail_get_blocks: false,
				fail_get_status: false,
			}),
		}
	}

	pub fn from_chain(chain: &TestChain) -> Self {
		let provider = Self::new(chain.rollup_size);
		{
			let mut state = provider.state();
			state.blocks = chain.blocks.clone();
			state.initial_world_state = chain.initial_world_state.clone();
		}
		provider
	}

	pub fn state(&self) -> MutexGuard<'_, MockProviderState> {
		self.state.lock().unwrap()
	}

	pub fn push_block(&self, block: Block) {
		self.state().blocks.push(block);
	}

	pub fn client_logs(&self) -> Vec<ClientLogRecord> {
		self.state().client_logs.clone()
	}

	pub fn console_logs(&self) -> Vec<ClientLogRecord> {
		self.state().console_logs.clone()
	}

	pub fn get_blocks_calls(&self) -> Vec<(u32, u32)> {
		self.state().get_blocks_calls.clone()
	}

	pub fn latest_rollup_id(&self) -> RollupMarker {
		self.state().blocks.len() as RollupMarker - 1
	}
}

#[async_trait::async_trait]
impl RollupProvider for MockRollupProvider {
	async fn get_status(&self) -> Result<RollupProviderStatus, RollupProviderError> {
		let latest = self.latest_rollup_id();
		if self.state().fail_get_status {
			return Err(RollupProviderError::Unavailable("scripted failure".to_string()));
		}
		let mut status = self.state().status.clone();
		status.blockchain_status.latest_rollup_id = latest;
		Ok(status)
	}

	async fn get_latest_rollup_id(&self) -> Result<i64, RollupProviderError> {
		Ok(self.latest_rollup_id())
	}

	async fn get_blocks(&self, from: u32, max_count: u32) -> Result<Vec<Block>, RollupProviderError> {
		let mut state = self.state();
		state.get_blocks_calls.push((from, max_count));
		if state.fail_get_blocks {
			return Err(RollupProviderError::Unavailable("scripted failure".to_string()));
		}
		Ok(state
			.blocks
			.iter()
			.filter(|block| block.rollup_id >= from)
			.take(max_count as usize)
			.cloned()
			.collect())
	}

	async fn get_initial_world_state(&self) -> Result<InitialWorldState, RollupProviderError> {
		let mut state = self.state();
		state.initial_world_state_calls += 1;
		Ok(state.initial_world_state.clone())
	}

	async fn send_txs(&self, txs: Vec<Tx>) -> Result<Vec<TxId>, RollupProviderError> {
		let ids = txs.iter().map(|tx| TxId::from_proof_bytes(&tx.proof_data)).collect();
		self.state().sent_txs.extend(txs);
		Ok(ids)
	}

	async fn client_log(&self, record: ClientLogRecord) -> Result<(), RollupProviderError> {
		self.state().client_logs.push(record);
		Ok(())
	}

	async fn client_console_log(&self, record: ClientLogRecord) -> Result<(), RollupProviderError> {
		self.state().console_logs.push(record);
		Ok(())
	}
}

/// Every `process_blocks` call: account and the rollup ids it received.
pub type ProcessLog = Arc<Mutex<Vec<(PublicKey, Vec<u32>)>>>;

/// Wraps another [`AccountState`] and records forwarded batches.
pub struct CountingAccountState {
	inner: Arc<dyn AccountState>,
	log: ProcessLog,
}

#[async_trait::async_trait]
impl AccountState for CountingAccountState {
	fn account_public_key(&self) -> PublicKey {
		self.inner.account_public_key()
	}

	fn synced_to_rollup(&self) -> RollupMarker {
		self.inner.synced_to_rollup()
	}

	async fn sync_from_db(&self) -> Result<(), AccountStateError> {
		self.inner.sync_from_db().await
	}

	async fn process_blocks(&self, blocks: &[Arc<BlockContext>]) -> Result<(), AccountStateError> {
		self.log.lock().unwrap().push((
			self.account_public_key(),
			blocks.iter().map(|block| block.rollup_id()).collect(),
		));
		self.inner.process_blocks(blocks).await
	}

	async fn await_synchronised(
		&self,
		latest_rollup_id: RollupMarker,
		timeout: Option<Duration>,
	) -> Result<(), AccountStateError> {
		self.inner.await_synchronised(latest_rollup_id, timeout).await
	}

	async fn add_proof(&self, proof: &ProofOutput) -> Result<(), AccountStateError> {
		self.inner.add_proof(proof).await
	}

	fn events(&self) -> &EventDispatcher<AccountStateEvent> {
		self.inner.events()
	}
}

/// Factory producing [`CountingAccountState`]s around [`crate::account::UserState`].
#[derive(Default)]
pub struct CountingAccountStateFactory {
	pub log: ProcessLog,
}

impl CountingAccountStateFactory {
	pub fn calls(&self) -> Vec<(PublicKey, Vec<u32>)> {
		self.log.lock().unwrap().clone()
	}
}

impl AccountStateFactory for CountingAccountStateFactory {
	fn create(
		&self,
		account: AccountRecord,
		db: Arc<dyn Database>,
		note_algorithms: Arc<dyn NoteAlgorithms>,
	) -> Arc<dyn AccountState> {
		Arc::new(CountingAccountState {
			inner: UserStateFactory.create(account, db, note_algorithms),
			log: self.log.clone(),
		})
	}
}
