use super::*;
use crate::aliases::GenesisAccount;
use crate::events::LocalBroadcastChannel;
use crate::provider::ClientLogLevel;
use crate::queue::{QueueError, QueueState};
use crate::rollup::ProofId;
use crate::storage::{MemoryDatabase, MemoryKeyValueStore, write_synced_to_rollup};
use crate::test_utils::{
	BlockBuilder, CountingAccountStateFactory, MockRollupProvider, TestChain, deposit_tx, note_for,
};
use crate::types::{Hash, UNSYNCED};

use serde_json::json;

struct Harness {
	sdk: CoreSdk,
	provider: Arc<MockRollupProvider>,
	db: Arc<MemoryDatabase>,
	kv: Arc<MemoryKeyValueStore>,
	factory: Arc<CountingAccountStateFactory>,
}

fn options() -> CoreSdkOptions {
	CoreSdkOptions {
		poll_interval: Duration::from_millis(50),
		min_sync_interval: Duration::from_millis(10),
		sync_error_backoff: Duration::from_millis(20),
		..Default::default()
	}
}

fn harness(provider: MockRollupProvider, options: CoreSdkOptions) -> Harness {
	let provider = Arc::new(provider);
	let db = Arc::new(MemoryDatabase::new());
	let kv = Arc::new(MemoryKeyValueStore::new());
	let factory = Arc::new(CountingAccountStateFactory::default());
	let services = CoreSdkServices::dev(provider.clone(), db.clone(), kv.clone())
		.with_account_state_factory(factory.clone());
	Harness {
		sdk: CoreSdk::new(services, options),
		provider,
		db,
		kv,
		factory,
	}
}

fn user(seed: u8) -> (PrivateKey, PublicKey) {
	let private_key = PrivateKey([seed; 32]);
	(private_key, DevNoteAlgorithms.derive_public_key(&private_key))
}

async fn sync_once(sdk: &CoreSdk) -> SyncStep {
	let inner = sdk.inner.clone();
	sdk.inner
		.queue()
		.unwrap()
		.push(move || async move { inner.sync().await })
		.await
		.unwrap()
		.unwrap()
}

async fn genesis(sdk: &CoreSdk) -> bool {
	let inner = sdk.inner.clone();
	sdk.inner
		.queue()
		.unwrap()
		.push(move || async move { inner.genesis_sync(false).await })
		.await
		.unwrap()
		.unwrap()
}

fn collect_events(sdk: &CoreSdk) -> Arc<Mutex<Vec<SdkEvent>>> {
	let events = Arc::new(Mutex::new(Vec::new()));
	let sink = events.clone();
	sdk.events().subscribe(Arc::new(FnHandler::new("collector", move |event: &SdkEvent| {
		sink.lock().unwrap().push(event.clone());
		Ok(())
	})));
	events
}

async fn eventually(mut condition: impl FnMut() -> bool) {
	tokio::time::timeout(Duration::from_secs(5), async {
		while !condition() {
			tokio::time::sleep(Duration::from_millis(5)).await;
		}
	})
	.await
	.expect("condition not reached in time");
}

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

#[tokio::test]
async fn scenario_a_fresh_database_syncs_a_deposit() {
	let (private_key, account) = user(7);
	let mut chain = TestChain::new(2, &[]).await;
	chain
		.add_block(vec![Some(deposit_tx(&note_for(&private_key, 100, 1))), None])
		.await;

	let h = harness(MockRollupProvider::from_chain(&chain), options());
	h.sdk.init().await.unwrap();
	h.sdk.add_account(account, Some(private_key), false).await.unwrap();
	h.sdk.run().unwrap();
	h.sdk.await_synchronised(TIMEOUT).await.unwrap();
	h.sdk.await_account_synchronised(&account, TIMEOUT).await.unwrap();

	let status = h.sdk.get_local_status();
	assert_eq!(status.synced_to_rollup, 0);
	assert_eq!(status.data_size, 4);
	assert_eq!(status.data_root, chain.data_root());

	let notes = h.sdk.get_notes(&account).await.unwrap();
	assert_eq!(notes.len(), 1);
	assert_eq!(notes[0].value, 100);
	assert_eq!(notes[0].index, Some(0));
	assert_eq!(h.sdk.get_balance(&account, 0).await.unwrap(), 100);
	assert!(!h.sdk.is_account_synching(&account).unwrap());

	h.sdk.destroy().await;
}

#[tokio::test]
async fn scenario_b_root_mismatch_rebuilds_from_genesis() {
	let (private_key, account) = user(7);
	let mut chain = TestChain::new(2, &[]).await;
	chain
		.add_block(vec![Some(deposit_tx(&note_for(&private_key, 100, 1)))])
		.await;

	let h = harness(MockRollupProvider::from_chain(&chain), options());
	h.sdk.init().await.unwrap();
	h.sdk.add_account(account, Some(private_key), false).await.unwrap();
	assert!(genesis(&h.sdk).await);
	assert_eq!(sync_once(&h.sdk).await, SyncStep::Synced);
	assert_eq!(h.sdk.get_local_status().data_size, 4);

	let bad_root = Hash([9; 32]);
	h.provider.push_block(
		BlockBuilder::new(1, 2)
			.data_start_index(4)
			.tx(deposit_tx(&note_for(&private_key, 5, 2)))
			.roots(chain.data_root(), bad_root)
			.build(),
	);
	assert_eq!(sync_once(&h.sdk).await, SyncStep::Repaired);

	let status = h.sdk.get_local_status();
	assert_eq!(status.synced_to_rollup, UNSYNCED);
	assert_eq!(status.data_size, 0);
	assert_eq!(read_synced_to_rollup(&*h.db).await.unwrap(), UNSYNCED);
	assert!(h.kv.get("data:meta").await.unwrap().is_none());

	let record = h
		.provider
		.client_logs()
		.into_iter()
		.find(|record| record.message == "Merkle tree root mismatch")
		.unwrap();
	assert_eq!(record.details["expectedRoot"], serde_json::to_value(bad_root).unwrap());
	assert_eq!(record.details["oldRoot"], serde_json::to_value(chain.data_root()).unwrap());
	assert_eq!(record.details["oldSize"], json!(4));
	assert_eq!(record.details["newSize"], json!(8));
	assert_eq!(record.details["batchSize"], json!(1));

	// Only the good batch reached the account.
	assert_eq!(h.factory.calls(), vec![(account, vec![0])]);
	// The stored genesis blob was reused for the rebuild.
	assert_eq!(h.provider.state().initial_world_state_calls, 1);

	h.sdk.destroy().await;
}

#[tokio::test]
async fn scenario_c_lagging_account_catches_up_before_sync_both() {
	let mut chain = TestChain::new(1, &[]).await;
	chain.add_empty_blocks(11).await;
	let h = harness(
		MockRollupProvider::from_chain(&chain),
		CoreSdkOptions {
			block_batch_size: 4,
			..options()
		},
	);
	h.sdk.init().await.unwrap();
	genesis(&h.sdk).await;
	while sync_once(&h.sdk).await != SyncStep::UpToDate {}
	assert_eq!(h.sdk.get_local_status().synced_to_rollup, 10);

	let (private_key, account) = user(3);
	h.sdk.add_account(account, Some(private_key), false).await.unwrap();
	for expected in [vec![0, 1, 2, 3], vec![4, 5, 6, 7], vec![8, 9, 10]] {
		assert_eq!(sync_once(&h.sdk).await, SyncStep::AccountsCaughtUp);
		assert_eq!(h.factory.calls().last(), Some(&(account, expected)));
		assert_eq!(h.sdk.get_local_status().synced_to_rollup, 10);
	}
	assert_eq!(h.db.get_account(&account).await.unwrap().unwrap().synced_to_rollup, 10);

	let block = chain.add_block(Vec::new()).await;
	h.provider.push_block(block);
	assert_eq!(sync_once(&h.sdk).await, SyncStep::Synced);
	assert_eq!(h.factory.calls().last(), Some(&(account, vec![11])));
	assert_eq!(h.sdk.get_local_status().synced_to_rollup, 11);

	let calls = h.provider.get_blocks_calls();
	assert_eq!(calls[calls.len() - 4..], [(0, 4), (4, 4), (8, 3), (11, 1)]);
}

#[tokio::test]
async fn accounts_added_with_no_sync_start_at_the_core_marker() {
	let mut chain = TestChain::new(1, &[]).await;
	chain.add_empty_blocks(3).await;
	let h = harness(MockRollupProvider::from_chain(&chain), options());
	h.sdk.init().await.unwrap();
	genesis(&h.sdk).await;
	assert_eq!(sync_once(&h.sdk).await, SyncStep::Synced);

	let (private_key, account) = user(4);
	let record = h.sdk.add_account(account, Some(private_key), true).await.unwrap();
	assert_eq!(record.synced_to_rollup, 2);
	assert_eq!(sync_once(&h.sdk).await, SyncStep::UpToDate);
	assert!(h.factory.calls().is_empty());

	let (other_key, _) = user(5);
	assert!(matches!(
		h.sdk.add_account(account, Some(other_key), false).await,
		Err(CoreSdkError::KeyMismatch(_))
	));
}

#[tokio::test]
async fn methods_requiring_running_fail_fast() {
	let (_, account) = user(1);
	let request = PaymentRequest {
		account_public_key: account,
		asset_id: 0,
		value: 1,
		action: PaymentAction::Deposit { from: Hash::ZERO },
	};
	let h = harness(MockRollupProvider::new(2), options());

	assert!(matches!(
		h.sdk.sync_now().await,
		Err(CoreSdkError::InvalidState {
			state: SdkInitState::Uninitialized,
			..
		})
	));
	assert!(matches!(h.sdk.run(), Err(CoreSdkError::InvalidState { .. })));
	assert!(matches!(h.sdk.add_account(account, None, false).await, Err(CoreSdkError::InvalidState { .. })));

	h.sdk.init().await.unwrap();
	assert!(matches!(h.sdk.init().await, Err(CoreSdkError::InvalidState { .. })));
	assert!(matches!(
		h.sdk.create_payment_proof(request.clone()).await,
		Err(CoreSdkError::InvalidState {
			state: SdkInitState::Initialized,
			..
		})
	));
	assert_eq!(h.sdk.init_state(), SdkInitState::Initialized);

	h.sdk.run().unwrap();
	h.sdk.run().unwrap();
	assert_eq!(h.sdk.init_state(), SdkInitState::Running);

	h.sdk.destroy().await;
	assert_eq!(h.sdk.init_state(), SdkInitState::Destroyed);
	assert!(matches!(h.sdk.run(), Err(CoreSdkError::InvalidState { .. })));
	assert!(matches!(h.sdk.init().await, Err(CoreSdkError::InvalidState { .. })));
	assert!(matches!(
		h.sdk.create_payment_proof(request).await,
		Err(CoreSdkError::InvalidState {
			state: SdkInitState::Destroyed,
			..
		})
	));
	assert_eq!(h.sdk.init_state(), SdkInitState::Destroyed);
}

#[tokio::test]
async fn genesis_is_applied_once() {
	let accounts = vec![
		GenesisAccount {
			alias_hash: AliasHash([1; 28]),
			account_public_key: PublicKey([2; 32]),
			spending_public_keys: [PublicKey([3; 32]), PublicKey::ZERO],
		},
		GenesisAccount {
			alias_hash: AliasHash([4; 28]),
			account_public_key: PublicKey([5; 32]),
			spending_public_keys: [PublicKey([6; 32]), PublicKey([7; 32])],
		},
	];
	let chain = TestChain::new(2, &accounts).await;
	let h = harness(MockRollupProvider::from_chain(&chain), options());
	h.sdk.init().await.unwrap();

	assert!(genesis(&h.sdk).await);
	let status = h.sdk.get_local_status();
	assert_eq!(status.data_size, 4);
	assert_eq!(status.data_root, chain.data_root());

	assert!(!genesis(&h.sdk).await);
	assert_eq!(h.sdk.get_local_status(), status);
	assert_eq!(h.sdk.inner.world_state.lock().await.get_roots_size().unwrap(), 1);
	assert_eq!(h.provider.state().initial_world_state_calls, 1);

	assert_eq!(
		h.sdk.get_account_public_key(&AliasHash([4; 28])).await.unwrap(),
		Some(PublicKey([5; 32]))
	);
	assert_eq!(h.sdk.get_alias(&PublicKey([2; 32])).await.unwrap(), Some(AliasHash([1; 28])));
	let mut indexes: Vec<u64> = h
		.sdk
		.get_spending_keys(&PublicKey([5; 32]))
		.await
		.unwrap()
		.iter()
		.map(|key| key.tree_index)
		.collect();
	indexes.sort();
	assert_eq!(indexes, vec![2, 3]);
	assert_eq!(h.sdk.get_spending_keys(&PublicKey([2; 32])).await.unwrap().len(), 1);
}

#[tokio::test]
async fn destroy_drains_the_queue_and_stops_the_loop() {
	let mut chain = TestChain::new(1, &[]).await;
	chain.add_empty_blocks(2).await;
	let h = harness(MockRollupProvider::from_chain(&chain), options());
	let events = collect_events(&h.sdk);

	h.sdk.init().await.unwrap();
	h.sdk.run().unwrap();
	h.sdk.await_synchronised(TIMEOUT).await.unwrap();
	h.sdk.destroy().await;
	h.sdk.destroy().await;

	assert_eq!(h.sdk.init_state(), SdkInitState::Destroyed);
	let queue = h.sdk.inner.queue().unwrap();
	assert_eq!(queue.state(), QueueState::Stopped);
	assert!(matches!(queue.push(|| async {}).await, Err(QueueError::Cancelled)));
	assert!(h.sdk.inner.sync_loop.lock().unwrap().is_none());
	assert_eq!(h.sdk.events().handler_count(), 0);

	let events = events.lock().unwrap();
	assert!(events.contains(&SdkEvent::WorldStateUpdated {
		synced_to_rollup: 1,
		latest_rollup_id: 1,
	}));
	assert_eq!(events.last(), Some(&SdkEvent::Destroyed));
	assert_eq!(events.iter().filter(|e| **e == SdkEvent::Destroyed).count(), 1);
}

#[tokio::test]
async fn a_marker_ahead_of_the_tree_rebuilds_from_genesis() {
	let mut chain = TestChain::new(2, &[]).await;
	chain.add_empty_blocks(3).await;
	let h = harness(MockRollupProvider::from_chain(&chain), options());
	h.sdk.init().await.unwrap();
	assert!(genesis(&h.sdk).await);
	assert_eq!(sync_once(&h.sdk).await, SyncStep::Synced);
	assert_eq!(h.sdk.get_local_status().synced_to_rollup, 2);

	// The tree snapshot is lost, the marker survives.
	h.kv.clear().await.unwrap();
	assert!(genesis(&h.sdk).await);
	let block = chain.add_block(Vec::new()).await;
	h.provider.push_block(block);

	assert_eq!(sync_once(&h.sdk).await, SyncStep::Repaired);
	assert_eq!(read_synced_to_rollup(&*h.db).await.unwrap(), UNSYNCED);
	let record = h
		.provider
		.client_logs()
		.into_iter()
		.find(|record| record.message == "World state behind sync marker")
		.unwrap();
	assert_eq!(record.details["syncedToRollup"], json!(2));
	assert_eq!(record.details["rootsSize"], json!(1));

	while sync_once(&h.sdk).await != SyncStep::UpToDate {}
	let status = h.sdk.get_local_status();
	assert_eq!(status.synced_to_rollup, 3);
	assert_eq!(status.data_size, chain.data_size());
	assert_eq!(status.data_root, chain.data_root());

	h.sdk.destroy().await;
}

#[tokio::test]
async fn committed_batches_reach_the_snapshots() {
	let mut chain = TestChain::new(2, &[]).await;
	chain.add_empty_blocks(2).await;
	let dir = std::env::temp_dir().join(format!("rollup-sdk-core-sync-{}", hex::encode(rand::random::<[u8; 8]>())));
	let db = Arc::new(MemoryDatabase::open(dir.join("db.json")).await.unwrap());
	let kv = Arc::new(MemoryKeyValueStore::open(dir.join("kv.json")).await.unwrap());
	let provider = Arc::new(MockRollupProvider::from_chain(&chain));
	let sdk = CoreSdk::new(CoreSdkServices::dev(provider, db, kv), options());
	sdk.init().await.unwrap();
	assert!(genesis(&sdk).await);
	assert_eq!(sync_once(&sdk).await, SyncStep::Synced);

	// Read the files back while the live stores are still open.
	let saved_db = MemoryDatabase::open(dir.join("db.json")).await.unwrap();
	assert_eq!(read_synced_to_rollup(&saved_db).await.unwrap(), 1);
	let saved_kv = Arc::new(MemoryKeyValueStore::open(dir.join("kv.json")).await.unwrap());
	let mut world_state = WorldState::new(saved_kv, Arc::new(Sha256Hasher));
	world_state.init(subtree_depth_for(2)).await.unwrap();
	assert_eq!(world_state.get_root().unwrap(), chain.data_root());
	assert_eq!(world_state.get_roots_size().unwrap(), 3);

	sdk.destroy().await;
	tokio::fs::remove_dir_all(dir).await.unwrap();
}

#[tokio::test]
async fn foreign_local_data_is_erased_on_init() {
	let h = harness(MockRollupProvider::new(2), options());
	h.db.set_key(ROLLUP_CONTRACT_ADDRESS_KEY, b"0xother".to_vec()).await.unwrap();
	h.db.set_key(DATA_VERSION_KEY, crate::config::DATA_VERSION.to_be_bytes().to_vec())
		.await
		.unwrap();
	write_synced_to_rollup(&*h.db, 5).await.unwrap();
	h.db.upsert_account(&AccountRecord::new(PublicKey([1; 32]), None)).await.unwrap();
	h.kv.put_batch(vec![("data:meta".to_string(), vec![1, 2, 3])]).await.unwrap();

	h.sdk.init().await.unwrap();

	assert_eq!(read_synced_to_rollup(&*h.db).await.unwrap(), UNSYNCED);
	assert!(h.db.get_accounts().await.unwrap().is_empty());
	assert!(h.kv.get("data:meta").await.unwrap().is_none());
	let status = h.sdk.get_local_status();
	assert_eq!(
		h.db.get_key(ROLLUP_CONTRACT_ADDRESS_KEY).await.unwrap(),
		Some(status.rollup_contract_address.as_bytes().to_vec())
	);
	assert_eq!(status.synced_to_rollup, UNSYNCED);
	assert_eq!(status.rollup_size, 2);
}

#[tokio::test]
async fn matching_local_data_is_kept() {
	let h = harness(MockRollupProvider::new(2), options());
	let address = h.provider.state().status.blockchain_status.rollup_contract_address.clone();
	h.db.set_key(ROLLUP_CONTRACT_ADDRESS_KEY, address.into_bytes()).await.unwrap();
	h.db.set_key(DATA_VERSION_KEY, crate::config::DATA_VERSION.to_be_bytes().to_vec())
		.await
		.unwrap();
	write_synced_to_rollup(&*h.db, 3).await.unwrap();
	let (_, account) = user(2);
	h.db.upsert_account(&AccountRecord::new(account, None)).await.unwrap();

	h.sdk.init().await.unwrap();

	assert_eq!(h.sdk.get_local_status().synced_to_rollup, 3);
	assert!(h.sdk.is_account_synching(&account).unwrap());
}

#[tokio::test]
async fn failed_init_releases_resources() {
	let provider = MockRollupProvider::new(2);
	provider.state().fail_get_status = true;
	let h = harness(provider, options());

	assert!(matches!(h.sdk.init().await, Err(CoreSdkError::Provider(_))));
	assert_eq!(h.sdk.init_state(), SdkInitState::Uninitialized);
	assert!(h.db.get_key(DATA_VERSION_KEY).await.is_err());
	assert_ne!(h.sdk.inner.queue().unwrap().state(), QueueState::Accepting);

	h.provider.state().fail_get_status = false;
	assert!(matches!(h.sdk.init().await, Err(CoreSdkError::InvalidState { .. })));
	h.sdk.destroy().await;
	assert_eq!(h.sdk.init_state(), SdkInitState::Destroyed);
}

#[tokio::test]
async fn sync_failures_are_reported_and_retried() {
	let mut chain = TestChain::new(1, &[]).await;
	chain.add_empty_blocks(1).await;
	let provider = MockRollupProvider::from_chain(&chain);
	provider.state().fail_get_blocks = true;
	let h = harness(provider, options());
	h.sdk.init().await.unwrap();
	h.sdk.run().unwrap();

	let provider = h.provider.clone();
	eventually(move || provider.state().get_blocks_calls.len() >= 2).await;
	let failure = h
		.provider
		.console_logs()
		.into_iter()
		.find(|record| record.message == "Sync failed")
		.unwrap();
	assert_eq!(failure.level, ClientLogLevel::Warn);
	assert!(h.provider.client_logs().is_empty());
	assert_eq!(h.sdk.get_local_status().synced_to_rollup, UNSYNCED);

	h.provider.state().fail_get_blocks = false;
	h.sdk.await_synchronised(TIMEOUT).await.unwrap();
	assert_eq!(h.sdk.get_local_status().synced_to_rollup, 0);
	h.sdk.destroy().await;
}

#[tokio::test]
async fn payment_proofs_spend_synced_notes() {
	let (private_key, account) = user(7);
	let (_, recipient) = user(8);
	let mut chain = TestChain::new(2, &[]).await;
	chain
		.add_block(vec![Some(deposit_tx(&note_for(&private_key, 100, 1)))])
		.await;

	let h = harness(MockRollupProvider::from_chain(&chain), options());
	h.sdk.init().await.unwrap();
	h.sdk.add_account(account, Some(private_key), false).await.unwrap();
	h.sdk.run().unwrap();
	h.sdk.await_synchronised(TIMEOUT).await.unwrap();
	h.sdk.await_account_synchronised(&account, TIMEOUT).await.unwrap();

	let proof = h
		.sdk
		.create_payment_proof(PaymentRequest {
			account_public_key: account,
			asset_id: 0,
			value: 30,
			action: PaymentAction::Send { to: recipient },
		})
		.await
		.unwrap();
	assert_eq!(proof.proof_id, ProofId::Send);
	assert_eq!(proof.value, -30);
	assert_eq!(proof.spent_nullifiers.len(), 1);
	let values: Vec<u128> = proof.output_notes.iter().map(|note| note.value).collect();
	assert_eq!(values, vec![30, 70]);

	let notes = h.sdk.get_notes(&account).await.unwrap();
	assert!(notes.iter().any(|note| note.value == 100 && note.pending_spend));
	assert!(notes.iter().any(|note| note.value == 70 && note.index.is_none()));
	assert_eq!(h.sdk.get_balance(&account, 0).await.unwrap(), 0);
	assert!(
		h.sdk
			.get_user_txs(&account)
			.await
			.unwrap()
			.iter()
			.any(|tx| tx.tx_id == proof.tx_id && tx.settled.is_none())
	);

	let tx_ids = h.sdk.send_proofs(std::slice::from_ref(&proof)).await.unwrap();
	assert_eq!(tx_ids, vec![proof.tx_id]);
	assert_eq!(h.provider.state().sent_txs.len(), 1);

	assert!(matches!(
		h.sdk
			.create_payment_proof(PaymentRequest {
				account_public_key: account,
				asset_id: 0,
				value: 1000,
				action: PaymentAction::Withdraw { to: Hash([1; 32]) },
			})
			.await,
		Err(CoreSdkError::InsufficientNotes { required: 1000, .. })
	));
	assert!(matches!(
		h.sdk
			.create_payment_proof(PaymentRequest {
				account_public_key: recipient,
				asset_id: 0,
				value: 1,
				action: PaymentAction::Deposit { from: Hash::ZERO },
			})
			.await,
		Err(CoreSdkError::UnknownAccount(_))
	));

	h.sdk.destroy().await;
}

#[tokio::test]
async fn account_proofs_reject_taken_aliases() {
	let genesis_accounts = vec![GenesisAccount {
		alias_hash: AliasHash([1; 28]),
		account_public_key: PublicKey([2; 32]),
		spending_public_keys: [PublicKey([3; 32]), PublicKey::ZERO],
	}];
	let chain = TestChain::new(2, &genesis_accounts).await;
	let h = harness(MockRollupProvider::from_chain(&chain), options());
	let (private_key, account) = user(9);
	h.sdk.init().await.unwrap();
	h.sdk.add_account(account, Some(private_key), true).await.unwrap();
	h.sdk.run().unwrap();
	let provider = h.provider.clone();
	eventually(move || provider.state().initial_world_state_calls == 1).await;
	h.sdk.await_synchronised(TIMEOUT).await.unwrap();

	let request = AccountRequest {
		account_public_key: account,
		alias_hash: AliasHash([1; 28]),
		spending_public_keys: [PublicKey([8; 32]), PublicKey::ZERO],
	};
	assert!(matches!(
		h.sdk.create_account_proof(request.clone()).await,
		Err(CoreSdkError::AliasAlreadyRegistered { owner, .. }) if owner == PublicKey([2; 32])
	));

	let proof = h
		.sdk
		.create_account_proof(AccountRequest {
			alias_hash: AliasHash([5; 28]),
			..request
		})
		.await
		.unwrap();
	assert_eq!(proof.proof_id, ProofId::Account);
	assert_eq!(proof.tx.offchain_tx_data.len(), crate::rollup::OffchainAccountData::SIZE);

	h.sdk.destroy().await;
}

#[tokio::test]
async fn broadcast_events_from_other_instances_are_re_emitted() {
	let channel = Arc::new(LocalBroadcastChannel::default());
	let provider = Arc::new(MockRollupProvider::new(2));
	let services = CoreSdkServices::dev(
		provider,
		Arc::new(MemoryDatabase::new()),
		Arc::new(MemoryKeyValueStore::new()),
	)
	.with_broadcast(channel.clone());
	let sdk = CoreSdk::new(
		services,
		CoreSdkOptions {
			instance_id: Some("local".to_string()),
			..options()
		},
	);
	let events = collect_events(&sdk);
	sdk.init().await.unwrap();

	let foreign = SdkEvent::AccountStateUpdated {
		account_public_key: PublicKey([1; 32]),
	};
	channel.post(BroadcastMessage {
		origin: "local".to_string(),
		event: SdkEvent::AccountStateUpdated {
			account_public_key: PublicKey([2; 32]),
		},
	});
	channel.post(BroadcastMessage {
		origin: "remote".to_string(),
		event: foreign.clone(),
	});

	let seen = events.clone();
	eventually(move || !seen.lock().unwrap().is_empty()).await;
	assert_eq!(*events.lock().unwrap(), vec![foreign]);
	sdk.destroy().await;
}
