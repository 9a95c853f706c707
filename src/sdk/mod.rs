//! CoreSdk orchestration
//!
//! [`CoreSdk`] owns the local rollup state: it bootstraps the world state
//! from genesis, runs the sync loop that folds remote rollups into the
//! Merkle tree and the tracked accounts, and serves queries and proof
//! requests. Every state mutation runs on one [`SerialQueue`], optionally
//! guarded by a cross-process lease, and every task re-reads persisted
//! markers first, so several processes can share the same storage.
//!
//! Lifecycle: `Uninitialized -> Initialized -> Running -> Stopping -> Destroyed`.
//! Methods that need synchronized state fail fast outside `Running`.

mod error;
mod progress_tracker;
mod proofs;
mod sleep;
mod status;
mod sync;

#[cfg(test)]
mod tests;

pub use error::CoreSdkError;
pub use progress_tracker::{SyncProgressTracker, SyncStats};
pub use proofs::{AccountRequest, PaymentAction, PaymentRequest};
pub use sleep::{InterruptableSleep, SleepOutcome};
pub use status::{SdkInitState, SdkStatus};
pub use sync::SyncStep;

use crate::account::{
	AccountState, AccountStateEvent, AccountStateFactory, NotePicker, SmallestFirstNotePicker, UserStateFactory,
};
use crate::config::{CoreSdkOptions, SerialQueueMode};
use crate::crypto::{DevNoteAlgorithms, DevProver, Hasher, NoteAlgorithms, Prover, Sha256Hasher};
use crate::events::{BroadcastChannel, BroadcastMessage, EventDispatcher, FnHandler, HandlerId, SdkEvent};
use crate::provider::{ClientLogRecord, RollupProvider, RollupProviderStatus};
use crate::queue::{DbMutex, SerialQueue};
use crate::storage::{
	AccountRecord, DATA_VERSION_KEY, Database, KeyValueStore, NoteRecord, ROLLUP_CONTRACT_ADDRESS_KEY,
	SpendingKeyRecord, UserTxRecord, read_synced_to_rollup,
};
use crate::types::{AliasHash, PrivateKey, PublicKey};
use crate::world_state::{WorldState, subtree_depth_for};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Collaborators injected into a [`CoreSdk`].
#[derive(Clone)]
pub struct CoreSdkServices {
	pub provider: Arc<dyn RollupProvider>,
	pub db: Arc<dyn Database>,
	pub kv: Arc<dyn KeyValueStore>,
	pub hasher: Arc<dyn Hasher>,
	pub note_algorithms: Arc<dyn NoteAlgorithms>,
	pub prover: Arc<dyn Prover>,
	pub note_picker: Arc<dyn NotePicker>,
	pub account_state_factory: Arc<dyn AccountStateFactory>,
	/// Optional bus to other instances sharing the same storage.
	pub broadcast: Option<Arc<dyn BroadcastChannel>>,
}

impl CoreSdkServices {
	/// Services for a prover-less deployment, backed by the SHA-256 primitives.
	pub fn dev(provider: Arc<dyn RollupProvider>, db: Arc<dyn Database>, kv: Arc<dyn KeyValueStore>) -> Self {
		Self {
			provider,
			db,
			kv,
			hasher: Arc::new(Sha256Hasher),
			note_algorithms: Arc::new(DevNoteAlgorithms),
			prover: Arc::new(DevProver),
			note_picker: Arc::new(SmallestFirstNotePicker::default()),
			account_state_factory: Arc::new(UserStateFactory),
			broadcast: None,
		}
	}

	pub fn with_broadcast(mut self, broadcast: Arc<dyn BroadcastChannel>) -> Self {
		self.broadcast = Some(broadcast);
		self
	}

	pub fn with_account_state_factory(mut self, factory: Arc<dyn AccountStateFactory>) -> Self {
		self.account_state_factory = factory;
		self
	}
}

/// Publishes SDK events locally and, for broadcast events, to other instances.
#[derive(Clone)]
struct EventSink {
	events: Arc<EventDispatcher<SdkEvent>>,
	broadcast: Option<Arc<dyn BroadcastChannel>>,
	origin: String,
}

impl EventSink {
	fn emit(&self, event: SdkEvent) {
		self.events.dispatch(&event);
		if let Some(channel) = self.broadcast.as_ref().filter(|_| event.is_broadcast()) {
			channel.post(BroadcastMessage {
				origin: self.origin.clone(),
				event,
			});
		}
	}
}

/// An account state plus the handler the SDK registered on it.
struct TrackedAccount {
	state: Arc<dyn AccountState>,
	handler: HandlerId,
}

pub(crate) struct CoreSdkInner {
	services: CoreSdkServices,
	options: CoreSdkOptions,
	init_state: watch::Sender<SdkInitState>,
	init_started: AtomicBool,
	status: watch::Sender<SdkStatus>,
	remote_status: Mutex<Option<RollupProviderStatus>>,
	world_state: tokio::sync::Mutex<WorldState>,
	accounts: Mutex<HashMap<PublicKey, TrackedAccount>>,
	queue: OnceLock<Arc<SerialQueue>>,
	sleep: Arc<InterruptableSleep>,
	sync_loop: Mutex<Option<JoinHandle<()>>>,
	background: Mutex<Vec<JoinHandle<()>>>,
	progress: Mutex<SyncProgressTracker>,
	sink: EventSink,
}

/// Client-side sync engine for a rollup. Cheap to clone.
#[derive(Clone)]
pub struct CoreSdk {
	inner: Arc<CoreSdkInner>,
}

impl CoreSdk {
	pub fn new(services: CoreSdkServices, options: CoreSdkOptions) -> Self {
		let origin = options
			.instance_id
			.clone()
			.unwrap_or_else(|| hex::encode(rand::random::<[u8; 8]>()));
		let world_state = WorldState::new(services.kv.clone(), services.hasher.clone());
		let sink = EventSink {
			events: Arc::new(EventDispatcher::new()),
			broadcast: services.broadcast.clone(),
			origin,
		};
		Self {
			inner: Arc::new(CoreSdkInner {
				services,
				options,
				init_state: watch::channel(SdkInitState::Uninitialized).0,
				init_started: AtomicBool::new(false),
				status: watch::channel(SdkStatus::default()).0,
				remote_status: Mutex::new(None),
				world_state: tokio::sync::Mutex::new(world_state),
				accounts: Mutex::new(HashMap::new()),
				queue: OnceLock::new(),
				sleep: Arc::new(InterruptableSleep::new()),
				sync_loop: Mutex::new(None),
				background: Mutex::new(Vec::new()),
				progress: Mutex::new(SyncProgressTracker::new()),
				sink,
			}),
		}
	}

	pub fn instance_id(&self) -> &str {
		&self.inner.sink.origin
	}

	pub fn init_state(&self) -> SdkInitState {
		self.inner.init_state()
	}

	/// SDK events. Subscriptions are dropped on destroy.
	pub fn events(&self) -> &EventDispatcher<SdkEvent> {
		&self.inner.sink.events
	}

	/// Prepares storage, the world state and the tracked accounts.
	///
	/// Local data synced against another rollup contract or schema version
	/// is erased. On failure every owned resource is released and the SDK
	/// cannot be initialized again.
	pub async fn init(&self) -> Result<(), CoreSdkError> {
		let inner = &self.inner;
		let state = inner.init_state();
		if state != SdkInitState::Uninitialized || inner.init_started.swap(true, Ordering::SeqCst) {
			return Err(CoreSdkError::InvalidState {
				operation: "init",
				state,
			});
		}

		if let Err(e) = inner.initialize().await {
			error!("CoreSdk initialization failed: {}", e);
			inner.release_resources().await;
			return Err(e);
		}
		inner.advance(SdkInitState::Initialized);
		info!("CoreSdk {} initialized", inner.sink.origin);
		Ok(())
	}

	/// Starts genesis bootstrap and the sync loop. No-op when already running.
	pub fn run(&self) -> Result<(), CoreSdkError> {
		let inner = &self.inner;
		match inner.init_state() {
			SdkInitState::Running => return Ok(()),
			SdkInitState::Initialized => {}
			state => return Err(CoreSdkError::InvalidState { operation: "run", state }),
		}
		inner.advance(SdkInitState::Running);

		let inner = inner.clone();
		tokio::spawn(async move {
			let task_inner = inner.clone();
			let started = match inner.queue() {
				Ok(queue) => queue
					.push(move || async move {
						task_inner.genesis_sync(false).await?;
						task_inner.start_sync_loop();
						Ok::<_, CoreSdkError>(())
					})
					.await
					.map_err(CoreSdkError::from)
					.and_then(|result| result),
				Err(e) => Err(e),
			};
			if let Err(e) = started {
				if inner.init_state() == SdkInitState::Running {
					error!("Failed to start sync: {}", e);
					inner.destroy().await;
				}
			}
		});
		Ok(())
	}

	/// Stops the sync loop, drains the queue and releases storage. Idempotent.
	pub async fn destroy(&self) {
		self.inner.destroy().await;
	}

	/// Copy of the local status. Never waits on the queue.
	pub fn get_local_status(&self) -> SdkStatus {
		self.inner.status.borrow().clone()
	}

	pub async fn get_remote_status(&self) -> Result<RollupProviderStatus, CoreSdkError> {
		let remote = self.inner.services.provider.get_status().await?;
		*self.inner.remote_status.lock().unwrap_or_else(PoisonError::into_inner) = Some(remote.clone());
		self.inner.status.send_modify(|status| {
			status.latest_rollup_id = remote.blockchain_status.latest_rollup_id.max(status.synced_to_rollup);
		});
		Ok(remote)
	}

	/// Runs one sync step through the queue.
	pub async fn sync_now(&self) -> Result<SyncStep, CoreSdkError> {
		self.inner.require_running("sync")?;
		let inner = self.inner.clone();
		self.inner.queue()?.push(move || async move { inner.sync().await }).await?
	}

	/// Starts tracking an account.
	///
	/// A new account starts from rollup `-1` and catches up through the
	/// sync loop, unless `no_sync` starts it at the current core marker.
	/// Adding an already tracked account returns its record.
	pub async fn add_account(
		&self,
		account_public_key: PublicKey,
		private_key: Option<PrivateKey>,
		no_sync: bool,
	) -> Result<AccountRecord, CoreSdkError> {
		self.inner.require_open("add account")?;
		if let Some(private_key) = &private_key {
			if self.inner.services.note_algorithms.derive_public_key(private_key) != account_public_key {
				return Err(CoreSdkError::KeyMismatch(account_public_key));
			}
		}

		let inner = self.inner.clone();
		let record = self
			.inner
			.queue()?
			.push(move || async move {
				if inner.account_state(&account_public_key).is_ok() {
					if let Some(existing) = inner.services.db.get_account(&account_public_key).await? {
						return Ok(existing);
					}
				}
				let mut record = AccountRecord::new(account_public_key, private_key);
				if no_sync {
					record.synced_to_rollup = read_synced_to_rollup(inner.services.db.as_ref()).await?;
				}
				inner.services.db.upsert_account(&record).await?;
				inner.track_account(record.clone());
				info!(
					"Tracking account {} from rollup {}",
					account_public_key, record.synced_to_rollup
				);
				Ok::<_, CoreSdkError>(record)
			})
			.await??;

		self.inner.sleep.interrupt();
		Ok(record)
	}

	/// Stops tracking an account and deletes its local data.
	pub async fn remove_account(&self, account_public_key: PublicKey) -> Result<(), CoreSdkError> {
		self.inner.require_open("remove account")?;
		let inner = self.inner.clone();
		self.inner
			.queue()?
			.push(move || async move {
				inner.untrack_account(&account_public_key)?;
				inner.services.db.remove_account(&account_public_key).await?;
				info!("Removed account {}", account_public_key);
				Ok::<_, CoreSdkError>(())
			})
			.await?
	}

	pub async fn get_accounts(&self) -> Result<Vec<AccountRecord>, CoreSdkError> {
		self.inner.require_open("get accounts")?;
		Ok(self.inner.services.db.get_accounts().await?)
	}

	/// Whether the account still has rollups to apply.
	pub fn is_account_synching(&self, account_public_key: &PublicKey) -> Result<bool, CoreSdkError> {
		let account = self.inner.account_state(account_public_key)?;
		let latest = self.inner.status.borrow().latest_rollup_id;
		Ok(!account.is_synchronised(latest))
	}

	pub async fn await_account_synchronised(
		&self,
		account_public_key: &PublicKey,
		timeout: Option<Duration>,
	) -> Result<(), CoreSdkError> {
		self.inner.require_running("await account sync")?;
		let account = self.inner.account_state(account_public_key)?;
		let latest = self.inner.status.borrow().latest_rollup_id;
		Ok(account.await_synchronised(latest, timeout).await?)
	}

	/// Resolves once the core tree reaches the provider's latest rollup.
	pub async fn await_synchronised(&self, timeout: Option<Duration>) -> Result<(), CoreSdkError> {
		self.inner.require_running("await sync")?;
		let target = self.inner.services.provider.get_latest_rollup_id().await?;
		let mut status = self.inner.status.subscribe();
		let reached = status.wait_for(|status| status.synced_to_rollup >= target);
		let reached = match timeout {
			Some(timeout) => tokio::time::timeout(timeout, reached).await.ok().map(|r| r.is_ok()),
			None => Some(reached.await.is_ok()),
		};
		match reached {
			Some(true) => Ok(()),
			_ => Err(CoreSdkError::SyncTimeout {
				target,
				synced: self.inner.status.borrow().synced_to_rollup,
			}),
		}
	}

	pub async fn get_notes(&self, account_public_key: &PublicKey) -> Result<Vec<NoteRecord>, CoreSdkError> {
		self.inner.require_open("get notes")?;
		Ok(self.inner.services.db.get_notes(account_public_key).await?)
	}

	/// Sum of the confirmed, unspent notes of `asset_id`.
	pub async fn get_balance(&self, account_public_key: &PublicKey, asset_id: u32) -> Result<u128, CoreSdkError> {
		let notes = self.get_notes(account_public_key).await?;
		Ok(notes
			.iter()
			.filter(|note| note.asset_id == asset_id && note.index.is_some() && !note.pending_spend)
			.fold(0u128, |sum, note| sum.saturating_add(note.value)))
	}

	pub async fn get_user_txs(&self, account_public_key: &PublicKey) -> Result<Vec<UserTxRecord>, CoreSdkError> {
		self.inner.require_open("get user txs")?;
		Ok(self.inner.services.db.get_user_txs(account_public_key).await?)
	}

	pub async fn get_spending_keys(
		&self,
		account_public_key: &PublicKey,
	) -> Result<Vec<SpendingKeyRecord>, CoreSdkError> {
		self.inner.require_open("get spending keys")?;
		Ok(self.inner.services.db.get_spending_keys(account_public_key).await?)
	}

	/// Alias registered by the account, if any.
	pub async fn get_alias(&self, account_public_key: &PublicKey) -> Result<Option<AliasHash>, CoreSdkError> {
		self.inner.require_open("get alias")?;
		let alias = self.inner.services.db.get_alias_by_account(account_public_key).await?;
		Ok(alias.map(|alias| alias.alias_hash))
	}

	/// Current owner of an alias.
	pub async fn get_account_public_key(&self, alias_hash: &AliasHash) -> Result<Option<PublicKey>, CoreSdkError> {
		self.inner.require_open("get account public key")?;
		let alias = self.inner.services.db.get_alias_by_hash(alias_hash).await?;
		Ok(alias.map(|alias| alias.account_public_key))
	}

	pub async fn is_alias_registered(&self, alias_hash: &AliasHash) -> Result<bool, CoreSdkError> {
		Ok(self.get_account_public_key(alias_hash).await?.is_some())
	}
}

impl CoreSdkInner {
	fn init_state(&self) -> SdkInitState {
		*self.init_state.borrow()
	}

	/// Moves the lifecycle forward. Backward transitions are ignored.
	fn advance(&self, to: SdkInitState) -> bool {
		self.init_state.send_if_modified(|state| {
			if to > *state {
				debug!("CoreSdk state {:?} -> {:?}", state, to);
				*state = to;
				true
			} else {
				false
			}
		})
	}

	fn require_running(&self, operation: &'static str) -> Result<(), CoreSdkError> {
		match self.init_state() {
			SdkInitState::Running => Ok(()),
			state => Err(CoreSdkError::InvalidState { operation, state }),
		}
	}

	fn require_open(&self, operation: &'static str) -> Result<(), CoreSdkError> {
		let state = self.init_state();
		if state.is_open() {
			Ok(())
		} else {
			Err(CoreSdkError::InvalidState { operation, state })
		}
	}

	fn queue(&self) -> Result<&Arc<SerialQueue>, CoreSdkError> {
		self.queue.get().ok_or(CoreSdkError::InvalidState {
			operation: "queue task",
			state: self.init_state(),
		})
	}

	fn accounts(&self) -> std::sync::MutexGuard<'_, HashMap<PublicKey, TrackedAccount>> {
		self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn account_state(&self, account_public_key: &PublicKey) -> Result<Arc<dyn AccountState>, CoreSdkError> {
		self.accounts()
			.get(account_public_key)
			.map(|tracked| tracked.state.clone())
			.ok_or(CoreSdkError::UnknownAccount(*account_public_key))
	}

	fn account_states(&self) -> Vec<Arc<dyn AccountState>> {
		self.accounts().values().map(|tracked| tracked.state.clone()).collect()
	}

	/// Creates the account's state and re-emits its updates as SDK events.
	fn track_account(&self, record: AccountRecord) {
		let account_public_key = record.account_public_key;
		let state = self.services.account_state_factory.create(
			record,
			self.services.db.clone(),
			self.services.note_algorithms.clone(),
		);
		let sink = self.sink.clone();
		let handler = state.events().subscribe(Arc::new(FnHandler::new(
			format!("account-{}", account_public_key),
			move |event: &AccountStateEvent| {
				let AccountStateEvent::Updated {
					account_public_key, ..
				} = event;
				sink.emit(SdkEvent::AccountStateUpdated {
					account_public_key: *account_public_key,
				});
				Ok(())
			},
		)));

		if let Some(previous) = self
			.accounts()
			.insert(account_public_key, TrackedAccount { state, handler })
		{
			previous.state.events().unsubscribe(previous.handler);
		}
	}

	fn untrack_account(&self, account_public_key: &PublicKey) -> Result<(), CoreSdkError> {
		let tracked = self
			.accounts()
			.remove(account_public_key)
			.ok_or(CoreSdkError::UnknownAccount(*account_public_key))?;
		tracked.state.events().unsubscribe(tracked.handler);
		Ok(())
	}

	fn untrack_all(&self) {
		let tracked: Vec<TrackedAccount> = self.accounts().drain().map(|(_, tracked)| tracked).collect();
		for account in tracked {
			account.state.events().unsubscribe(account.handler);
		}
	}

	async fn initialize(self: &Arc<Self>) -> Result<(), CoreSdkError> {
		let mutex = match &self.options.serial_queue {
			SerialQueueMode::InProcess => None,
			SerialQueueMode::CrossProcess {
				name,
				lease_ttl,
				ping_interval,
			} => Some(DbMutex::new(self.services.db.clone(), name.clone(), *lease_ttl, *ping_interval)),
		};
		let queue = self.queue.get_or_init(|| Arc::new(SerialQueue::new(mutex))).clone();

		let remote = self.services.provider.get_status().await?;
		info!(
			"Rollup provider: chain {}, rollup contract {}, rollup size {}, latest rollup {}",
			remote.blockchain_status.chain_id,
			remote.blockchain_status.rollup_contract_address,
			remote.rollup_size,
			remote.blockchain_status.latest_rollup_id
		);

		let inner = self.clone();
		let task_remote = remote.clone();
		let records = queue
			.push(move || async move { inner.prepare_storage(&task_remote).await })
			.await??;

		for record in records {
			self.track_account(record);
		}
		*self.remote_status.lock().unwrap_or_else(PoisonError::into_inner) = Some(remote);
		self.spawn_listeners();
		Ok(())
	}

	/// Erases foreign local data, opens the world state and loads accounts.
	async fn prepare_storage(&self, remote: &RollupProviderStatus) -> Result<Vec<AccountRecord>, CoreSdkError> {
		let db = self.services.db.as_ref();
		let address = remote.blockchain_status.rollup_contract_address.as_bytes().to_vec();
		let version = self.options.data_version.to_be_bytes().to_vec();

		let stored_address = db.get_key(ROLLUP_CONTRACT_ADDRESS_KEY).await?;
		let stored_version = db.get_key(DATA_VERSION_KEY).await?;
		if stored_address.as_ref() != Some(&address) || stored_version.as_ref() != Some(&version) {
			warn!(
				"Local data does not match rollup contract {} at data version {}, erasing",
				remote.blockchain_status.rollup_contract_address, self.options.data_version
			);
			db.clear().await?;
			self.services.kv.clear().await?;
			db.set_key(ROLLUP_CONTRACT_ADDRESS_KEY, address).await?;
			db.set_key(DATA_VERSION_KEY, version).await?;
		}

		let mut world_state = self.world_state.lock().await;
		world_state.init(subtree_depth_for(remote.rollup_size)).await?;
		let synced = read_synced_to_rollup(db).await?;
		let (data_root, data_size) = (world_state.get_root()?, world_state.get_size()?);
		drop(world_state);

		self.status.send_modify(|status| {
			status.apply_remote(remote);
			status.synced_to_rollup = synced;
			status.latest_rollup_id = status.latest_rollup_id.max(synced);
			status.data_root = data_root;
			status.data_size = data_size;
		});
		Ok(db.get_accounts().await?)
	}

	/// Re-surfaces version mismatches and messages from other instances.
	fn spawn_listeners(self: &Arc<Self>) {
		let mut handles = Vec::new();

		if let Some(mut receiver) = self.services.provider.version_mismatch() {
			let sink = self.sink.clone();
			handles.push(tokio::spawn(async move {
				loop {
					match receiver.recv().await {
						Ok(server_version) => {
							warn!("Rollup provider runs version {}", server_version);
							sink.emit(SdkEvent::VersionMismatch { server_version });
						}
						Err(broadcast::error::RecvError::Lagged(_)) => continue,
						Err(broadcast::error::RecvError::Closed) => break,
					}
				}
			}));
		}

		if let Some(channel) = &self.services.broadcast {
			let mut receiver = channel.subscribe();
			let weak: Weak<Self> = Arc::downgrade(self);
			handles.push(tokio::spawn(async move {
				loop {
					let message = match receiver.recv().await {
						Ok(message) => message,
						Err(broadcast::error::RecvError::Lagged(skipped)) => {
							debug!("Broadcast listener skipped {} messages", skipped);
							continue;
						}
						Err(broadcast::error::RecvError::Closed) => break,
					};
					let Some(inner) = weak.upgrade() else {
						break;
					};
					if message.origin == inner.sink.origin {
						continue;
					}
					debug!("Event from instance {}: {:?}", message.origin, message.event);
					inner.sink.events.dispatch(&message.event);
					inner.sleep.interrupt();
				}
			}));
		}

		self.background
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.extend(handles);
	}

	fn start_sync_loop(self: &Arc<Self>) {
		if self.init_state() != SdkInitState::Running {
			return;
		}
		let handle = tokio::spawn(sync::run_sync_loop(self.clone()));
		*self.sync_loop.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
	}

	async fn await_sync_loop(&self) {
		let handle = self.sync_loop.lock().unwrap_or_else(PoisonError::into_inner).take();
		if let Some(handle) = handle {
			if let Err(e) = handle.await {
				warn!("Sync loop ended abnormally: {}", e);
			}
		}
	}

	async fn destroy(self: &Arc<Self>) {
		if !self.advance(SdkInitState::Stopping) {
			return;
		}
		info!("Destroying CoreSdk {}", self.sink.origin);
		self.sleep.interrupt();
		self.await_sync_loop().await;

		if let Some(queue) = self.queue.get() {
			let task_queue = queue.clone();
			if let Err(e) = queue.push(move || async move { task_queue.cancel() }).await {
				debug!("Queue already cancelled: {}", e);
				queue.cancel();
			}
			queue.stopped().await;
		}
		// A loop started by a task that was already running.
		self.await_sync_loop().await;

		self.release_resources().await;
		info!(
			"{}",
			self.progress
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.get_stats()
				.summary()
		);
		self.advance(SdkInitState::Destroyed);
		self.sink.events.dispatch(&SdkEvent::Destroyed);
		self.sink.events.clear();
	}

	/// Cancels the queue, deregisters account handlers and closes storage.
	async fn release_resources(&self) {
		if let Some(queue) = self.queue.get() {
			queue.cancel();
		}
		self.untrack_all();
		for handle in self.background.lock().unwrap_or_else(PoisonError::into_inner).drain(..) {
			handle.abort();
		}
		if let Err(e) = self.services.kv.close().await {
			warn!("Failed to close key/value store: {}", e);
		}
		if let Err(e) = self.services.db.close().await {
			warn!("Failed to close database: {}", e);
		}
	}

	/// Best-effort report to the provider's diagnostic sink.
	async fn report(&self, message: &str, details: serde_json::Value) {
		if let Err(e) = self
			.services
			.provider
			.client_log(ClientLogRecord::error(message, details))
			.await
		{
			debug!("Failed to send client log: {}", e);
		}
	}

	/// Best-effort warning to the provider's console log.
	async fn console_report(&self, message: &str, details: serde_json::Value) {
		if let Err(e) = self
			.services
			.provider
			.client_console_log(ClientLogRecord::warn(message, details))
			.await
		{
			debug!("Failed to send console log: {}", e);
		}
	}

	/// Whether the core and every account have reached the latest rollup.
	fn is_fully_synced(&self) -> bool {
		let (synced, latest) = {
			let status = self.status.borrow();
			(status.synced_to_rollup, status.latest_rollup_id)
		};
		synced >= latest
			&& self
				.account_states()
				.iter()
				.all(|account| account.is_synchronised(latest))
	}
}
