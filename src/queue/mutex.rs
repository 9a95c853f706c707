use crate::storage::{Database, StorageError};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Named lease in the shared [`Database`], used to serialize work across
/// processes that share one storage volume.
pub struct DbMutex {
	db: Arc<dyn Database>,
	name: String,
	ttl: Duration,
	ping_interval: Duration,
	token: String,
}

impl DbMutex {
	pub fn new(db: Arc<dyn Database>, name: impl Into<String>, ttl: Duration, ping_interval: Duration) -> Self {
		let token: [u8; 16] = rand::random();
		Self {
			db,
			name: name.into(),
			ttl,
			ping_interval,
			token: hex::encode(token),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	fn lease_ttl(&self) -> chrono::Duration {
		chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::seconds(10))
	}

	/// Waits until the lease is held by this instance.
	pub async fn lock(&self) -> Result<(), StorageError> {
		let mut attempts = 0u64;
		loop {
			if self.db.acquire_lock(&self.name, &self.token, self.lease_ttl()).await? {
				debug!("Acquired lease {} after {} retries", self.name, attempts);
				return Ok(());
			}
			attempts += 1;
			tokio::time::sleep(self.ping_interval).await;
		}
	}

	pub async fn unlock(&self) -> Result<(), StorageError> {
		self.db.release_lock(&self.name, &self.token).await
	}

	/// Runs `task` while holding the lease, extending it every ping interval.
	pub async fn run_exclusive<F: Future<Output = ()>>(&self, task: F) -> Result<(), StorageError> {
		self.lock().await?;

		tokio::pin!(task);
		let mut ticker = tokio::time::interval(self.ping_interval);
		ticker.tick().await;
		loop {
			tokio::select! {
				_ = &mut task => break,
				_ = ticker.tick() => {
					match self.db.extend_lock(&self.name, &self.token, self.lease_ttl()).await {
						Ok(true) => {}
						Ok(false) => warn!("Lease {} expired while a task was running", self.name),
						Err(e) => warn!("Failed to extend lease {}: {}", self.name, e),
					}
				}
			}
		}

		if let Err(e) = self.unlock().await {
			warn!("Failed to release lease {}: {}", self.name, e);
		}
		Ok(())
	}
}
