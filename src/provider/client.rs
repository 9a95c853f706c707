//!
//! HTTP client for the rollup provider.
//!
//! All reads are retried with exponential backoff on transport errors and 5xx
//! responses. Every response is checked for the `x-server-version` header; the
//! first mismatch against the expected version is published on the
//! `version_mismatch` channel.

use super::types::*;
use super::RollupProvider;
use crate::types::TxId;

use backoff::{ExponentialBackoff, future::retry};
use reqwest::{Client, Response, Url};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const SERVER_VERSION_HEADER: &str = "x-server-version";

/// Rollup provider client
pub struct ServerRollupProvider {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the provider, ending with `/`.
	base_url: Url,
	/// Server version this client was built against.
	expected_version: Option<String>,
	/// Upper bound for retrying a single request.
	max_retry_time: Duration,
	version_mismatch_tx: broadcast::Sender<String>,
	version_mismatch_reported: AtomicBool,
}

impl ServerRollupProvider {
	/// Create a new provider client.
	///
	/// # Arguments
	/// * `base_url` - The provider's HTTP endpoint.
	/// * `expected_version` - Server version to compare against, if any.
	pub fn new(base_url: &str, expected_version: Option<String>) -> Result<Self, RollupProviderError> {
		let normalized = if base_url.ends_with('/') {
			base_url.to_string()
		} else {
			format!("{}/", base_url)
		};
		let base_url =
			Url::parse(&normalized).map_err(|e| RollupProviderError::InvalidUrl(format!("{}: {}", base_url, e)))?;

		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;
		let (version_mismatch_tx, _) = broadcast::channel(4);

		Ok(Self {
			http_client,
			base_url,
			expected_version,
			max_retry_time: Duration::from_secs(60),
			version_mismatch_tx,
			version_mismatch_reported: AtomicBool::new(false),
		})
	}

	/// Override the maximum time spent retrying one request.
	pub fn with_max_retry_time(mut self, max_retry_time: Duration) -> Self {
		self.max_retry_time = max_retry_time;
		self
	}

	fn endpoint(&self, path: &str) -> Result<Url, RollupProviderError> {
		self.base_url
			.join(path)
			.map_err(|e| RollupProviderError::InvalidUrl(format!("{}: {}", path, e)))
	}

	fn backoff_policy(&self) -> ExponentialBackoff {
		ExponentialBackoff {
			max_elapsed_time: Some(self.max_retry_time),
			..ExponentialBackoff::default()
		}
	}

	fn check_server_version(&self, response: &Response) {
		let Some(expected) = &self.expected_version else {
			return;
		};
		let Some(actual) = response
			.headers()
			.get(SERVER_VERSION_HEADER)
			.and_then(|v| v.to_str().ok())
		else {
			return;
		};
		if actual != expected && !self.version_mismatch_reported.swap(true, Ordering::SeqCst) {
			warn!("Rollup provider version {} does not match expected {}", actual, expected);
			// No receivers is fine, the notification is best-effort.
			let _ = self.version_mismatch_tx.send(actual.to_string());
		}
	}

	/// Execute a GET request and parse the JSON response.
	async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RollupProviderError> {
		let url = self.endpoint(path)?;

		let response = retry(self.backoff_policy(), || async {
			let response = self.http_client.get(url.clone()).send().await.map_err(|e| {
				debug!("Rollup provider request to {} failed: {}", url, e);
				backoff::Error::transient(RollupProviderError::HttpError(e))
			})?;

			let status = response.status();
			if status.is_server_error() {
				return Err(backoff::Error::transient(RollupProviderError::BadStatus {
					endpoint: path.to_string(),
					status: status.as_u16(),
				}));
			}
			if !status.is_success() {
				return Err(backoff::Error::permanent(RollupProviderError::BadStatus {
					endpoint: path.to_string(),
					status: status.as_u16(),
				}));
			}
			Ok(response)
		})
		.await?;

		self.check_server_version(&response);
		Ok(response.json::<T>().await?)
	}

	/// Execute a POST request with a JSON body. Not retried: submissions are not idempotent.
	async fn post_json<B: serde::Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, RollupProviderError> {
		let url = self.endpoint(path)?;
		let response = self
			.http_client
			.post(url)
			.header("Content-Type", "application/json")
			.json(body)
			.send()
			.await?;

		if !response.status().is_success() {
			return Err(RollupProviderError::BadStatus {
				endpoint: path.to_string(),
				status: response.status().as_u16(),
			});
		}

		self.check_server_version(&response);
		Ok(response)
	}
}

#[async_trait::async_trait]
impl RollupProvider for ServerRollupProvider {
	async fn get_status(&self) -> Result<RollupProviderStatus, RollupProviderError> {
		self.get_json("status").await
	}

	async fn get_latest_rollup_id(&self) -> Result<i64, RollupProviderError> {
		let response: LatestRollupIdResponse = self.get_json("latest-rollup-id").await?;
		Ok(response.latest_rollup_id)
	}

	async fn get_blocks(&self, from: u32, max_count: u32) -> Result<Vec<Block>, RollupProviderError> {
		let blocks: Vec<Block> = self
			.get_json(&format!("get-blocks?from={}&take={}", from, max_count))
			.await?;
		debug!("Fetched {} blocks from rollup {}", blocks.len(), from);
		Ok(blocks)
	}

	async fn get_initial_world_state(&self) -> Result<InitialWorldState, RollupProviderError> {
		self.get_json("get-initial-world-state").await
	}

	async fn send_txs(&self, txs: Vec<Tx>) -> Result<Vec<TxId>, RollupProviderError> {
		let response = self.post_json("txs", &txs).await?;
		let parsed: SendTxsResponse = response.json().await?;
		Ok(parsed.tx_ids)
	}

	async fn client_log(&self, record: ClientLogRecord) -> Result<(), RollupProviderError> {
		self.post_json("client-log", &record).await?;
		Ok(())
	}

	async fn client_console_log(&self, record: ClientLogRecord) -> Result<(), RollupProviderError> {
		self.post_json("client-console-log", &record).await?;
		Ok(())
	}

	fn version_mismatch(&self) -> Option<broadcast::Receiver<String>> {
		Some(self.version_mismatch_tx.subscribe())
	}
}
