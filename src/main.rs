use rollup_sdk_core::events::{FnHandler, SdkEvent};
use rollup_sdk_core::storage::{MemoryDatabase, MemoryKeyValueStore};
use rollup_sdk_core::utils::{DEFAULT_ASSET_DECIMALS, format_token_amount};
use rollup_sdk_core::{CoreSdk, CoreSdkOptions, CoreSdkServices, ServerRollupProvider};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const DEFAULT_PROVIDER_URL: &str = "http://localhost:8081";
const DEFAULT_DATA_DIR: &str = "./rollup-sdk-data";

fn options_from_env() -> CoreSdkOptions {
	let mut options = CoreSdkOptions::default();
	if let Ok(value) = std::env::var("ROLLUP_SDK_POLL_INTERVAL_SECS") {
		match value.parse::<u64>() {
			Ok(secs) => options.poll_interval = Duration::from_secs(secs),
			Err(e) => warn!("Ignoring ROLLUP_SDK_POLL_INTERVAL_SECS={}: {}", value, e),
		}
	}
	options
}

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive("rollup_sdk_core=debug".parse().unwrap())
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let provider_url = std::env::var("ROLLUP_PROVIDER_URL").unwrap_or_else(|_| DEFAULT_PROVIDER_URL.to_string());
	let data_dir = PathBuf::from(std::env::var("ROLLUP_SDK_DATA_DIR").unwrap_or_else(|_| DEFAULT_DATA_DIR.to_string()));
	info!("Starting rollup sync against {} with data in {:?}", provider_url, data_dir);

	if let Err(e) = tokio::fs::create_dir_all(&data_dir).await {
		error!("Failed to create data directory {:?}: {}", data_dir, e);
		return;
	}

	let provider = match ServerRollupProvider::new(&provider_url, Some(env!("CARGO_PKG_VERSION").to_string())) {
		Ok(provider) => provider,
		Err(e) => {
			error!("Invalid rollup provider url: {}", e);
			return;
		}
	};
	let db = match MemoryDatabase::open(data_dir.join("sdk-db.json")).await {
		Ok(db) => db,
		Err(e) => {
			error!("Failed to open database: {}", e);
			return;
		}
	};
	let kv = match MemoryKeyValueStore::open(data_dir.join("world-state.json")).await {
		Ok(kv) => kv,
		Err(e) => {
			error!("Failed to open world state store: {}", e);
			return;
		}
	};

	let services = CoreSdkServices::dev(Arc::new(provider), Arc::new(db), Arc::new(kv));
	let sdk = CoreSdk::new(services, options_from_env());
	sdk.events().subscribe(Arc::new(FnHandler::new("log", |event: &SdkEvent| {
		match event {
			SdkEvent::WorldStateUpdated {
				synced_to_rollup,
				latest_rollup_id,
			} => info!("World state at rollup {} of {}", synced_to_rollup, latest_rollup_id),
			SdkEvent::VersionMismatch { server_version } => {
				warn!("Rollup provider version {} differs from ours", server_version)
			}
			_ => {}
		}
		Ok(())
	})));

	if let Err(e) = sdk.init().await {
		error!("Failed to initialize: {}", e);
		return;
	}
	if let Err(e) = sdk.run() {
		error!("Failed to start sync: {}", e);
		sdk.destroy().await;
		return;
	}
	info!("Sync running as instance {}, press Ctrl-C to stop", sdk.instance_id());

	if let Err(e) = tokio::signal::ctrl_c().await {
		error!("Failed to listen for Ctrl-C: {}", e);
	}

	let status = sdk.get_local_status();
	info!(
		"Stopping at rollup {} of {}, data size {}, root {}",
		status.synced_to_rollup, status.latest_rollup_id, status.data_size, status.data_root
	);
	match sdk.get_accounts().await {
		Ok(accounts) => {
			for account in accounts {
				for asset_id in &status.fee_paying_asset_ids {
					match sdk.get_balance(&account.account_public_key, *asset_id).await {
						Ok(balance) => info!(
							"Account {} asset {}: {}",
							account.account_public_key,
							asset_id,
							format_token_amount(balance, DEFAULT_ASSET_DECIMALS)
						),
						Err(e) => warn!("Failed to read balance of {}: {}", account.account_public_key, e),
					}
				}
			}
		}
		Err(e) => warn!("Failed to list accounts: {}", e),
	}
	sdk.destroy().await;
	info!("Stopped");
}
