//! Order discovery for the relayer.
//!
//! Watches the settlement contract for `EncryptedOrderSubmitted` events and
//! forwards each decoded order over a channel. Block ranges are scanned by
//! polling. A range is checkpointed in storage once intake has persisted
//! every order in it. Provider outages are survived by reconnecting with
//! exponential backoff and re-scanning from the checkpoint.

use async_trait::async_trait;
use relayer_config::Config;
use relayer_storage::{StorageError, StorageService};
use relayer_types::{DiscoveredOrder, EventBus, ListenerState, OrderId};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod checkpoint;
pub mod source;

/// Re-export implementations
pub mod implementations {
	pub mod onchain;
}

pub use checkpoint::CheckpointStore;
pub use implementations::onchain::{decode_order, next_range, OnchainListener};
pub use source::{AlloyLogSource, LogSource};

#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("Connection error: {0}")]
	Connection(String),
	#[error("Decode error: {0}")]
	Decode(String),
	#[error("Order {0} was not persisted by intake")]
	NotPersisted(OrderId),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("Already monitoring")]
	AlreadyMonitoring,
}

#[async_trait]
pub trait DiscoveryInterface: Send + Sync {
	/// Starts watching for orders, forwarding each one to `sender`.
	async fn start_monitoring(
		&self,
		sender: mpsc::UnboundedSender<DiscoveredOrder>,
	) -> Result<(), DiscoveryError>;

	/// Stops watching and waits for the watcher task to exit.
	async fn stop_monitoring(&self) -> Result<(), DiscoveryError>;

	/// Current connection state.
	fn state(&self) -> ListenerState;
}

pub struct DiscoveryService {
	implementation: Box<dyn DiscoveryInterface>,
}

impl DiscoveryService {
	pub fn new(implementation: Box<dyn DiscoveryInterface>) -> Self {
		Self { implementation }
	}

	pub async fn start(
		&self,
		sender: mpsc::UnboundedSender<DiscoveredOrder>,
	) -> Result<(), DiscoveryError> {
		self.implementation.start_monitoring(sender).await
	}

	pub async fn stop(&self) -> Result<(), DiscoveryError> {
		self.implementation.stop_monitoring().await
	}

	pub fn state(&self) -> ListenerState {
		self.implementation.state()
	}
}

/// Creates the on-chain listener from configuration.
pub fn create_discovery(
	config: &Config,
	storage: Arc<StorageService>,
	events: EventBus,
) -> Result<Box<dyn DiscoveryInterface>, DiscoveryError> {
	let rpc_url = config
		.chain
		.rpc_url
		.as_deref()
		.ok_or_else(|| DiscoveryError::Connection("chain.rpc_url is not set".to_string()))?;
	let contract = config
		.chain
		.contract_address
		.ok_or_else(|| DiscoveryError::Connection("chain.contract_address is not set".to_string()))?;

	let source = AlloyLogSource::new(rpc_url, contract)?;

	Ok(Box::new(OnchainListener::new(
		Arc::new(source),
		CheckpointStore::new(storage),
		config.listener.clone(),
		events,
	)))
}
