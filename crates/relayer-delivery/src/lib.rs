//! Transaction delivery for the relayer.
//!
//! Signs and submits transactions with the relayer account and tracks them
//! until they are mined with the required number of confirmations.

use async_trait::async_trait;
use relayer_account::AccountService;
use relayer_config::ChainConfig;
use relayer_types::{Transaction, TransactionHash, TransactionReceipt};
use std::time::Duration;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod evm {
		pub mod alloy;
	}
}

pub use implementations::evm::alloy::AlloyDelivery;

#[derive(Debug, Error)]
pub enum DeliveryError {
	#[error("Network error: {0}")]
	Network(String),
	#[error("Transaction rejected: {0}")]
	Rejected(String),
	#[error("Timed out after {0:?} waiting for confirmation")]
	Timeout(Duration),
}

#[async_trait]
pub trait DeliveryInterface: Send + Sync {
	/// Signs and broadcasts a transaction.
	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError>;

	/// Waits until the transaction is mined with `confirmations` blocks on
	/// top, or `timeout` elapses.
	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		confirmations: u64,
		timeout: Duration,
	) -> Result<TransactionReceipt, DeliveryError>;

	/// Receipt of a mined transaction, `None` while it is pending or unknown.
	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError>;
}

pub struct DeliveryService {
	implementation: Box<dyn DeliveryInterface>,
}

impl DeliveryService {
	pub fn new(implementation: Box<dyn DeliveryInterface>) -> Self {
		Self { implementation }
	}

	pub async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		self.implementation.submit(tx).await
	}

	pub async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		confirmations: u64,
		timeout: Duration,
	) -> Result<TransactionReceipt, DeliveryError> {
		self.implementation
			.wait_for_confirmation(hash, confirmations, timeout)
			.await
	}

	pub async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.implementation.get_receipt(hash).await
	}
}

/// Creates the RPC delivery provider signing with the relayer account.
pub fn create_delivery(
	config: &ChainConfig,
	account: &AccountService,
) -> Result<Box<dyn DeliveryInterface>, DeliveryError> {
	let rpc_url = config
		.rpc_url
		.as_deref()
		.ok_or_else(|| DeliveryError::Network("chain.rpc_url is not set".to_string()))?;

	Ok(Box::new(AlloyDelivery::new(
		rpc_url,
		account.wallet(),
		config.receipt_poll_interval(),
	)?))
}
