//! Alloy-based EVM delivery.

use crate::{DeliveryError, DeliveryInterface};
use alloy::network::EthereumWallet;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use async_trait::async_trait;
use relayer_types::{Transaction, TransactionHash, TransactionReceipt};
use std::time::Duration;

/// Alloy-based EVM delivery implementation.
///
/// The provider fills nonce, gas and chain id and signs with the relayer
/// wallet. Submissions are expected to be sequential so nonces are taken in
/// order.
pub struct AlloyDelivery {
	provider: DynProvider,
	poll_interval: Duration,
}

impl AlloyDelivery {
	pub fn new(
		rpc_url: &str,
		wallet: EthereumWallet,
		poll_interval: Duration,
	) -> Result<Self, DeliveryError> {
		let url = rpc_url
			.parse()
			.map_err(|e| DeliveryError::Network(format!("Invalid RPC URL: {}", e)))?;

		let provider = ProviderBuilder::new().wallet(wallet).connect_http(url).erased();

		Ok(Self {
			provider,
			poll_interval,
		})
	}

	async fn fetch_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		let receipt = self
			.provider
			.get_transaction_receipt(hash.0)
			.await
			.map_err(|e| DeliveryError::Network(format!("Failed to get receipt: {}", e)))?;

		Ok(receipt.map(|receipt| TransactionReceipt {
			hash: TransactionHash(receipt.transaction_hash),
			block_number: receipt.block_number.unwrap_or(0),
			success: receipt.status(),
		}))
	}
}

#[async_trait]
impl DeliveryInterface for AlloyDelivery {
	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let request: TransactionRequest = tx.into();

		// The provider's wallet handles signing
		let pending_tx = self
			.provider
			.send_transaction(request)
			.await
			.map_err(|e| DeliveryError::Rejected(format!("Failed to send transaction: {}", e)))?;

		let tx_hash = TransactionHash(*pending_tx.tx_hash());
		tracing::debug!(tx_hash = %tx_hash, "Submitted transaction");

		Ok(tx_hash)
	}

	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		confirmations: u64,
		timeout: Duration,
	) -> Result<TransactionReceipt, DeliveryError> {
		// Transport errors only delay the outcome; the transaction may still land
		let start_time = tokio::time::Instant::now();

		tracing::debug!(
			tx_hash = %hash,
			"Waiting for {} confirmations (timeout: {}s)",
			confirmations,
			timeout.as_secs()
		);

		loop {
			if start_time.elapsed() > timeout {
				return Err(DeliveryError::Timeout(timeout));
			}

			let receipt = match self.fetch_receipt(hash).await {
				Ok(Some(receipt)) => receipt,
				Ok(None) => {
					// Not mined yet
					tokio::time::sleep(self.poll_interval).await;
					continue;
				}
				Err(e) => {
					tracing::debug!(tx_hash = %hash, error = %e, "Receipt poll failed, retrying");
					tokio::time::sleep(self.poll_interval).await;
					continue;
				}
			};

			// A failed transaction will not become successful with more blocks
			if !receipt.success {
				return Ok(receipt);
			}

			let current_block = match self.provider.get_block_number().await {
				Ok(block) => block,
				Err(e) => {
					tracing::debug!(tx_hash = %hash, error = %e, "Block number poll failed, retrying");
					tokio::time::sleep(self.poll_interval).await;
					continue;
				}
			};

			// The inclusion block counts as the first confirmation
			let current_confirmations = current_block.saturating_sub(receipt.block_number) + 1;
			if current_confirmations >= confirmations {
				return Ok(receipt);
			}

			tracing::debug!(
				tx_hash = %hash,
				"Waiting for {} more confirmations",
				confirmations - current_confirmations
			);
			tokio::time::sleep(self.poll_interval).await;
		}
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.fetch_receipt(hash).await
	}
}
