//! Chain access used by the listener.

use crate::DiscoveryError;
use alloy::primitives::Address;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use relayer_types::contracts::EncryptedOrderSubmitted;

/// Read access to the chain head and to order submission logs.
#[async_trait]
pub trait LogSource: Send + Sync {
	/// Latest block number known to the node.
	async fn block_number(&self) -> Result<u64, DiscoveryError>;

	/// `EncryptedOrderSubmitted` logs emitted in `from..=to`.
	async fn order_logs(&self, from: u64, to: u64) -> Result<Vec<Log>, DiscoveryError>;
}

/// [`LogSource`] backed by an HTTP JSON-RPC provider.
pub struct AlloyLogSource {
	provider: DynProvider,
	contract: Address,
}

impl AlloyLogSource {
	pub fn new(rpc_url: &str, contract: Address) -> Result<Self, DiscoveryError> {
		let url = rpc_url
			.parse()
			.map_err(|e| DiscoveryError::Connection(format!("Invalid RPC URL: {}", e)))?;

		let provider = ProviderBuilder::new().connect_http(url).erased();

		Ok(Self { provider, contract })
	}
}

#[async_trait]
impl LogSource for AlloyLogSource {
	async fn block_number(&self) -> Result<u64, DiscoveryError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| DiscoveryError::Connection(format!("Failed to get block number: {}", e)))
	}

	async fn order_logs(&self, from: u64, to: u64) -> Result<Vec<Log>, DiscoveryError> {
		let filter = Filter::new()
			.address(self.contract)
			.event_signature(EncryptedOrderSubmitted::SIGNATURE_HASH)
			.from_block(from)
			.to_block(to);

		self.provider
			.get_logs(&filter)
			.await
			.map_err(|e| DiscoveryError::Connection(format!("Failed to get logs: {}", e)))
	}
}
