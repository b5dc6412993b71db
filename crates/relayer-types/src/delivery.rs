//! Transaction delivery types for the relayer.
//!
//! This module defines the transaction shape handed to the delivery layer
//! and the hashes and receipts it reports back.

use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::rpc::types::{TransactionInput, TransactionRequest};
use std::fmt;

/// Blockchain transaction hash representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TransactionHash(pub B256);

impl fmt::Display for TransactionHash {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:#x}", self.0)
	}
}

/// Transaction receipt containing execution details.
///
/// Provides information about a transaction after it has been included in a block,
/// including its success status and block number.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TransactionReceipt {
	/// The hash of the transaction.
	pub hash: TransactionHash,
	/// The block number where the transaction was included.
	pub block_number: u64,
	/// Whether the transaction executed successfully.
	pub success: bool,
}

/// Contract call to be signed and sent by the delivery layer.
///
/// Nonce and fee fields are left to the provider so that a single signing key
/// gets its nonces assigned in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
	/// Contract being called.
	pub to: Address,
	/// ABI-encoded calldata.
	pub data: Bytes,
	/// Value to transfer in native currency.
	pub value: U256,
	/// Optional explicit gas limit; estimated by the provider otherwise.
	pub gas_limit: Option<u64>,
}

impl From<Transaction> for TransactionRequest {
	fn from(tx: Transaction) -> Self {
		let request = TransactionRequest::default()
			.to(tx.to)
			.input(TransactionInput::new(tx.data))
			.value(tx.value);

		match tx.gas_limit {
			Some(gas) => request.gas_limit(gas),
			None => request,
		}
	}
}
