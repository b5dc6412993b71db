//! Settlement submission for the relayer.
//!
//! Builds `executeEncryptedSwap` calls from validated evaluation results,
//! submits them through the delivery layer and tracks them to inclusion.
//! An order can have at most one settlement transaction in flight, and a
//! failed submission is never retried blindly.

use alloy::primitives::{Address, Bytes};
use alloy::sol_types::SolCall;
use dashmap::DashMap;
use relayer_delivery::{DeliveryError, DeliveryService};
use relayer_types::contracts::executeEncryptedSwapCall;
use relayer_types::{EvaluationResult, OrderId, Transaction, TransactionHash, TransactionReceipt};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SettlementError {
	#[error("Order {0} already has a settlement in flight")]
	AlreadyInFlight(OrderId),
	#[error("Submission failed: {0}")]
	Submission(DeliveryError),
	#[error("Settlement {0} reverted")]
	Reverted(TransactionHash),
	#[error("Confirmation of {tx_hash} failed: {source}")]
	Confirmation {
		tx_hash: TransactionHash,
		source: DeliveryError,
	},
}

/// ABI-encodes the settlement call for one order.
pub fn build_settlement_call(order_id: OrderId, result: &EvaluationResult) -> Bytes {
	let call = executeEncryptedSwapCall {
		orderId: order_id.0,
		fheResultBlob: result.result_blob.clone(),
		amountIn: result.amount_in,
		minOut: result.min_out,
		publicAmountOut: result.public_amount_out,
		publicPrice: result.public_price,
	};
	Bytes::from(call.abi_encode())
}

/// Marks an order as having a settlement in flight until dropped.
struct InFlightSlot {
	in_flight: Arc<DashMap<OrderId, Option<TransactionHash>>>,
	order_id: OrderId,
}

impl Drop for InFlightSlot {
	fn drop(&mut self) {
		self.in_flight.remove(&self.order_id);
	}
}

/// A sent settlement awaiting confirmation.
///
/// The order's in-flight slot is held until this value is consumed by
/// [`SettlementService::confirm`] or dropped.
pub struct PendingSettlement {
	pub order_id: OrderId,
	pub tx_hash: TransactionHash,
	_slot: InFlightSlot,
}

pub struct SettlementService {
	delivery: Arc<DeliveryService>,
	contract: Address,
	confirmations: u64,
	confirmation_timeout: Duration,
	in_flight: Arc<DashMap<OrderId, Option<TransactionHash>>>,
}

impl SettlementService {
	pub fn new(
		delivery: Arc<DeliveryService>,
		contract: Address,
		confirmations: u64,
		confirmation_timeout: Duration,
	) -> Self {
		Self {
			delivery,
			contract,
			confirmations,
			confirmation_timeout,
			in_flight: Arc::new(DashMap::new()),
		}
	}

	/// Whether a settlement for `order_id` is currently in flight.
	pub fn is_in_flight(&self, order_id: &OrderId) -> bool {
		self.in_flight.contains_key(order_id)
	}

	/// Submits the settlement transaction for an evaluated order.
	pub async fn submit(
		&self,
		order_id: OrderId,
		result: &EvaluationResult,
	) -> Result<PendingSettlement, SettlementError> {
		let slot = self.claim(order_id)?;

		let tx = Transaction {
			to: self.contract,
			data: build_settlement_call(order_id, result),
			value: Default::default(),
			gas_limit: None,
		};

		let tx_hash = self
			.delivery
			.submit(tx)
			.await
			.map_err(SettlementError::Submission)?;

		self.in_flight.insert(order_id, Some(tx_hash));
		info!(order_id = %order_id, tx_hash = %tx_hash, "Settlement submitted");

		Ok(PendingSettlement {
			order_id,
			tx_hash,
			_slot: slot,
		})
	}

	/// Waits for a submitted settlement and releases its in-flight slot.
	pub async fn confirm(
		&self,
		pending: PendingSettlement,
	) -> Result<TransactionReceipt, SettlementError> {
		let receipt = self
			.delivery
			.wait_for_confirmation(&pending.tx_hash, self.confirmations, self.confirmation_timeout)
			.await
			.map_err(|source| SettlementError::Confirmation {
				tx_hash: pending.tx_hash,
				source,
			})?;

		if !receipt.success {
			warn!(order_id = %pending.order_id, tx_hash = %pending.tx_hash, "Settlement reverted");
			return Err(SettlementError::Reverted(pending.tx_hash));
		}

		info!(
			order_id = %pending.order_id,
			tx_hash = %pending.tx_hash,
			block_number = receipt.block_number,
			"Settlement confirmed"
		);
		Ok(receipt)
	}

	/// Follows a settlement sent before a restart to its outcome without
	/// resubmitting it.
	pub async fn resume(
		&self,
		order_id: OrderId,
		tx_hash: TransactionHash,
	) -> Result<TransactionReceipt, SettlementError> {
		let slot = self.claim(order_id)?;
		self.in_flight.insert(order_id, Some(tx_hash));

		self.confirm(PendingSettlement {
			order_id,
			tx_hash,
			_slot: slot,
		})
		.await
	}

	fn claim(&self, order_id: OrderId) -> Result<InFlightSlot, SettlementError> {
		use dashmap::mapref::entry::Entry;

		match self.in_flight.entry(order_id) {
			Entry::Occupied(_) => Err(SettlementError::AlreadyInFlight(order_id)),
			Entry::Vacant(entry) => {
				entry.insert(None);
				Ok(InFlightSlot {
					in_flight: self.in_flight.clone(),
					order_id,
				})
			}
		}
	}
}
