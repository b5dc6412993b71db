//! In-process fakes for the evaluator, the chain and the listener.

use alloy::primitives::{Address, B256, U256};
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use relayer_delivery::{DeliveryError, DeliveryInterface};
use relayer_discovery::{DiscoveryError, DiscoveryInterface};
use relayer_evaluation::{EvaluationError, EvaluationInterface};
use relayer_types::contracts::executeEncryptedSwapCall;
use relayer_types::{
	DiscoveredOrder, EvaluationResult, ListenerState, Order, OrderId, Transaction,
	TransactionHash, TransactionReceipt,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

pub fn order(id: u64) -> Order {
	Order::new(
		id,
		Address::repeat_byte(0x11),
		Address::repeat_byte(0x22),
		Address::repeat_byte(0x33),
	)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
	Succeed,
	ServerError,
	Malformed,
	Rejected,
}

#[derive(Clone, Default)]
pub struct FakeEvaluator {
	behaviors: Arc<Mutex<HashMap<OrderId, Behavior>>>,
	calls: Arc<Mutex<Vec<OrderId>>>,
	gate: Arc<Mutex<Option<Arc<Notify>>>>,
}

impl FakeEvaluator {
	pub fn set(&self, id: u64, behavior: Behavior) {
		self.behaviors
			.lock()
			.unwrap()
			.insert(OrderId::from(id), behavior);
	}

	pub fn calls(&self) -> Vec<OrderId> {
		self.calls.lock().unwrap().clone()
	}

	/// Makes every evaluation wait for a permit on the returned handle.
	pub fn gate(&self) -> Arc<Notify> {
		let notify = Arc::new(Notify::new());
		*self.gate.lock().unwrap() = Some(notify.clone());
		notify
	}
}

#[async_trait]
impl EvaluationInterface for FakeEvaluator {
	async fn evaluate(&self, order: &Order) -> Result<EvaluationResult, EvaluationError> {
		self.calls.lock().unwrap().push(order.id);

		let gate = self.gate.lock().unwrap().clone();
		if let Some(gate) = gate {
			gate.notified().await;
		}

		let behavior = self
			.behaviors
			.lock()
			.unwrap()
			.get(&order.id)
			.copied()
			.unwrap_or(Behavior::Succeed);

		match behavior {
			Behavior::Succeed => Ok(EvaluationResult {
				amount_in: U256::from(10),
				min_out: U256::from(9),
				public_amount_out: U256::from(10),
				public_price: U256::from(1_000_000_000_000_000_000u64),
				result_blob: vec![0xfe, 0xed].into(),
			}),
			Behavior::ServerError => Err(EvaluationError::Status(500)),
			Behavior::Malformed => Err(EvaluationError::Malformed {
				field: "amountIn",
				reason: "missing".to_string(),
			}),
			Behavior::Rejected => Err(EvaluationError::Rejected),
		}
	}
}

/// Chain fake that settles every transaction in block 100 unless the order
/// was marked to revert. Transaction hashes encode the order id.
#[derive(Clone, Default)]
pub struct FakeDelivery {
	settled: Arc<Mutex<Vec<OrderId>>>,
	reverts: Arc<Mutex<HashSet<OrderId>>>,
}

impl FakeDelivery {
	pub fn hash_for(id: OrderId) -> TransactionHash {
		TransactionHash(B256::from(id.0.to_be_bytes::<32>()))
	}

	fn order_for(hash: &TransactionHash) -> OrderId {
		OrderId(U256::from_be_bytes(hash.0 .0))
	}

	/// Order ids of submitted settlement transactions, in submission order.
	pub fn settled(&self) -> Vec<OrderId> {
		self.settled.lock().unwrap().clone()
	}

	pub fn revert(&self, id: u64) {
		self.reverts.lock().unwrap().insert(OrderId::from(id));
	}
}

#[async_trait]
impl DeliveryInterface for FakeDelivery {
	async fn submit(&self, tx: Transaction) -> Result<TransactionHash, DeliveryError> {
		let call = executeEncryptedSwapCall::abi_decode(&tx.data)
			.map_err(|e| DeliveryError::Rejected(e.to_string()))?;
		let order_id = OrderId(call.orderId);

		self.settled.lock().unwrap().push(order_id);
		Ok(Self::hash_for(order_id))
	}

	async fn wait_for_confirmation(
		&self,
		hash: &TransactionHash,
		_confirmations: u64,
		_timeout: Duration,
	) -> Result<TransactionReceipt, DeliveryError> {
		let reverted = self.reverts.lock().unwrap().contains(&Self::order_for(hash));
		Ok(TransactionReceipt {
			hash: *hash,
			block_number: 100,
			success: !reverted,
		})
	}

	async fn get_receipt(
		&self,
		hash: &TransactionHash,
	) -> Result<Option<TransactionReceipt>, DeliveryError> {
		self.wait_for_confirmation(hash, 1, Duration::ZERO)
			.await
			.map(Some)
	}
}

/// Listener fake that replays a fixed list of orders on start without
/// waiting for acknowledgements.
pub struct FakeDiscovery {
	orders: Vec<Order>,
	sender: Mutex<Option<mpsc::UnboundedSender<DiscoveredOrder>>>,
}

impl FakeDiscovery {
	pub fn new(orders: Vec<Order>) -> Self {
		Self {
			orders,
			sender: Mutex::new(None),
		}
	}
}

#[async_trait]
impl DiscoveryInterface for FakeDiscovery {
	async fn start_monitoring(
		&self,
		sender: mpsc::UnboundedSender<DiscoveredOrder>,
	) -> Result<(), DiscoveryError> {
		for order in &self.orders {
			let (discovered, _) = DiscoveredOrder::new(order.clone());
			sender
				.send(discovered)
				.map_err(|e| DiscoveryError::Connection(e.to_string()))?;
		}
		*self.sender.lock().unwrap() = Some(sender);
		Ok(())
	}

	async fn stop_monitoring(&self) -> Result<(), DiscoveryError> {
		self.sender.lock().unwrap().take();
		Ok(())
	}

	fn state(&self) -> ListenerState {
		if self.sender.lock().unwrap().is_some() {
			ListenerState::Receiving
		} else {
			ListenerState::Disconnected
		}
	}
}
