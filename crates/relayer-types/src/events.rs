//! Lifecycle events published while orders move through the pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::{ListenerState, OrderId, TransactionHash};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayerEvent {
	Order(OrderEvent),
	Listener(ListenerState),
}

/// Events carry ids, hashes and error text only, never order contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
	Queued {
		order_id: OrderId,
	},
	Evaluating {
		order_id: OrderId,
		attempt: u32,
	},
	Submitted {
		order_id: OrderId,
		tx_hash: TransactionHash,
	},
	Confirmed {
		order_id: OrderId,
		tx_hash: TransactionHash,
		block_number: u64,
	},
	Retrying {
		order_id: OrderId,
		attempt: u32,
		retry_after: Duration,
	},
	Failed {
		order_id: OrderId,
		reason: String,
	},
	Dropped {
		order_id: OrderId,
		attempts: u32,
	},
}

/// Event bus for broadcasting relayer events to multiple subscribers.
///
/// Publishing never blocks; slow subscribers lose the oldest events once
/// the channel capacity is exceeded.
#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<RelayerEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<RelayerEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event to all current subscribers.
	///
	/// Having no subscribers is not an error for the relayer, so the send
	/// result is discarded.
	pub fn publish(&self, event: RelayerEvent) {
		let _ = self.sender.send(event);
	}

	pub fn order(&self, event: OrderEvent) {
		self.publish(RelayerEvent::Order(event));
	}
}
