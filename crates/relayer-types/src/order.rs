//! Order types for the relayer.
//!
//! An order is created when the listener observes an `EncryptedOrderSubmitted`
//! event and is tracked through its lifecycle by an [`OrderRecord`].

use alloy::primitives::{Address, Bytes, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::oneshot;

use crate::TransactionHash;

/// Identifier assigned to an order by the settlement contract.
///
/// Order ids are unique and monotonically increasing on-chain, which makes
/// them the idempotency key for everything the relayer does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub U256);

impl From<u64> for OrderId {
	fn from(id: u64) -> Self {
		Self(U256::from(id))
	}
}

impl From<U256> for OrderId {
	fn from(id: U256) -> Self {
		Self(id)
	}
}

impl fmt::Display for OrderId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for OrderId {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		s.parse::<U256>()
			.map(Self)
			.map_err(|e| format!("invalid order id '{}': {}", s, e))
	}
}

/// Encrypted order payload.
///
/// The relayer never decrypts or inspects ciphertext. Its `Debug` output only
/// reveals the length, and it is skipped whenever an order is persisted.
#[derive(Clone, PartialEq, Eq)]
pub struct Ciphertext(Bytes);

impl Ciphertext {
	pub fn new(bytes: impl Into<Bytes>) -> Self {
		Self(bytes.into())
	}

	pub fn as_bytes(&self) -> &Bytes {
		&self.0
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for Ciphertext {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Ciphertext(<{} bytes redacted>)", self.0.len())
	}
}

/// An encrypted order observed on-chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
	/// Contract-assigned order id.
	pub id: OrderId,
	/// Account that submitted the order.
	pub submitter: Address,
	/// Token sold by the order.
	pub token_in: Address,
	/// Token bought by the order.
	pub token_out: Address,
	/// Encrypted trade parameters, when the event source exposes them.
	#[serde(skip)]
	pub ciphertext: Option<Ciphertext>,
	/// Block in which the submission event was emitted.
	pub block_number: Option<u64>,
}

impl Order {
	pub fn new(id: impl Into<OrderId>, submitter: Address, token_in: Address, token_out: Address) -> Self {
		Self {
			id: id.into(),
			submitter,
			token_in,
			token_out,
			ciphertext: None,
			block_number: None,
		}
	}

	pub fn with_block_number(mut self, block_number: u64) -> Self {
		self.block_number = Some(block_number);
		self
	}

	pub fn with_ciphertext(mut self, ciphertext: Ciphertext) -> Self {
		self.ciphertext = Some(ciphertext);
		self
	}
}

/// An order handed from the listener to intake.
///
/// Intake answers on `persisted` once the order record is stored. The
/// listener only checkpoints a block range after every order in it was
/// acknowledged.
#[derive(Debug)]
pub struct DiscoveredOrder {
	pub order: Order,
	pub persisted: oneshot::Sender<()>,
}

impl DiscoveredOrder {
	pub fn new(order: Order) -> (Self, oneshot::Receiver<()>) {
		let (persisted, ack) = oneshot::channel();
		(Self { order, persisted }, ack)
	}
}

/// Processing status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
	/// Waiting in the queue.
	Pending,
	/// Picked by the worker, evaluation in progress.
	Evaluating,
	/// Settlement transaction sent, awaiting inclusion.
	Submitted,
	/// Settlement transaction mined successfully.
	Confirmed,
	/// Settlement rejected, reverted or could not be sent.
	Failed,
	/// Retry budget exhausted.
	Dropped,
}

impl OrderStatus {
	/// Terminal orders are never picked up again.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Confirmed | OrderStatus::Failed | OrderStatus::Dropped
		)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			OrderStatus::Pending => "pending",
			OrderStatus::Evaluating => "evaluating",
			OrderStatus::Submitted => "submitted",
			OrderStatus::Confirmed => "confirmed",
			OrderStatus::Failed => "failed",
			OrderStatus::Dropped => "dropped",
		};
		f.write_str(name)
	}
}

/// Persisted view of an order and its progress through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
	pub order: Order,
	pub status: OrderStatus,
	/// Number of processing attempts started so far.
	pub attempts: u32,
	/// Settlement transaction, once one has been sent.
	pub tx_hash: Option<TransactionHash>,
	/// Error text of the most recent failed attempt.
	pub last_error: Option<String>,
	pub updated_at: DateTime<Utc>,
}

impl OrderRecord {
	pub fn new(order: Order) -> Self {
		Self {
			order,
			status: OrderStatus::Pending,
			attempts: 0,
			tx_hash: None,
			last_error: None,
			updated_at: Utc::now(),
		}
	}

	pub fn id(&self) -> OrderId {
		self.order.id
	}

	/// Moves the record to `status` and refreshes its timestamp.
	pub fn transition(&mut self, status: OrderStatus) {
		self.status = status;
		self.updated_at = Utc::now();
	}
}
