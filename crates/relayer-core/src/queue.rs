//! FIFO order queue with duplicate suppression.

use relayer_types::{Order, OrderId};
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
	#[error("Order {0} is already queued")]
	AlreadyQueued(OrderId),
	#[error("Order {0} is being processed")]
	InFlight(OrderId),
	#[error("Order {0} was already processed")]
	AlreadyProcessed(OrderId),
	#[error("Queue is full")]
	QueueFull,
}

impl QueueError {
	/// Duplicates are expected when events are replayed.
	pub fn is_duplicate(&self) -> bool {
		!matches!(self, QueueError::QueueFull)
	}
}

/// An order waiting in the queue, or handed out for one attempt.
#[derive(Debug, Clone)]
pub struct QueuedOrder {
	pub order: Order,
	/// Attempts already made.
	pub attempts: u32,
	not_before: Option<Instant>,
}

impl QueuedOrder {
	fn is_ready(&self, now: Instant) -> bool {
		self.not_before.map_or(true, |at| at <= now)
	}
}

#[derive(Default)]
struct QueueState {
	items: VecDeque<QueuedOrder>,
	queued: HashSet<OrderId>,
	in_flight: HashSet<OrderId>,
	resolved: HashSet<OrderId>,
	/// An order was turned away for lack of room
	overflowed: bool,
}

/// Thread-safe FIFO queue of pending orders.
///
/// Every order id is tracked as queued, in flight or resolved, and an id in
/// any of those states cannot be enqueued again. Critical sections are
/// short and never held across an await.
pub struct OrderQueue {
	state: Mutex<QueueState>,
	/// Maximum number of queued (not in flight) orders
	max_size: usize,
}

impl OrderQueue {
	pub fn new(max_size: usize) -> Self {
		Self {
			state: Mutex::new(QueueState::default()),
			max_size,
		}
	}

	fn lock(&self) -> MutexGuard<'_, QueueState> {
		// Every mutation leaves the state consistent, so a poisoned lock is still usable
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Appends a new order to the tail.
	pub fn enqueue(&self, order: Order) -> Result<(), QueueError> {
		self.restore(order, 0)
	}

	/// Appends an order that already used `attempts` attempts.
	pub fn restore(&self, order: Order, attempts: u32) -> Result<(), QueueError> {
		let mut state = self.lock();
		let id = order.id;

		if state.resolved.contains(&id) {
			return Err(QueueError::AlreadyProcessed(id));
		}
		if state.in_flight.contains(&id) {
			return Err(QueueError::InFlight(id));
		}
		if state.queued.contains(&id) {
			return Err(QueueError::AlreadyQueued(id));
		}
		if state.items.len() >= self.max_size {
			state.overflowed = true;
			return Err(QueueError::QueueFull);
		}

		state.queued.insert(id);
		state.items.push_back(QueuedOrder {
			order,
			attempts,
			not_before: None,
		});

		debug!(order_id = %id, queued = state.items.len(), "Enqueued order");
		Ok(())
	}

	/// Removes up to `max` ready orders from the head, in FIFO order, and
	/// marks them in flight.
	///
	/// Orders still waiting out a retry delay keep their position.
	pub fn dequeue_batch(&self, max: usize) -> Vec<QueuedOrder> {
		let mut state = self.lock();
		let now = Instant::now();

		let mut batch = Vec::new();
		let mut waiting = VecDeque::with_capacity(state.items.len());

		while let Some(item) = state.items.pop_front() {
			if batch.len() < max && item.is_ready(now) {
				batch.push(item);
			} else {
				waiting.push_back(item);
			}
		}
		state.items = waiting;

		for item in &batch {
			state.queued.remove(&item.order.id);
			state.in_flight.insert(item.order.id);
		}

		batch
	}

	/// Releases an in-flight order and records it as resolved.
	pub fn complete(&self, id: &OrderId) {
		let mut state = self.lock();
		state.in_flight.remove(id);
		state.resolved.insert(*id);
	}

	/// Puts an in-flight order back at the tail, not eligible before `delay`.
	pub fn requeue(&self, mut item: QueuedOrder, delay: Duration) {
		let mut state = self.lock();
		let id = item.order.id;

		state.in_flight.remove(&id);
		state.queued.insert(id);
		item.not_before = Some(Instant::now() + delay);
		state.items.push_back(item);
	}

	/// Records an id as resolved without it passing through the queue.
	pub fn mark_resolved(&self, id: OrderId) {
		self.lock().resolved.insert(id);
	}

	/// True once there is room again after an order was turned away. The
	/// flag is cleared, so the caller owns readmitting the overflow.
	pub fn take_overflow(&self) -> bool {
		let mut state = self.lock();
		if state.overflowed && state.items.len() < self.max_size {
			state.overflowed = false;
			return true;
		}
		false
	}

	pub fn mark_overflowed(&self) {
		self.lock().overflowed = true;
	}

	/// Whether the id is queued, in flight or resolved.
	pub fn is_known(&self, id: &OrderId) -> bool {
		let state = self.lock();
		state.queued.contains(id) || state.in_flight.contains(id) || state.resolved.contains(id)
	}

	pub fn contains(&self, id: &OrderId) -> bool {
		self.lock().queued.contains(id)
	}

	pub fn len(&self) -> usize {
		self.lock().items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.lock().items.is_empty()
	}

	pub fn in_flight(&self) -> usize {
		self.lock().in_flight.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::Address;

	fn order(id: u64) -> Order {
		Order::new(id, Address::ZERO, Address::ZERO, Address::ZERO)
	}

	fn ids(batch: &[QueuedOrder]) -> Vec<OrderId> {
		batch.iter().map(|item| item.order.id).collect()
	}

	#[test]
	fn test_fifo_batches() {
		let queue = OrderQueue::new(100);
		for id in 1..=7 {
			queue.enqueue(order(id)).unwrap();
		}

		let first = queue.dequeue_batch(5);
		assert_eq!(ids(&first), (1..=5).map(OrderId::from).collect::<Vec<_>>());
		assert_eq!(queue.in_flight(), 5);
		assert_eq!(queue.len(), 2);

		let second = queue.dequeue_batch(5);
		assert_eq!(ids(&second), vec![OrderId::from(6), OrderId::from(7)]);
		assert!(queue.is_empty());
		assert!(queue.dequeue_batch(5).is_empty());
	}

	#[test]
	fn test_duplicate_suppression() {
		let queue = OrderQueue::new(100);
		queue.enqueue(order(1)).unwrap();
		assert_eq!(
			queue.enqueue(order(1)),
			Err(QueueError::AlreadyQueued(OrderId::from(1)))
		);

		let batch = queue.dequeue_batch(1);
		assert_eq!(
			queue.enqueue(order(1)),
			Err(QueueError::InFlight(OrderId::from(1)))
		);

		queue.complete(&batch[0].order.id);
		assert_eq!(queue.in_flight(), 0);
		assert_eq!(
			queue.enqueue(order(1)),
			Err(QueueError::AlreadyProcessed(OrderId::from(1)))
		);

		queue.mark_resolved(OrderId::from(9));
		assert!(queue.is_known(&OrderId::from(9)));
		assert!(queue.enqueue(order(9)).unwrap_err().is_duplicate());
	}

	#[test]
	fn test_capacity() {
		let queue = OrderQueue::new(2);
		queue.enqueue(order(1)).unwrap();
		queue.enqueue(order(2)).unwrap();

		let err = queue.enqueue(order(3)).unwrap_err();
		assert_eq!(err, QueueError::QueueFull);
		assert!(!err.is_duplicate());
		assert!(!queue.is_known(&OrderId::from(3)));

		// no room yet
		assert!(!queue.take_overflow());
		queue.dequeue_batch(1);
		assert!(queue.take_overflow());
		assert!(!queue.take_overflow());
	}

	#[test]
	fn test_in_flight_never_dequeued_twice() {
		let queue = OrderQueue::new(10);
		queue.enqueue(order(1)).unwrap();
		queue.enqueue(order(2)).unwrap();

		let first = queue.dequeue_batch(1);
		let second = queue.dequeue_batch(5);
		assert_eq!(ids(&first), vec![OrderId::from(1)]);
		assert_eq!(ids(&second), vec![OrderId::from(2)]);
	}

	#[tokio::test(start_paused = true)]
	async fn test_requeue_waits_for_delay() {
		let queue = OrderQueue::new(10);
		queue.enqueue(order(1)).unwrap();
		queue.enqueue(order(2)).unwrap();

		let mut batch = queue.dequeue_batch(1);
		let mut failed = batch.remove(0);
		failed.attempts += 1;
		queue.requeue(failed, Duration::from_secs(2));
		assert!(queue.contains(&OrderId::from(1)));
		assert_eq!(queue.in_flight(), 0);

		// the delayed order is skipped, its sibling is not blocked
		assert_eq!(ids(&queue.dequeue_batch(5)), vec![OrderId::from(2)]);
		assert!(queue.dequeue_batch(5).is_empty());

		tokio::time::advance(Duration::from_secs(2)).await;
		let retried = queue.dequeue_batch(5);
		assert_eq!(ids(&retried), vec![OrderId::from(1)]);
		assert_eq!(retried[0].attempts, 1);
	}
}
