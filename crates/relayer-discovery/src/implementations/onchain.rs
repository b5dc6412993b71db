//! On-chain order listener.
//!
//! Polls the settlement contract for `EncryptedOrderSubmitted` logs in
//! bounded block ranges and forwards decoded orders to the intake channel.
//! The checkpoint never moves past an order intake has not persisted or a
//! log that failed to decode.

use crate::{CheckpointStore, DiscoveryError, DiscoveryInterface, LogSource};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use backoff::{backoff::Backoff, ExponentialBackoff};
use relayer_config::ListenerConfig;
use relayer_types::contracts::EncryptedOrderSubmitted;
use relayer_types::{DiscoveredOrder, EventBus, ListenerState, Order, RelayerEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Decodes an `EncryptedOrderSubmitted` log into an [`Order`].
pub fn decode_order(log: &Log) -> Result<Order, DiscoveryError> {
	let decoded = log
		.log_decode::<EncryptedOrderSubmitted>()
		.map_err(|e| DiscoveryError::Decode(format!("Failed to decode event: {}", e)))?;
	let event = decoded.inner.data;

	let order = Order::new(event.orderId, event.submitter, event.tokenIn, event.tokenOut);
	Ok(match log.block_number {
		Some(block) => order.with_block_number(block),
		None => order,
	})
}

/// Block range to scan next, or `None` when `next` is past the head.
///
/// Ranges are inclusive and hold at most `max_blocks` blocks.
pub fn next_range(next: u64, head: u64, max_blocks: u64) -> Option<(u64, u64)> {
	if next > head {
		return None;
	}
	let span = max_blocks.max(1) - 1;
	Some((next, next.saturating_add(span).min(head)))
}

/// Shared between the listener handle and its polling task.
struct Watcher {
	source: Arc<dyn LogSource>,
	checkpoints: CheckpointStore,
	config: ListenerConfig,
	events: EventBus,
	state: watch::Sender<ListenerState>,
}

impl Watcher {
	fn set_state(&self, state: ListenerState) {
		let changed = self.state.send_if_modified(|current| {
			if *current == state {
				false
			} else {
				*current = state;
				true
			}
		});
		if changed {
			debug!(%state, "Listener state changed");
			self.events.publish(RelayerEvent::Listener(state));
		}
	}

	/// First block to scan after (re)connecting.
	async fn resume_from(&self, head: u64) -> Result<u64, DiscoveryError> {
		if let Some(last) = self.checkpoints.load().await? {
			return Ok(last + 1);
		}
		Ok(self.config.start_block.unwrap_or(head + 1))
	}

	/// Scans from the checkpoint up to the head, then keeps polling.
	///
	/// A range is checkpointed only after intake acknowledged every order in
	/// it. Returns `Ok` only when the intake side has gone away. Any provider,
	/// decode or storage error is returned so the caller can back off and
	/// re-scan from the checkpoint.
	async fn sync(
		&self,
		sender: &mpsc::UnboundedSender<DiscoveredOrder>,
		backoff: &mut ExponentialBackoff,
	) -> Result<(), DiscoveryError> {
		let mut head = self.source.block_number().await?;
		backoff.reset();
		self.set_state(ListenerState::Subscribed);

		let mut next = self.resume_from(head).await?;
		info!(from_block = next, head, "Listener attached");

		loop {
			let Some((from, to)) = next_range(next, head, self.config.max_blocks_per_poll) else {
				self.set_state(ListenerState::Receiving);
				tokio::time::sleep(self.config.poll_interval()).await;
				head = self.source.block_number().await?;
				continue;
			};

			let logs = self.source.order_logs(from, to).await?;
			let mut unacknowledged = Vec::new();
			for log in logs.iter().filter(|log| !log.removed) {
				let order = match decode_order(log) {
					Ok(order) => order,
					Err(e) => {
						// Nothing past this log is checkpointed until it decodes
						error!(
							error = %e,
							block = ?log.block_number,
							log_index = ?log.log_index,
							"Undecodable order log"
						);
						return Err(e);
					}
				};

				let order_id = order.id;
				debug!(order_id = %order_id, block = ?order.block_number, "Order observed");
				let (discovered, persisted) = DiscoveredOrder::new(order);
				if sender.send(discovered).is_err() {
					return Ok(());
				}
				unacknowledged.push((order_id, persisted));
			}

			for (order_id, persisted) in unacknowledged {
				persisted
					.await
					.map_err(|_| DiscoveryError::NotPersisted(order_id))?;
			}
			self.checkpoints.save(to).await?;
			next = to + 1;

			if next <= head {
				// still catching up
				self.set_state(ListenerState::Subscribed);
			}
		}
	}

	async fn run(
		self: Arc<Self>,
		sender: mpsc::UnboundedSender<DiscoveredOrder>,
		mut stop_rx: mpsc::Receiver<()>,
	) {
		let mut backoff = ExponentialBackoff {
			initial_interval: self.config.reconnect_base_delay(),
			max_interval: self.config.reconnect_max_delay(),
			max_elapsed_time: None,
			..Default::default()
		};

		loop {
			let outcome = tokio::select! {
				outcome = self.sync(&sender, &mut backoff) => outcome,
				_ = stop_rx.recv() => break,
			};

			match outcome {
				Ok(()) => {
					info!("Order intake closed, listener exiting");
					break;
				}
				Err(e) => {
					self.set_state(ListenerState::Reconnecting);
					let delay = backoff
						.next_backoff()
						.unwrap_or(self.config.reconnect_max_delay());
					warn!(error = %e, retry_in = ?delay, "Listener lost the node, reconnecting");

					tokio::select! {
						_ = tokio::time::sleep(delay) => {}
						_ = stop_rx.recv() => break,
					}
				}
			}
		}

		self.set_state(ListenerState::Disconnected);
	}
}

/// Polling listener for `EncryptedOrderSubmitted` events.
///
/// State machine: `Disconnected → Subscribed → Receiving`, with
/// `Reconnecting` on any provider error. Every (re)connect resumes from the
/// persisted checkpoint, so events emitted during an outage are re-scanned.
pub struct OnchainListener {
	watcher: Arc<Watcher>,
	is_monitoring: AtomicBool,
	stop_signal: Mutex<Option<mpsc::Sender<()>>>,
	task: Mutex<Option<JoinHandle<()>>>,
}

impl OnchainListener {
	pub fn new(
		source: Arc<dyn LogSource>,
		checkpoints: CheckpointStore,
		config: ListenerConfig,
		events: EventBus,
	) -> Self {
		let (state, _) = watch::channel(ListenerState::Disconnected);
		Self {
			watcher: Arc::new(Watcher {
				source,
				checkpoints,
				config,
				events,
				state,
			}),
			is_monitoring: AtomicBool::new(false),
			stop_signal: Mutex::new(None),
			task: Mutex::new(None),
		}
	}

	/// Receiver following every state change.
	pub fn subscribe_state(&self) -> watch::Receiver<ListenerState> {
		self.watcher.state.subscribe()
	}
}

#[async_trait]
impl DiscoveryInterface for OnchainListener {
	async fn start_monitoring(
		&self,
		sender: mpsc::UnboundedSender<DiscoveredOrder>,
	) -> Result<(), DiscoveryError> {
		if self.is_monitoring.swap(true, Ordering::SeqCst) {
			return Err(DiscoveryError::AlreadyMonitoring);
		}

		let (stop_tx, stop_rx) = mpsc::channel(1);
		*self.stop_signal.lock().await = Some(stop_tx);

		let watcher = self.watcher.clone();
		let handle = tokio::spawn(watcher.run(sender, stop_rx));
		*self.task.lock().await = Some(handle);

		Ok(())
	}

	async fn stop_monitoring(&self) -> Result<(), DiscoveryError> {
		if !self.is_monitoring.swap(false, Ordering::SeqCst) {
			return Ok(());
		}

		if let Some(stop_tx) = self.stop_signal.lock().await.take() {
			let _ = stop_tx.send(()).await;
		}
		if let Some(handle) = self.task.lock().await.take() {
			if let Err(e) = handle.await {
				warn!(error = %e, "Listener task ended abnormally");
			}
		}

		Ok(())
	}

	fn state(&self) -> ListenerState {
		*self.watcher.state.borrow()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::{Address, U256};
	use alloy::sol_types::SolEvent;
	use relayer_storage::implementations::memory::MemoryStorage;
	use relayer_storage::StorageService;
	use relayer_types::OrderId;
	use std::sync::atomic::{AtomicU32, AtomicU64};
	use std::time::Duration;

	fn order_log(id: u64, block: u64) -> Log {
		let event = EncryptedOrderSubmitted {
			orderId: U256::from(id),
			submitter: Address::repeat_byte(0x11),
			tokenIn: Address::repeat_byte(0x22),
			tokenOut: Address::repeat_byte(0x33),
		};
		Log {
			inner: alloy::primitives::Log {
				address: Address::repeat_byte(0x44),
				data: event.encode_log_data(),
			},
			block_number: Some(block),
			..Default::default()
		}
	}

	#[derive(Default)]
	struct FakeChain {
		head: AtomicU64,
		logs: std::sync::Mutex<Vec<Log>>,
		/// Number of upcoming calls that fail.
		failures: AtomicU32,
		queried: std::sync::Mutex<Vec<(u64, u64)>>,
	}

	impl FakeChain {
		fn emit(&self, id: u64, block: u64) {
			self.logs.lock().unwrap().push(order_log(id, block));
			self.head.fetch_max(block, Ordering::SeqCst);
		}

		fn emit_log(&self, log: Log) {
			let block = log.block_number.unwrap_or_default();
			self.logs.lock().unwrap().push(log);
			self.head.fetch_max(block, Ordering::SeqCst);
		}

		fn fail_next(&self) -> Result<(), DiscoveryError> {
			let failing = self
				.failures
				.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
				.is_ok();
			if failing {
				Err(DiscoveryError::Connection("connection refused".to_string()))
			} else {
				Ok(())
			}
		}
	}

	#[async_trait]
	impl LogSource for FakeChain {
		async fn block_number(&self) -> Result<u64, DiscoveryError> {
			self.fail_next()?;
			Ok(self.head.load(Ordering::SeqCst))
		}

		async fn order_logs(&self, from: u64, to: u64) -> Result<Vec<Log>, DiscoveryError> {
			self.fail_next()?;
			self.queried.lock().unwrap().push((from, to));
			Ok(self
				.logs
				.lock()
				.unwrap()
				.iter()
				.filter(|log| (from..=to).contains(&log.block_number.unwrap_or_default()))
				.cloned()
				.collect())
		}
	}

	fn config(start_block: Option<u64>) -> ListenerConfig {
		ListenerConfig {
			poll_interval_ms: 10,
			max_blocks_per_poll: 2,
			start_block,
			reconnect_base_delay_ms: 10,
			reconnect_max_delay_secs: 1,
		}
	}

	/// Receives the next order and acknowledges it the way intake does.
	async fn recv_id(rx: &mut mpsc::UnboundedReceiver<DiscoveredOrder>) -> OrderId {
		let discovered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
			.await
			.expect("timed out waiting for an order")
			.expect("channel closed");
		let _ = discovered.persisted.send(());
		discovered.order.id
	}

	#[test]
	fn test_decode_order() {
		let order = decode_order(&order_log(42, 7)).unwrap();
		assert_eq!(order.id, OrderId::from(42));
		assert_eq!(order.submitter, Address::repeat_byte(0x11));
		assert_eq!(order.token_in, Address::repeat_byte(0x22));
		assert_eq!(order.token_out, Address::repeat_byte(0x33));
		assert_eq!(order.block_number, Some(7));
		assert!(order.ciphertext.is_none());
	}

	#[test]
	fn test_decode_rejects_foreign_log() {
		let mut log = order_log(1, 1);
		log.inner.data = alloy::primitives::LogData::new_unchecked(vec![], Default::default());
		assert!(matches!(decode_order(&log), Err(DiscoveryError::Decode(_))));
	}

	#[test]
	fn test_next_range() {
		assert_eq!(next_range(1, 10, 500), Some((1, 10)));
		assert_eq!(next_range(1, 10, 3), Some((1, 3)));
		assert_eq!(next_range(10, 10, 3), Some((10, 10)));
		assert_eq!(next_range(11, 10, 3), None);
		assert_eq!(next_range(5, 10, 0), Some((5, 5)));
	}

	#[tokio::test]
	async fn test_catch_up_checkpoint_and_restart() {
		let chain = Arc::new(FakeChain::default());
		chain.emit(1, 1);
		chain.emit(2, 3);
		chain.emit(3, 5);

		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let checkpoints = CheckpointStore::new(storage.clone());
		let listener = OnchainListener::new(
			chain.clone(),
			checkpoints.clone(),
			config(Some(1)),
			EventBus::new(64),
		);

		let (tx, mut rx) = mpsc::unbounded_channel();
		listener.start_monitoring(tx.clone()).await.unwrap();
		assert!(matches!(
			listener.start_monitoring(tx).await,
			Err(DiscoveryError::AlreadyMonitoring)
		));

		for expected in 1..=3u64 {
			assert_eq!(recv_id(&mut rx).await, OrderId::from(expected));
		}

		let mut state = listener.subscribe_state();
		tokio::time::timeout(
			Duration::from_secs(5),
			state.wait_for(|s| *s == ListenerState::Receiving),
		)
		.await
		.unwrap()
		.unwrap();
		listener.stop_monitoring().await.unwrap();
		assert_eq!(listener.state(), ListenerState::Disconnected);
		assert_eq!(checkpoints.load().await.unwrap(), Some(5));

		// ranges never exceed max_blocks_per_poll
		assert!(chain
			.queried
			.lock()
			.unwrap()
			.iter()
			.all(|(from, to)| to - from < 2));

		// a fresh listener resumes after the checkpoint
		chain.emit(4, 6);
		let restarted = OnchainListener::new(
			chain.clone(),
			CheckpointStore::new(storage),
			config(Some(1)),
			EventBus::new(64),
		);
		let (tx, mut rx) = mpsc::unbounded_channel();
		restarted.start_monitoring(tx).await.unwrap();
		assert_eq!(recv_id(&mut rx).await, OrderId::from(4));
		restarted.stop_monitoring().await.unwrap();
	}

	#[tokio::test]
	async fn test_reconnects_and_rescans_after_outage() {
		let chain = Arc::new(FakeChain::default());
		chain.emit(1, 1);

		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let events = EventBus::new(256);
		let mut bus = events.subscribe();
		let listener = OnchainListener::new(
			chain.clone(),
			CheckpointStore::new(storage),
			config(Some(1)),
			events,
		);

		let (tx, mut rx) = mpsc::unbounded_channel();
		listener.start_monitoring(tx).await.unwrap();
		assert_eq!(recv_id(&mut rx).await, OrderId::from(1));

		// node goes away while an order is emitted
		chain.failures.store(3, Ordering::SeqCst);
		chain.emit(2, 4);

		assert_eq!(recv_id(&mut rx).await, OrderId::from(2));
		listener.stop_monitoring().await.unwrap();

		let mut states = Vec::new();
		while let Ok(event) = bus.try_recv() {
			if let RelayerEvent::Listener(state) = event {
				states.push(state);
			}
		}
		let reconnecting = states
			.iter()
			.position(|s| *s == ListenerState::Reconnecting)
			.expect("listener never reported reconnecting");
		assert!(states[reconnecting..].contains(&ListenerState::Subscribed));
		assert_eq!(states.last(), Some(&ListenerState::Disconnected));
	}

	#[tokio::test]
	async fn test_without_checkpoint_starts_at_head() {
		let chain = Arc::new(FakeChain::default());
		chain.emit(1, 10);

		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let listener = OnchainListener::new(
			chain.clone(),
			CheckpointStore::new(storage),
			config(None),
			EventBus::new(64),
		);

		let (tx, mut rx) = mpsc::unbounded_channel();
		listener.start_monitoring(tx).await.unwrap();
		let mut state = listener.subscribe_state();
		tokio::time::timeout(
			Duration::from_secs(5),
			state.wait_for(|s| *s == ListenerState::Receiving),
		)
		.await
		.unwrap()
		.unwrap();

		chain.emit(2, 11);
		assert_eq!(recv_id(&mut rx).await, OrderId::from(2));
		listener.stop_monitoring().await.unwrap();

		// order 1 predates the listener and was never forwarded
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_checkpoint_waits_for_intake() {
		let chain = Arc::new(FakeChain::default());
		chain.emit(1, 1);

		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let checkpoints = CheckpointStore::new(storage);
		let listener = OnchainListener::new(
			chain.clone(),
			checkpoints.clone(),
			config(Some(1)),
			EventBus::new(64),
		);

		let (tx, mut rx) = mpsc::unbounded_channel();
		listener.start_monitoring(tx).await.unwrap();

		let discovered = tokio::time::timeout(Duration::from_secs(5), rx.recv())
			.await
			.unwrap()
			.unwrap();
		tokio::time::sleep(Duration::from_millis(50)).await;
		assert_eq!(checkpoints.load().await.unwrap(), None);

		// intake failed to persist: the range is scanned again
		drop(discovered);
		assert_eq!(recv_id(&mut rx).await, OrderId::from(1));

		let mut state = listener.subscribe_state();
		tokio::time::timeout(
			Duration::from_secs(5),
			state.wait_for(|s| *s == ListenerState::Receiving),
		)
		.await
		.unwrap()
		.unwrap();
		listener.stop_monitoring().await.unwrap();
		assert_eq!(checkpoints.load().await.unwrap(), Some(1));
	}

	#[tokio::test]
	async fn test_undecodable_log_holds_checkpoint() {
		let chain = Arc::new(FakeChain::default());
		chain.emit(1, 1);
		// right signature, but the indexed fields are missing
		let mut broken = order_log(2, 2);
		broken.inner.data = alloy::primitives::LogData::new_unchecked(
			vec![EncryptedOrderSubmitted::SIGNATURE_HASH],
			Default::default(),
		);
		chain.emit_log(broken);
		chain.emit(3, 3);

		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let checkpoints = CheckpointStore::new(storage);
		let events = EventBus::new(256);
		let mut bus = events.subscribe();
		let listener = OnchainListener::new(
			chain.clone(),
			checkpoints.clone(),
			config(Some(1)),
			events,
		);

		let (tx, mut rx) = mpsc::unbounded_channel();
		listener.start_monitoring(tx).await.unwrap();
		assert_eq!(recv_id(&mut rx).await, OrderId::from(1));

		tokio::time::timeout(Duration::from_secs(5), async {
			loop {
				if let Ok(RelayerEvent::Listener(ListenerState::Reconnecting)) = bus.recv().await {
					break;
				}
			}
		})
		.await
		.expect("listener never reported reconnecting");
		listener.stop_monitoring().await.unwrap();

		assert_eq!(checkpoints.load().await.unwrap(), None);
		while let Ok(discovered) = rx.try_recv() {
			assert_eq!(discovered.order.id, OrderId::from(1));
		}
	}
}
