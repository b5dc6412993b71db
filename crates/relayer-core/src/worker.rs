//! Batch worker.
//!
//! On every tick the worker pulls a batch from the queue and takes each order
//! through evaluation and settlement, one after another. A tick that fires
//! while the previous one is still running is skipped.

use crate::queue::{OrderQueue, QueueError, QueuedOrder};
use crate::state::OrderStateStore;
use relayer_config::WorkerConfig;
use relayer_evaluation::EvaluationService;
use relayer_settlement::SettlementService;
use relayer_types::{EventBus, OrderEvent, OrderRecord, OrderStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// How a single order left the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderOutcome {
	Confirmed,
	Retrying,
	Failed,
	Dropped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
	pub confirmed: usize,
	pub retrying: usize,
	pub failed: usize,
	pub dropped: usize,
}

impl BatchReport {
	fn record(&mut self, outcome: OrderOutcome) {
		match outcome {
			OrderOutcome::Confirmed => self.confirmed += 1,
			OrderOutcome::Retrying => self.retrying += 1,
			OrderOutcome::Failed => self.failed += 1,
			OrderOutcome::Dropped => self.dropped += 1,
		}
	}

	pub fn total(&self) -> usize {
		self.confirmed + self.retrying + self.failed + self.dropped
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
	/// Another tick was still in flight.
	Skipped,
	/// Nothing ready in the queue.
	Idle,
	Processed(BatchReport),
}

/// Counters since startup.
#[derive(Debug, Default)]
pub struct WorkerStats {
	confirmed: AtomicU64,
	failed: AtomicU64,
	dropped: AtomicU64,
	retried: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
	pub confirmed: u64,
	pub failed: u64,
	pub dropped: u64,
	pub retried: u64,
}

impl WorkerStats {
	fn count(&self, outcome: OrderOutcome) {
		let counter = match outcome {
			OrderOutcome::Confirmed => &self.confirmed,
			OrderOutcome::Retrying => &self.retried,
			OrderOutcome::Failed => &self.failed,
			OrderOutcome::Dropped => &self.dropped,
		};
		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub fn snapshot(&self) -> StatsSnapshot {
		StatsSnapshot {
			confirmed: self.confirmed.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
			dropped: self.dropped.load(Ordering::Relaxed),
			retried: self.retried.load(Ordering::Relaxed),
		}
	}
}

pub struct BatchWorker {
	queue: Arc<OrderQueue>,
	state: Arc<OrderStateStore>,
	evaluator: Arc<EvaluationService>,
	settlement: Arc<SettlementService>,
	events: EventBus,
	config: WorkerConfig,
	/// Held for the whole of a tick
	tick_guard: Mutex<()>,
	stopped: AtomicBool,
	stats: WorkerStats,
}

impl BatchWorker {
	pub fn new(
		queue: Arc<OrderQueue>,
		state: Arc<OrderStateStore>,
		evaluator: Arc<EvaluationService>,
		settlement: Arc<SettlementService>,
		events: EventBus,
		config: WorkerConfig,
	) -> Self {
		Self {
			queue,
			state,
			evaluator,
			settlement,
			events,
			config,
			tick_guard: Mutex::new(()),
			stopped: AtomicBool::new(false),
			stats: WorkerStats::default(),
		}
	}

	pub fn stats(&self) -> StatsSnapshot {
		self.stats.snapshot()
	}

	/// Runs one scheduler tick.
	pub async fn tick(&self) -> TickOutcome {
		let Ok(_guard) = self.tick_guard.try_lock() else {
			debug!("Previous batch still in flight, skipping tick");
			return TickOutcome::Skipped;
		};
		if self.stopped.load(Ordering::SeqCst) {
			return TickOutcome::Skipped;
		}

		let batch = self.queue.dequeue_batch(self.config.batch_size);
		self.readmit_overflow().await;
		if batch.is_empty() {
			return TickOutcome::Idle;
		}

		debug!(size = batch.len(), "Processing batch");
		let mut report = BatchReport::default();
		for item in batch {
			let outcome = self.process(item).await;
			self.stats.count(outcome);
			report.record(outcome);
		}

		info!(
			confirmed = report.confirmed,
			retrying = report.retrying,
			failed = report.failed,
			dropped = report.dropped,
			"Batch processed"
		);
		TickOutcome::Processed(report)
	}

	/// Ticks at the configured cadence until `shutdown` flips, then waits for
	/// the batch in flight to finish.
	pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		let mut interval = tokio::time::interval(self.config.tick_interval());
		interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

		info!(
			tick_ms = self.config.tick_interval_ms,
			batch_size = self.config.batch_size,
			"Batch worker started"
		);

		loop {
			tokio::select! {
				_ = interval.tick() => {
					// Spawned so a slow batch cannot delay the next tick
					let worker = self.clone();
					tokio::spawn(async move {
						worker.tick().await;
					});
				}
				_ = shutdown.changed() => break,
			}
		}

		self.stopped.store(true, Ordering::SeqCst);
		let _guard = self.tick_guard.lock().await;
		info!("Batch worker stopped");
	}

	async fn process(&self, mut item: QueuedOrder) -> OrderOutcome {
		let order_id = item.order.id;
		let attempt = item.attempts + 1;

		let mut record = OrderRecord::new(item.order.clone());
		record.attempts = attempt;
		record.transition(OrderStatus::Evaluating);
		self.persist(&record).await;
		self.events.order(OrderEvent::Evaluating { order_id, attempt });

		let evaluation = self.evaluator.evaluate(&item.order).await;
		let result = match evaluation {
			Ok(result) => result,
			Err(e) => {
				item.attempts = attempt;
				return self.retry_or_drop(item, record, e.to_string()).await;
			}
		};

		let pending = match self.settlement.submit(order_id, &result).await {
			Ok(pending) => pending,
			Err(e) => return self.fail(record, e.to_string()).await,
		};

		let tx_hash = pending.tx_hash;
		record.tx_hash = Some(tx_hash);
		record.transition(OrderStatus::Submitted);
		self.persist(&record).await;
		self.events.order(OrderEvent::Submitted { order_id, tx_hash });

		match self.settlement.confirm(pending).await {
			Ok(receipt) => self.confirmed(record, receipt.block_number).await,
			Err(e) => self.fail(record, e.to_string()).await,
		}
	}

	/// Follows a settlement submitted before a restart to its outcome.
	pub async fn reconcile(&self, mut record: OrderRecord) -> OrderOutcome {
		let order_id = record.id();
		let Some(tx_hash) = record.tx_hash else {
			return self
				.fail(record, "Submitted without a transaction hash".to_string())
				.await;
		};

		self.queue.mark_resolved(order_id);
		info!(order_id = %order_id, tx_hash = %tx_hash, "Reconciling submitted settlement");

		let outcome = match self.settlement.resume(order_id, tx_hash).await {
			Ok(receipt) => {
				record.tx_hash = Some(receipt.hash);
				self.confirmed(record, receipt.block_number).await
			}
			Err(e) => self.fail(record, e.to_string()).await,
		};
		self.stats.count(outcome);
		outcome
	}

	async fn confirmed(&self, mut record: OrderRecord, block_number: u64) -> OrderOutcome {
		let order_id = record.id();
		record.last_error = None;
		record.transition(OrderStatus::Confirmed);
		self.persist(&record).await;
		self.queue.complete(&order_id);

		if let Some(tx_hash) = record.tx_hash {
			self.events.order(OrderEvent::Confirmed {
				order_id,
				tx_hash,
				block_number,
			});
		}
		OrderOutcome::Confirmed
	}

	/// Terminal failure. The order is never submitted again.
	async fn fail(&self, mut record: OrderRecord, reason: String) -> OrderOutcome {
		let order_id = record.id();
		warn!(order_id = %order_id, error = %reason, "Order failed");

		record.last_error = Some(reason.clone());
		record.transition(OrderStatus::Failed);
		self.persist(&record).await;
		self.queue.complete(&order_id);

		self.events.order(OrderEvent::Failed { order_id, reason });
		OrderOutcome::Failed
	}

	async fn retry_or_drop(
		&self,
		item: QueuedOrder,
		mut record: OrderRecord,
		reason: String,
	) -> OrderOutcome {
		let order_id = item.order.id;
		let attempts = item.attempts;
		record.last_error = Some(reason.clone());

		if attempts >= self.config.max_attempts {
			error!(
				order_id = %order_id,
				attempts,
				error = %reason,
				"Order dropped after exhausting retries"
			);
			record.transition(OrderStatus::Dropped);
			self.persist(&record).await;
			self.queue.complete(&order_id);
			self.events.order(OrderEvent::Dropped { order_id, attempts });
			return OrderOutcome::Dropped;
		}

		let retry_after = self.config.retry_delay(attempts);
		warn!(
			order_id = %order_id,
			attempt = attempts,
			error = %reason,
			"Evaluation failed, retrying in {:?}",
			retry_after
		);

		record.transition(OrderStatus::Pending);
		self.persist(&record).await;
		self.queue.requeue(item, retry_after);
		self.events.order(OrderEvent::Retrying {
			order_id,
			attempt: attempts,
			retry_after,
		});
		OrderOutcome::Retrying
	}

	/// Re-offers persisted orders that were turned away while the queue was
	/// full. Readmitted orders are picked up from the next tick on.
	async fn readmit_overflow(&self) {
		if !self.queue.take_overflow() {
			return;
		}

		let records = match self.state.all().await {
			Ok(records) => records,
			Err(e) => {
				warn!(error = %e, "Failed to load orders waiting for queue capacity");
				self.queue.mark_overflowed();
				return;
			}
		};

		let mut readmitted = 0;
		for record in records {
			let order_id = record.id();
			let waiting = matches!(record.status, OrderStatus::Pending | OrderStatus::Evaluating);
			if !waiting || self.queue.is_known(&order_id) {
				continue;
			}
			match self.queue.restore(record.order, record.attempts) {
				Ok(()) => {
					readmitted += 1;
					self.events.order(OrderEvent::Queued { order_id });
				}
				Err(QueueError::QueueFull) => break,
				Err(e) => debug!(order_id = %order_id, error = %e, "Order already admitted"),
			}
		}

		if readmitted > 0 {
			info!(readmitted, "Readmitted orders that waited for queue capacity");
		}
	}

	async fn persist(&self, record: &OrderRecord) {
		if let Err(e) = self.state.save(record).await {
			warn!(order_id = %record.id(), error = %e, "Failed to persist order state");
		}
	}
}
