//! Core engine of the encrypted-order relayer.
//!
//! Wires the listener, the order queue, the batch worker and persistence
//! together. Orders discovered on-chain are admitted to the queue by the
//! intake task; the worker drains the queue on a fixed cadence. Order
//! records are persisted so a restart resumes where the last run stopped.

use relayer_config::Config;
use relayer_delivery::{DeliveryInterface, DeliveryService};
use relayer_discovery::{DiscoveryError, DiscoveryInterface, DiscoveryService};
use relayer_evaluation::{EvaluationInterface, EvaluationService};
use relayer_settlement::SettlementService;
use relayer_storage::{StorageError, StorageService};
use relayer_types::{
	DiscoveredOrder, EventBus, ListenerState, OrderEvent, OrderRecord, OrderStatus,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub mod queue;
pub mod state;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_utils;

pub use queue::{OrderQueue, QueueError, QueuedOrder};
pub use state::OrderStateStore;
pub use worker::{BatchReport, BatchWorker, OrderOutcome, StatsSnapshot, TickOutcome};

#[derive(Debug, Error)]
pub enum RelayerError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
	#[error("Discovery error: {0}")]
	Discovery(#[from] DiscoveryError),
}

/// Snapshot served by the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RelayerStatus {
	pub queued: usize,
	pub in_flight: usize,
	pub listener: ListenerState,
	#[serde(flatten)]
	pub processed: StatsSnapshot,
}

/// Counts of records found at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
	pub requeued: usize,
	pub reconciling: usize,
	pub resolved: usize,
}

pub struct RelayerEngine {
	config: Config,
	queue: Arc<OrderQueue>,
	state: Arc<OrderStateStore>,
	discovery: Arc<DiscoveryService>,
	worker: Arc<BatchWorker>,
	events: EventBus,
	shutdown_tx: watch::Sender<bool>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RelayerEngine {
	/// Restores persisted orders into the queue.
	///
	/// Terminal records only seed duplicate suppression. Submitted records
	/// are followed to their receipt in the background and never resubmitted.
	pub async fn recover(&self) -> Result<RecoveryReport, RelayerError> {
		let mut report = RecoveryReport::default();

		for record in self.state.all().await? {
			let order_id = record.id();
			let status = record.status;
			match status {
				_ if status.is_terminal() => {
					self.queue.mark_resolved(order_id);
					report.resolved += 1;
				}
				OrderStatus::Submitted => {
					// Claimed before the intake task can admit a replayed event
					self.queue.mark_resolved(order_id);
					let worker = self.worker.clone();
					let handle = tokio::spawn(async move {
						worker.reconcile(record).await;
					});
					self.tasks.lock().await.push(handle);
					report.reconciling += 1;
				}
				_ => match self.queue.restore(record.order, record.attempts) {
					Ok(()) => report.requeued += 1,
					Err(e) => warn!(order_id = %order_id, error = %e, "Could not restore order"),
				},
			}
		}

		if report != RecoveryReport::default() {
			info!(
				requeued = report.requeued,
				reconciling = report.reconciling,
				resolved = report.resolved,
				"Recovered persisted orders"
			);
		}
		Ok(report)
	}

	/// Recovers persisted state, then starts the intake, the listener and
	/// the worker.
	pub async fn start(&self) -> Result<(), RelayerError> {
		self.recover().await?;

		let (order_tx, order_rx) = mpsc::unbounded_channel();

		let intake = tokio::spawn(intake(
			order_rx,
			self.queue.clone(),
			self.state.clone(),
			self.events.clone(),
		));
		self.tasks.lock().await.push(intake);

		self.discovery.start(order_tx).await?;

		let worker = tokio::spawn(self.worker.clone().run(self.shutdown_tx.subscribe()));
		self.tasks.lock().await.push(worker);

		info!(name = %self.config.relayer.name, "Relayer started");
		Ok(())
	}

	/// Stops the listener, lets the batch in flight finish and waits for all
	/// background tasks. Intake exits once it has drained every order the
	/// listener forwarded.
	pub async fn shutdown(&self) {
		info!("Shutting down relayer");

		if let Err(e) = self.discovery.stop().await {
			warn!(error = %e, "Failed to stop listener");
		}
		let _ = self.shutdown_tx.send(true);

		let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
		for task in tasks {
			if let Err(e) = task.await {
				error!(error = %e, "Background task ended abnormally");
			}
		}

		info!("Relayer stopped");
	}

	pub fn status(&self) -> RelayerStatus {
		RelayerStatus {
			queued: self.queue.len(),
			in_flight: self.queue.in_flight(),
			listener: self.discovery.state(),
			processed: self.worker.stats(),
		}
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}

	pub fn config(&self) -> &Config {
		&self.config
	}
}

/// Admits discovered orders to the queue until every listener handle is
/// dropped.
///
/// Each order is acknowledged once its record is stored, so the listener never
/// checkpoints past an order a restart could not find.
async fn intake(
	mut orders: mpsc::UnboundedReceiver<DiscoveredOrder>,
	queue: Arc<OrderQueue>,
	state: Arc<OrderStateStore>,
	events: EventBus,
) {
	while let Some(DiscoveredOrder { order, persisted }) = orders.recv().await {
		let order_id = order.id;
		if queue.is_known(&order_id) {
			debug!(order_id = %order_id, "Ignoring duplicate order");
			let _ = persisted.send(());
			continue;
		}

		// Persisted first so an order that does not fit is picked up later
		if let Err(e) = state.save(&OrderRecord::new(order.clone())).await {
			warn!(order_id = %order_id, error = %e, "Failed to persist order state");
			continue;
		}
		let _ = persisted.send(());

		match queue.enqueue(order) {
			Ok(()) => events.order(OrderEvent::Queued { order_id }),
			Err(e) if e.is_duplicate() => {
				debug!(order_id = %order_id, "Ignoring duplicate order");
			}
			Err(e) => warn!(
				order_id = %order_id,
				error = %e,
				"Order not admitted, it is readmitted once the queue drains"
			),
		}
	}
	debug!("Order intake stopped");
}

type DiscoveryFactory = Box<
	dyn FnOnce(
			&Config,
			Arc<StorageService>,
			EventBus,
		) -> Result<Box<dyn DiscoveryInterface>, DiscoveryError>
		+ Send,
>;

pub struct RelayerBuilder {
	config: Config,
	storage: Option<Arc<StorageService>>,
	evaluator: Option<Box<dyn EvaluationInterface>>,
	delivery: Option<Box<dyn DeliveryInterface>>,
	discovery_factory: Option<DiscoveryFactory>,
}

impl RelayerBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			storage: None,
			evaluator: None,
			delivery: None,
			discovery_factory: None,
		}
	}

	pub fn with_storage(mut self, storage: Arc<StorageService>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn with_evaluator(mut self, evaluator: Box<dyn EvaluationInterface>) -> Self {
		self.evaluator = Some(evaluator);
		self
	}

	pub fn with_delivery(mut self, delivery: Box<dyn DeliveryInterface>) -> Self {
		self.delivery = Some(delivery);
		self
	}

	/// The listener is built last, once storage and the event bus exist.
	pub fn with_discovery_factory<F>(mut self, factory: F) -> Self
	where
		F: FnOnce(
				&Config,
				Arc<StorageService>,
				EventBus,
			) -> Result<Box<dyn DiscoveryInterface>, DiscoveryError>
			+ Send
			+ 'static,
	{
		self.discovery_factory = Some(Box::new(factory));
		self
	}

	pub fn build(self) -> Result<RelayerEngine, RelayerError> {
		let storage = self
			.storage
			.ok_or_else(|| RelayerError::Config("Storage not provided".into()))?;
		let evaluator = self
			.evaluator
			.ok_or_else(|| RelayerError::Config("Evaluator not provided".into()))?;
		let delivery = self
			.delivery
			.ok_or_else(|| RelayerError::Config("Delivery not provided".into()))?;
		let discovery_factory = self
			.discovery_factory
			.ok_or_else(|| RelayerError::Config("Discovery factory not provided".into()))?;
		let contract = self
			.config
			.chain
			.contract_address
			.ok_or_else(|| RelayerError::Config("chain.contract_address is not set".into()))?;

		let events = EventBus::new(1000);
		let queue = Arc::new(OrderQueue::new(self.config.worker.max_queue_size));
		let state = Arc::new(OrderStateStore::new(storage.clone()));

		let settlement = Arc::new(SettlementService::new(
			Arc::new(DeliveryService::new(delivery)),
			contract,
			self.config.chain.confirmations,
			self.config.chain.confirmation_timeout(),
		));

		let worker = Arc::new(BatchWorker::new(
			queue.clone(),
			state.clone(),
			Arc::new(EvaluationService::new(evaluator)),
			settlement,
			events.clone(),
			self.config.worker.clone(),
		));

		let discovery = Arc::new(DiscoveryService::new(discovery_factory(
			&self.config,
			storage,
			events.clone(),
		)?));

		let (shutdown_tx, _) = watch::channel(false);

		Ok(RelayerEngine {
			config: self.config,
			queue,
			state,
			discovery,
			worker,
			events,
			shutdown_tx,
			tasks: Mutex::new(Vec::new()),
		})
	}
}
