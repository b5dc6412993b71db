//! Persisted order records.

use relayer_storage::{StorageError, StorageService};
use relayer_types::{OrderId, OrderRecord};
use std::sync::Arc;

const NAMESPACE: &str = "orders";

/// Order records keyed by order id. Ciphertext is never stored.
pub struct OrderStateStore {
	storage: Arc<StorageService>,
}

impl OrderStateStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn save(&self, record: &OrderRecord) -> Result<(), StorageError> {
		self.storage
			.store(NAMESPACE, &record.id().to_string(), record)
			.await
	}

	pub async fn get(&self, id: &OrderId) -> Result<Option<OrderRecord>, StorageError> {
		self.storage.retrieve_optional(NAMESPACE, &id.to_string()).await
	}

	/// Every stored record, oldest order id first.
	pub async fn all(&self) -> Result<Vec<OrderRecord>, StorageError> {
		let mut records: Vec<OrderRecord> = self.storage.retrieve_all(NAMESPACE).await?;
		records.sort_by_key(|record| record.id());
		Ok(records)
	}
}
