//! Persisted scan position of the listener.

use relayer_storage::{StorageError, StorageService};
use std::sync::Arc;

const NAMESPACE: &str = "listener";
const LAST_BLOCK: &str = "last_block";

/// Last block whose order events were all forwarded.
#[derive(Clone)]
pub struct CheckpointStore {
	storage: Arc<StorageService>,
}

impl CheckpointStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	pub async fn load(&self) -> Result<Option<u64>, StorageError> {
		self.storage.retrieve_optional(NAMESPACE, LAST_BLOCK).await
	}

	pub async fn save(&self, block: u64) -> Result<(), StorageError> {
		self.storage.store(NAMESPACE, LAST_BLOCK, &block).await
	}
}
