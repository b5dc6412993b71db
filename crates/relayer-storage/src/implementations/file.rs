//! File-based storage backend.
//!
//! Each `namespace:id` key is stored at `<base>/<namespace>/<id>.json`.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// File-based storage implementation.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	fn namespace_dir(&self, namespace: &str) -> PathBuf {
		self.base_path.join(sanitize(namespace))
	}

	fn get_file_path(&self, key: &str) -> PathBuf {
		let (namespace, id) = key.split_once(':').unwrap_or(("default", key));
		self.namespace_dir(namespace)
			.join(format!("{}.json", sanitize(id)))
	}
}

/// Keeps keys from escaping the base directory.
fn sanitize(part: &str) -> String {
	part.replace(['/', '\\', ':', '.'], "_")
}

fn backend_err(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);

		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(backend_err(e)),
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent).await.map_err(backend_err)?;
		}

		// Write atomically by writing to temp file then renaming
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value).await.map_err(backend_err)?;
		fs::rename(&temp_path, &path).await.map_err(backend_err)?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(backend_err(e)),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(backend_err)
	}

	async fn list(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let dir = self.namespace_dir(namespace);
		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(backend_err(e)),
		};

		let mut ids = Vec::new();
		while let Some(entry) = entries.next_entry().await.map_err(backend_err)? {
			let path = entry.path();
			// leftover .tmp files from an interrupted write are ignored
			if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
				continue;
			}
			if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
				ids.push(stem.to_string());
			}
		}
		ids.sort();
		Ok(ids)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_file_storage_persists_across_instances() {
		let dir = tempfile::tempdir().unwrap();

		let storage = FileStorage::new(dir.path().to_path_buf());
		storage.set_bytes("orders:1", b"one".to_vec()).await.unwrap();
		storage.set_bytes("orders:2", b"two".to_vec()).await.unwrap();
		storage.set_bytes("listener:last_block", b"42".to_vec()).await.unwrap();

		let reopened = FileStorage::new(dir.path().to_path_buf());
		assert_eq!(reopened.get_bytes("orders:1").await.unwrap(), b"one");
		assert_eq!(reopened.list("orders").await.unwrap(), vec!["1", "2"]);
		assert_eq!(reopened.list("listener").await.unwrap(), vec!["last_block"]);
		assert!(reopened.list("missing").await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_overwrite_and_delete() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage.set_bytes("orders:7", b"a".to_vec()).await.unwrap();
		storage.set_bytes("orders:7", b"b".to_vec()).await.unwrap();
		assert_eq!(storage.get_bytes("orders:7").await.unwrap(), b"b");

		storage.delete("orders:7").await.unwrap();
		assert!(!storage.exists("orders:7").await.unwrap());
		assert!(matches!(
			storage.get_bytes("orders:7").await,
			Err(StorageError::NotFound)
		));
		// deleting twice is fine
		storage.delete("orders:7").await.unwrap();
	}

	#[tokio::test]
	async fn test_keys_cannot_escape_base_dir() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().join("store"));

		storage.set_bytes("orders:../../evil", b"x".to_vec()).await.unwrap();
		assert!(!dir.path().join("evil.json").exists());
		assert_eq!(storage.list("orders").await.unwrap().len(), 1);
	}
}
