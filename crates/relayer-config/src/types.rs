//! Configuration types for the relayer.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Complete relayer configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
	/// Relayer identity
	pub relayer: RelayerSettings,
	/// Chain connection and settlement contract
	pub chain: ChainConfig,
	/// Signing credential
	pub account: AccountConfig,
	/// Event listener settings
	pub listener: ListenerConfig,
	/// Batch worker settings
	pub worker: WorkerConfig,
	/// Evaluation service settings
	pub evaluator: EvaluatorConfig,
	/// Health endpoint settings
	pub health: HealthConfig,
	/// Persistence settings
	pub storage: StorageConfig,
}

/// Value that must never show up in logs.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RelayerSettings {
	/// Relayer name used in logs
	pub name: String,
}

impl Default for RelayerSettings {
	fn default() -> Self {
		Self {
			name: "encrypted-order-relayer".to_string(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChainConfig {
	/// HTTP JSON-RPC endpoint
	pub rpc_url: Option<String>,
	/// Settlement router emitting orders and accepting settlements
	pub contract_address: Option<Address>,
	/// Confirmations required before a settlement counts as mined
	pub confirmations: u64,
	/// Upper bound on waiting for a settlement receipt
	pub confirmation_timeout_secs: u64,
	/// Receipt polling interval
	pub receipt_poll_interval_ms: u64,
}

impl Default for ChainConfig {
	fn default() -> Self {
		Self {
			rpc_url: None,
			contract_address: None,
			confirmations: 1,
			confirmation_timeout_secs: 120,
			receipt_poll_interval_ms: 1_000,
		}
	}
}

impl ChainConfig {
	pub fn confirmation_timeout(&self) -> Duration {
		Duration::from_secs(self.confirmation_timeout_secs)
	}

	pub fn receipt_poll_interval(&self) -> Duration {
		Duration::from_millis(self.receipt_poll_interval_ms)
	}
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AccountConfig {
	/// Hex-encoded private key of the relayer account
	pub private_key: Option<SecretString>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
	/// Delay between polls once caught up with the chain head
	pub poll_interval_ms: u64,
	/// Largest block range requested in one log query
	pub max_blocks_per_poll: u64,
	/// First block to scan when no checkpoint exists (chain head otherwise)
	pub start_block: Option<u64>,
	/// First reconnect delay after a provider error
	pub reconnect_base_delay_ms: u64,
	/// Cap on the reconnect backoff delay
	pub reconnect_max_delay_secs: u64,
}

impl Default for ListenerConfig {
	fn default() -> Self {
		Self {
			poll_interval_ms: 2_000,
			max_blocks_per_poll: 500,
			start_block: None,
			reconnect_base_delay_ms: 1_000,
			reconnect_max_delay_secs: 60,
		}
	}
}

impl ListenerConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn reconnect_base_delay(&self) -> Duration {
		Duration::from_millis(self.reconnect_base_delay_ms)
	}

	pub fn reconnect_max_delay(&self) -> Duration {
		Duration::from_secs(self.reconnect_max_delay_secs)
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
	/// Scheduler tick interval
	pub tick_interval_ms: u64,
	/// Maximum orders pulled per tick
	pub batch_size: usize,
	/// Processing attempts before an order is dropped
	pub max_attempts: u32,
	/// First retry delay, doubled on every further attempt
	pub retry_base_delay_ms: u64,
	/// Cap on the retry delay
	pub retry_max_delay_ms: u64,
	/// Maximum number of queued orders
	pub max_queue_size: usize,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			tick_interval_ms: 1_000,
			batch_size: 5,
			max_attempts: 3,
			retry_base_delay_ms: 2_000,
			retry_max_delay_ms: 60_000,
			max_queue_size: 10_000,
		}
	}
}

impl WorkerConfig {
	pub fn tick_interval(&self) -> Duration {
		Duration::from_millis(self.tick_interval_ms)
	}

	/// Delay before the next attempt after `attempts` failed ones.
	pub fn retry_delay(&self, attempts: u32) -> Duration {
		let exponent = attempts.saturating_sub(1).min(16);
		let delay = self
			.retry_base_delay_ms
			.saturating_mul(1u64 << exponent)
			.min(self.retry_max_delay_ms);
		Duration::from_millis(delay)
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EvaluatorConfig {
	/// Base URL of the evaluation service
	pub base_url: Option<String>,
	/// Bearer credential for the evaluation service
	pub api_key: Option<SecretString>,
	/// Per-request timeout
	pub timeout_secs: u64,
}

impl Default for EvaluatorConfig {
	fn default() -> Self {
		Self {
			base_url: None,
			api_key: None,
			timeout_secs: 10,
		}
	}
}

impl EvaluatorConfig {
	pub fn timeout(&self) -> Duration {
		Duration::from_secs(self.timeout_secs)
	}

	pub fn is_configured(&self) -> bool {
		let has_url = self.base_url.as_deref().is_some_and(|u| !u.is_empty());
		let has_key = self.api_key.as_ref().is_some_and(|k| !k.is_empty());
		has_url && has_key
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
	/// Bind address of the health server
	pub host: String,
	/// Port of the health server
	pub port: u16,
	/// Request budget per client per second
	pub requests_per_second: u32,
}

impl Default for HealthConfig {
	fn default() -> Self {
		Self {
			host: "0.0.0.0".to_string(),
			port: 8080,
			requests_per_second: 10,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
	File,
	Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
	/// Storage backend: "file" or "memory"
	pub backend: StorageBackend,
	/// Base directory for the file backend
	pub path: PathBuf,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: StorageBackend::File,
			path: PathBuf::from("./data/relayer"),
		}
	}
}
