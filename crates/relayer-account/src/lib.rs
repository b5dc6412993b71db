//! Account management for the relayer.
//!
//! The relayer signs every settlement with a single key. This crate turns
//! the configured key into a signer and exposes it through a small
//! interface so other crates never handle the raw key material.

use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use async_trait::async_trait;
use relayer_config::AccountConfig;
use thiserror::Error;

pub mod implementations {
	pub mod local;
}

use implementations::local::LocalWallet;

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Missing setting: {0}")]
	MissingKey(&'static str),
}

#[async_trait]
pub trait AccountInterface: Send + Sync {
	/// Address of the signing account.
	async fn address(&self) -> Result<Address, AccountError>;

	/// Wallet used by the delivery layer to sign transactions.
	fn wallet(&self) -> EthereumWallet;
}

pub struct AccountService {
	provider: Box<dyn AccountInterface>,
}

impl AccountService {
	pub fn new(provider: Box<dyn AccountInterface>) -> Self {
		Self { provider }
	}

	pub async fn get_address(&self) -> Result<Address, AccountError> {
		self.provider.address().await
	}

	pub fn wallet(&self) -> EthereumWallet {
		self.provider.wallet()
	}
}

/// Creates the account provider from configuration.
pub fn create_account(config: &AccountConfig) -> Result<Box<dyn AccountInterface>, AccountError> {
	let private_key = config
		.private_key
		.as_ref()
		.filter(|key| !key.is_empty())
		.ok_or(AccountError::MissingKey("account.private_key"))?;

	Ok(Box::new(LocalWallet::new(private_key.expose())?))
}
