//! Local private key wallet.

use crate::{AccountError, AccountInterface};
use alloy::network::EthereumWallet;
use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;

/// Local wallet implementation using Alloy's signer.
pub struct LocalWallet {
	signer: PrivateKeySigner,
}

impl LocalWallet {
	/// Creates a new LocalWallet from a hex-encoded private key.
	///
	/// The key must be 32 bytes of hex, with or without a `0x` prefix.
	pub fn new(private_key_hex: &str) -> Result<Self, AccountError> {
		let key = private_key_hex.trim();
		let key_without_prefix = key.strip_prefix("0x").unwrap_or(key);

		if key_without_prefix.len() != 64 {
			return Err(AccountError::InvalidKey(
				"Private key must be 64 hex characters (32 bytes)".to_string(),
			));
		}

		if hex::decode(key_without_prefix).is_err() {
			return Err(AccountError::InvalidKey(
				"Private key must be valid hexadecimal".to_string(),
			));
		}

		// The parse error is not forwarded; it can echo key material.
		let signer = key_without_prefix
			.parse::<PrivateKeySigner>()
			.map_err(|_| AccountError::InvalidKey("Private key is not a valid secp256k1 scalar".to_string()))?;

		Ok(Self { signer })
	}
}

#[async_trait]
impl AccountInterface for LocalWallet {
	async fn address(&self) -> Result<Address, AccountError> {
		Ok(self.signer.address())
	}

	fn wallet(&self) -> EthereumWallet {
		EthereumWallet::from(self.signer.clone())
	}
}
