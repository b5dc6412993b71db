//! Configuration loading with environment variable substitution and overrides.

use alloy::primitives::Address;
use regex::Regex;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::{Config, ConfigError, SecretString};

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	file_path: Option<PathBuf>,
	env_prefix: String,
	/// Replaces the process environment when set.
	env_override: Option<HashMap<String, String>>,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "RELAYER_".to_string(),
			env_override: None,
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_path_buf());
		self
	}

	pub fn with_optional_file<P: AsRef<Path>>(self, path: Option<P>) -> Self {
		match path {
			Some(path) => self.with_file(path),
			None => self,
		}
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	/// Reads variables from `vars` instead of the process environment.
	pub fn with_env_vars(mut self, vars: HashMap<String, String>) -> Self {
		self.env_override = Some(vars);
		self
	}

	pub async fn load(&self) -> Result<Config, ConfigError> {
		let mut config = match &self.file_path {
			Some(path) => self.load_from_file(path).await?,
			None => Config::default(),
		};

		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;

		Ok(config)
	}

	async fn load_from_file(&self, path: &Path) -> Result<Config, ConfigError> {
		let content = match tokio::fs::read_to_string(path).await {
			Ok(content) => content,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(ConfigError::FileNotFound(path.display().to_string()))
			}
			Err(e) => return Err(e.into()),
		};

		let substituted = self.substitute_env_vars(&content)?;
		self.parse(&substituted)
	}

	fn parse(&self, content: &str) -> Result<Config, ConfigError> {
		toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
	}

	fn var(&self, name: &str) -> Option<String> {
		match &self.env_override {
			Some(vars) => vars.get(name).cloned(),
			None => env::var(name).ok(),
		}
	}

	fn prefixed(&self, name: &str) -> Option<String> {
		self.var(&format!("{}{}", self.env_prefix, name))
			.filter(|value| !value.is_empty())
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::ParseError(e.to_string()))?;
		let mut result = content.to_string();

		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let value = self
				.var(var_name)
				.ok_or_else(|| ConfigError::EnvVarNotFound(var_name.to_string()))?;

			result = result.replace(full_match, &value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut Config) -> Result<(), ConfigError> {
		if let Some(rpc_url) = self.prefixed("RPC_URL") {
			config.chain.rpc_url = Some(rpc_url);
		}

		if let Some(private_key) = self.prefixed("PRIVATE_KEY") {
			config.account.private_key = Some(SecretString::new(private_key));
		}

		if let Some(address) = self.prefixed("CONTRACT_ADDRESS") {
			let address = address.parse::<Address>().map_err(|e| {
				ConfigError::ValidationError(format!("Invalid contract address: {}", e))
			})?;
			config.chain.contract_address = Some(address);
		}

		if let Some(port) = self.prefixed("HEALTH_PORT") {
			config.health.port = port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid health port: {}", e)))?;
		}

		if let Some(url) = self.prefixed("EVALUATOR_URL") {
			config.evaluator.base_url = Some(url);
		}

		if let Some(api_key) = self.prefixed("EVALUATOR_API_KEY") {
			config.evaluator.api_key = Some(SecretString::new(api_key));
		}

		Ok(())
	}
}

/// Checks mandatory settings and value ranges.
///
/// Chain settings are required before anything attaches to the chain. The
/// evaluator is optional at startup: orders fail at evaluation time instead.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
	match config.chain.rpc_url.as_deref() {
		None | Some("") => return Err(ConfigError::MissingSetting("chain.rpc_url")),
		Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
			return Err(ConfigError::ValidationError(
				"RPC URL must start with http:// or https://".to_string(),
			));
		}
		Some(_) => {}
	}

	if config
		.account
		.private_key
		.as_ref()
		.map_or(true, |key| key.is_empty())
	{
		return Err(ConfigError::MissingSetting("account.private_key"));
	}

	if config.chain.contract_address.is_none() {
		return Err(ConfigError::MissingSetting("chain.contract_address"));
	}

	if config.worker.batch_size == 0 {
		return Err(ConfigError::ValidationError(
			"worker.batch_size must be at least 1".to_string(),
		));
	}

	if config.worker.max_attempts == 0 {
		return Err(ConfigError::ValidationError(
			"worker.max_attempts must be at least 1".to_string(),
		));
	}

	if config.worker.tick_interval_ms == 0 {
		return Err(ConfigError::ValidationError(
			"worker.tick_interval_ms must be positive".to_string(),
		));
	}

	if config.listener.max_blocks_per_poll == 0 {
		return Err(ConfigError::ValidationError(
			"listener.max_blocks_per_poll must be at least 1".to_string(),
		));
	}

	if config.health.requests_per_second == 0 {
		return Err(ConfigError::ValidationError(
			"health.requests_per_second must be at least 1".to_string(),
		));
	}

	if let Some(url) = config.evaluator.base_url.as_deref() {
		if !url.is_empty() && !url.starts_with("http://") && !url.starts_with("https://") {
			return Err(ConfigError::ValidationError(
				"Evaluator URL must start with http:// or https://".to_string(),
			));
		}
	}

	if !config.evaluator.is_configured() {
		warn!("Evaluator not configured; order evaluation will fail until it is");
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::StorageBackend;
	use std::io::Write;

	const CONTRACT: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";
	const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

	fn required_env() -> HashMap<String, String> {
		HashMap::from([
			("RELAYER_RPC_URL".to_string(), "http://127.0.0.1:8545".to_string()),
			("RELAYER_PRIVATE_KEY".to_string(), KEY.to_string()),
			("RELAYER_CONTRACT_ADDRESS".to_string(), CONTRACT.to_string()),
		])
	}

	#[tokio::test]
	async fn test_env_only_config() {
		let mut vars = required_env();
		vars.insert("RELAYER_HEALTH_PORT".to_string(), "9091".to_string());
		vars.insert("RELAYER_EVALUATOR_URL".to_string(), "http://eval:9000".to_string());
		vars.insert("RELAYER_EVALUATOR_API_KEY".to_string(), "secret".to_string());

		let config = ConfigLoader::new().with_env_vars(vars).load().await.unwrap();

		assert_eq!(config.chain.rpc_url.as_deref(), Some("http://127.0.0.1:8545"));
		assert_eq!(config.chain.contract_address, Some(CONTRACT.parse().unwrap()));
		assert_eq!(config.account.private_key.as_ref().map(|k| k.expose()), Some(KEY));
		assert_eq!(config.health.port, 9091);
		assert!(config.evaluator.is_configured());
		assert_eq!(config.worker.batch_size, 5);
		assert_eq!(config.worker.tick_interval_ms, 1_000);
		assert_eq!(config.health.requests_per_second, 10);
	}

	#[tokio::test]
	async fn test_missing_mandatory_settings_are_fatal() {
		for missing in ["RELAYER_RPC_URL", "RELAYER_PRIVATE_KEY", "RELAYER_CONTRACT_ADDRESS"] {
			let mut vars = required_env();
			vars.remove(missing);

			let result = ConfigLoader::new().with_env_vars(vars).load().await;
			assert!(
				matches!(result, Err(ConfigError::MissingSetting(_))),
				"expected {} to be mandatory",
				missing
			);
		}
	}

	#[tokio::test]
	async fn test_missing_evaluator_is_not_fatal() {
		let config = ConfigLoader::new()
			.with_env_vars(required_env())
			.load()
			.await
			.unwrap();

		assert!(!config.evaluator.is_configured());
	}

	#[tokio::test]
	async fn test_invalid_contract_address() {
		let mut vars = required_env();
		vars.insert("RELAYER_CONTRACT_ADDRESS".to_string(), "0x1234".to_string());

		let result = ConfigLoader::new().with_env_vars(vars).load().await;
		assert!(matches!(result, Err(ConfigError::ValidationError(_))));
	}

	#[tokio::test]
	async fn test_toml_file_with_substitution() {
		let toml = format!(
			r#"
[relayer]
name = "test-relayer"

[chain]
rpc_url = "${{NODE_URL}}"
contract_address = "{}"
confirmations = 2

[account]
private_key = "{}"

[worker]
batch_size = 3
max_attempts = 5

[storage]
backend = "memory"
"#,
			CONTRACT, KEY
		);

		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(toml.as_bytes()).unwrap();

		let vars = HashMap::from([("NODE_URL".to_string(), "https://node.example".to_string())]);
		let config = ConfigLoader::new()
			.with_file(file.path())
			.with_env_vars(vars)
			.load()
			.await
			.unwrap();

		assert_eq!(config.relayer.name, "test-relayer");
		assert_eq!(config.chain.rpc_url.as_deref(), Some("https://node.example"));
		assert_eq!(config.chain.confirmations, 2);
		assert_eq!(config.worker.batch_size, 3);
		assert_eq!(config.worker.max_attempts, 5);
		assert_eq!(config.storage.backend, StorageBackend::Memory);
		// untouched sections keep their defaults
		assert_eq!(config.listener.max_blocks_per_poll, 500);
	}

	#[tokio::test]
	async fn test_unresolved_substitution() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(b"[chain]\nrpc_url = \"${MISSING_NODE_URL}\"\n").unwrap();

		let result = ConfigLoader::new()
			.with_file(file.path())
			.with_env_vars(HashMap::new())
			.load()
			.await;
		assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "MISSING_NODE_URL"));
	}

	#[tokio::test]
	async fn test_zero_batch_size_rejected() {
		let loader = ConfigLoader::new().with_env_vars(required_env());
		let mut config = loader.parse("[worker]\nbatch_size = 0\n").unwrap();
		loader.apply_env_overrides(&mut config).unwrap();

		assert!(matches!(
			validate_config(&config),
			Err(ConfigError::ValidationError(_))
		));
	}

	#[tokio::test]
	async fn test_missing_file() {
		let result = ConfigLoader::new()
			.with_file("/definitely/not/here.toml")
			.with_env_vars(required_env())
			.load()
			.await;
		assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
	}
}
