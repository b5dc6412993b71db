// relayer-config/src/lib.rs

//! Configuration for the relayer service.
//!
//! Settings come from an optional TOML file (with `${VAR}` substitution) and
//! are then overridden by `RELAYER_`-prefixed environment variables. Missing
//! chain settings are fatal; a missing evaluator only produces a warning.

use thiserror::Error;

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Missing required setting: {0}")]
	MissingSetting(&'static str),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}
