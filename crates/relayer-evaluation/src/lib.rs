//! Evaluation client for the relayer.
//!
//! Sends public order metadata to the external homomorphic evaluator and
//! turns its untrusted reply into validated settlement values. The
//! evaluator is treated as unreliable: every non-success reply, timeout or
//! malformed field fails the attempt, and nothing is ever inferred.

use async_trait::async_trait;
use relayer_config::EvaluatorConfig;
use relayer_types::{EvaluationResult, Order};
use thiserror::Error;

pub mod response;

/// Re-export implementations
pub mod implementations {
	pub mod http;
}

pub use implementations::http::HttpEvaluator;

#[derive(Debug, Error)]
pub enum EvaluationError {
	/// Base URL or credential missing; no request was made.
	#[error("Evaluator not configured")]
	NotConfigured,
	#[error("Evaluation timed out")]
	Timeout,
	#[error("Evaluator returned status {0}")]
	Status(u16),
	#[error("Transport error: {0}")]
	Transport(String),
	/// The evaluator answered `ok: false`.
	#[error("Evaluator rejected the order")]
	Rejected,
	#[error("Malformed response field '{field}': {reason}")]
	Malformed { field: &'static str, reason: String },
}

impl EvaluationError {
	pub(crate) fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
		Self::Malformed {
			field,
			reason: reason.into(),
		}
	}
}

#[async_trait]
pub trait EvaluationInterface: Send + Sync {
	/// Evaluates one order. Exactly one request is made per call.
	async fn evaluate(&self, order: &Order) -> Result<EvaluationResult, EvaluationError>;
}

pub struct EvaluationService {
	implementation: Box<dyn EvaluationInterface>,
}

impl EvaluationService {
	pub fn new(implementation: Box<dyn EvaluationInterface>) -> Self {
		Self { implementation }
	}

	pub async fn evaluate(&self, order: &Order) -> Result<EvaluationResult, EvaluationError> {
		self.implementation.evaluate(order).await
	}
}

/// Creates the HTTP evaluator from configuration.
///
/// An unconfigured evaluator is still returned; it fails every call with
/// [`EvaluationError::NotConfigured`].
pub fn create_evaluator(
	config: &EvaluatorConfig,
) -> Result<Box<dyn EvaluationInterface>, EvaluationError> {
	Ok(Box::new(HttpEvaluator::new(
		config.base_url.clone(),
		config.api_key.clone(),
		config.timeout(),
	)?))
}
