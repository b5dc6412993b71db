//! HTTP evaluator client.

use crate::response::validate_response;
use crate::{EvaluationError, EvaluationInterface};
use async_trait::async_trait;
use relayer_config::SecretString;
use relayer_types::{EvaluationRequest, EvaluationResult, Order};
use std::time::Duration;
use tracing::debug;

/// Calls `POST {base_url}/evaluate` with bearer authentication.
pub struct HttpEvaluator {
	client: reqwest::Client,
	base_url: Option<String>,
	api_key: Option<SecretString>,
}

impl HttpEvaluator {
	pub fn new(
		base_url: Option<String>,
		api_key: Option<SecretString>,
		timeout: Duration,
	) -> Result<Self, EvaluationError> {
		let client = reqwest::Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| EvaluationError::Transport(format!("Failed to create HTTP client: {}", e)))?;

		Ok(Self {
			client,
			base_url: base_url.filter(|url| !url.is_empty()),
			api_key: api_key.filter(|key| !key.is_empty()),
		})
	}
}

fn transport_error(e: reqwest::Error) -> EvaluationError {
	if e.is_timeout() {
		EvaluationError::Timeout
	} else {
		EvaluationError::Transport(e.without_url().to_string())
	}
}

#[async_trait]
impl EvaluationInterface for HttpEvaluator {
	async fn evaluate(&self, order: &Order) -> Result<EvaluationResult, EvaluationError> {
		let (Some(base_url), Some(api_key)) = (&self.base_url, &self.api_key) else {
			return Err(EvaluationError::NotConfigured);
		};

		let url = format!("{}/evaluate", base_url.trim_end_matches('/'));
		debug!(order_id = %order.id, "Requesting evaluation");

		let response = self
			.client
			.post(url)
			.bearer_auth(api_key.expose())
			.json(&EvaluationRequest::from(order))
			.send()
			.await
			.map_err(transport_error)?;

		let status = response.status();
		if !status.is_success() {
			return Err(EvaluationError::Status(status.as_u16()));
		}

		let body: serde_json::Value = response.json().await.map_err(|e| {
			if e.is_timeout() {
				EvaluationError::Timeout
			} else {
				EvaluationError::malformed("body", "not valid JSON")
			}
		})?;

		validate_response(&body)
	}
}
