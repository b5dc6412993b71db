//! Types exchanged with the homomorphic evaluation service.

use alloy::primitives::{Address, Bytes, U256};
use serde::Serialize;
use std::fmt;

use crate::Order;

/// Body of an evaluation request.
///
/// Only public order metadata is sent. Ciphertext is forwarded as an opaque
/// hex blob when the order carries it and is omitted otherwise.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationRequest {
	/// Decimal order id.
	pub order_id: String,
	pub submitter: Address,
	pub token_in: Address,
	pub token_out: Address,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub ciphertext: Option<Bytes>,
}

impl From<&Order> for EvaluationRequest {
	fn from(order: &Order) -> Self {
		Self {
			order_id: order.id.to_string(),
			submitter: order.submitter,
			token_in: order.token_in,
			token_out: order.token_out,
			ciphertext: order.ciphertext.as_ref().map(|c| c.as_bytes().clone()),
		}
	}
}

impl fmt::Debug for EvaluationRequest {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EvaluationRequest")
			.field("order_id", &self.order_id)
			.field("submitter", &self.submitter)
			.field("token_in", &self.token_in)
			.field("token_out", &self.token_out)
			.field("ciphertext", &self.ciphertext.as_ref().map(|c| c.len()))
			.finish()
	}
}

/// Validated public settlement values produced by the evaluator.
#[derive(Clone, PartialEq, Eq)]
pub struct EvaluationResult {
	pub amount_in: U256,
	pub min_out: U256,
	pub public_amount_out: U256,
	pub public_price: U256,
	/// Opaque evaluator output handed to the contract unexamined.
	pub result_blob: Bytes,
}

impl fmt::Debug for EvaluationResult {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EvaluationResult")
			.field("amount_in", &self.amount_in)
			.field("min_out", &self.min_out)
			.field("public_amount_out", &self.public_amount_out)
			.field("public_price", &self.public_price)
			.field("result_blob_len", &self.result_blob.len())
			.finish()
	}
}
