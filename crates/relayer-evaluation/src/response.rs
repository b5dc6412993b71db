//! Validation of evaluator replies.
//!
//! Numeric fields accept decimal strings, `0x` hex strings and non-negative
//! JSON integers, and must fit in a uint256. The result blob must be `0x`
//! hex and is otherwise passed through as is, empty included.

use crate::EvaluationError;
use alloy::primitives::{Bytes, U256};
use relayer_types::EvaluationResult;
use serde_json::Value;

/// Converts a raw evaluator reply into an [`EvaluationResult`].
pub fn validate_response(body: &Value) -> Result<EvaluationResult, EvaluationError> {
	let body = body
		.as_object()
		.ok_or_else(|| EvaluationError::malformed("body", "expected a JSON object"))?;

	match body.get("ok") {
		Some(Value::Bool(true)) => {}
		Some(Value::Bool(false)) => return Err(EvaluationError::Rejected),
		Some(_) => return Err(EvaluationError::malformed("ok", "expected a boolean")),
		None => return Err(EvaluationError::malformed("ok", "missing")),
	}

	Ok(EvaluationResult {
		amount_in: parse_uint(body.get("amountIn"), "amountIn")?,
		min_out: parse_uint(body.get("minOut"), "minOut")?,
		public_amount_out: parse_uint(body.get("publicAmountOut"), "publicAmountOut")?,
		public_price: parse_uint(body.get("publicPrice"), "publicPrice")?,
		result_blob: parse_blob(body.get("fheResultBlob"), "fheResultBlob")?,
	})
}

fn parse_uint(value: Option<&Value>, field: &'static str) -> Result<U256, EvaluationError> {
	match value {
		None | Some(Value::Null) => Err(EvaluationError::malformed(field, "missing")),
		Some(Value::Number(n)) => n
			.as_u64()
			.map(U256::from)
			.ok_or_else(|| EvaluationError::malformed(field, "not a non-negative integer")),
		Some(Value::String(s)) => parse_uint_str(s.trim())
			.ok_or_else(|| EvaluationError::malformed(field, "not a uint256")),
		Some(_) => Err(EvaluationError::malformed(field, "expected a number or string")),
	}
}

fn parse_uint_str(s: &str) -> Option<U256> {
	let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
		Some(hex) => (hex, 16),
		None => (s, 10),
	};

	if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
		return None;
	}
	// overflow beyond 256 bits is an error, not a wrap
	U256::from_str_radix(digits, radix as u64).ok()
}

fn parse_blob(value: Option<&Value>, field: &'static str) -> Result<Bytes, EvaluationError> {
	let s = match value {
		Some(Value::String(s)) => s,
		None | Some(Value::Null) => return Err(EvaluationError::malformed(field, "missing")),
		Some(_) => return Err(EvaluationError::malformed(field, "expected a hex string")),
	};

	let hex_digits = s
		.strip_prefix("0x")
		.ok_or_else(|| EvaluationError::malformed(field, "missing 0x prefix"))?;

	hex::decode(hex_digits)
		.map(Bytes::from)
		.map_err(|_| EvaluationError::malformed(field, "not valid hex"))
}
