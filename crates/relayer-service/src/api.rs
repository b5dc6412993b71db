//! HTTP health surface.
//!
//! `/health` answers `{"ok":true}` while the client stays within its request
//! budget and `429 {"ok":false}` once it is spent. `/status` shares the same
//! budget.

use crate::rate_limit::RateLimiter;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use relayer_core::{RelayerEngine, RelayerStatus};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Source of the `/status` payload.
pub trait StatusProvider: Send + Sync {
	fn status(&self) -> RelayerStatus;
}

impl StatusProvider for RelayerEngine {
	fn status(&self) -> RelayerStatus {
		RelayerEngine::status(self)
	}
}

#[derive(Clone)]
pub struct AppState {
	status: Arc<dyn StatusProvider>,
}

pub fn router(status: Arc<dyn StatusProvider>, limiter: Arc<RateLimiter>) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/status", get(status_handler))
		.route_layer(middleware::from_fn_with_state(limiter, rate_limit))
		.layer(TraceLayer::new_for_http())
		.with_state(AppState { status })
}

/// Serves the health surface until `shutdown` resolves.
pub async fn serve(
	addr: SocketAddr,
	status: Arc<dyn StatusProvider>,
	requests_per_second: u32,
	shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
	let limiter = Arc::new(RateLimiter::per_second(requests_per_second));

	let pruner = {
		let limiter = limiter.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(Duration::from_secs(60));
			loop {
				interval.tick().await;
				limiter.prune();
			}
		})
	};

	let app = router(status, limiter);
	let listener = tokio::net::TcpListener::bind(addr).await?;
	info!("Health server listening on {}", addr);

	axum::serve(
		listener,
		app.into_make_service_with_connect_info::<SocketAddr>(),
	)
	.with_graceful_shutdown(shutdown)
	.await?;

	pruner.abort();
	Ok(())
}

async fn rate_limit(
	State(limiter): State<Arc<RateLimiter>>,
	ConnectInfo(client): ConnectInfo<SocketAddr>,
	request: Request,
	next: Next,
) -> Response {
	if limiter.check(client.ip()) {
		return next.run(request).await;
	}

	debug!(client = %client.ip(), "Rate limit exceeded");
	(StatusCode::TOO_MANY_REQUESTS, Json(json!({ "ok": false }))).into_response()
}

async fn health() -> Json<Value> {
	Json(json!({ "ok": true }))
}

async fn status_handler(State(state): State<AppState>) -> Json<RelayerStatus> {
	Json(state.status.status())
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::body::{to_bytes, Body};
	use axum::extract::connect_info::MockConnectInfo;
	use axum::http::Request;
	use relayer_core::StatsSnapshot;
	use relayer_types::ListenerState;
	use tower::ServiceExt;

	struct FixedStatus;

	impl StatusProvider for FixedStatus {
		fn status(&self) -> RelayerStatus {
			RelayerStatus {
				queued: 2,
				in_flight: 1,
				listener: ListenerState::Receiving,
				processed: StatsSnapshot {
					confirmed: 5,
					failed: 1,
					dropped: 0,
					retried: 3,
				},
			}
		}
	}

	fn app(client: [u8; 4]) -> Router {
		router(Arc::new(FixedStatus), Arc::new(RateLimiter::per_second(10)))
			.layer(MockConnectInfo(SocketAddr::from((client, 40000))))
	}

	async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
		let response = app
			.clone()
			.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
			.await
			.unwrap();
		let status = response.status();
		let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
		(status, serde_json::from_slice(&body).unwrap())
	}

	#[tokio::test]
	async fn test_eleventh_request_is_limited() {
		let app = app([10, 0, 0, 1]);

		for _ in 0..10 {
			assert_eq!(get(&app, "/health").await, (StatusCode::OK, json!({ "ok": true })));
		}
		assert_eq!(
			get(&app, "/health").await,
			(StatusCode::TOO_MANY_REQUESTS, json!({ "ok": false }))
		);
	}

	#[tokio::test]
	async fn test_status_reports_pipeline() {
		let app = app([10, 0, 0, 2]);

		let (status, body) = get(&app, "/status").await;
		assert_eq!(status, StatusCode::OK);
		assert_eq!(body["queued"], 2);
		assert_eq!(body["in_flight"], 1);
		assert_eq!(body["listener"], "Receiving");
		assert_eq!(body["confirmed"], 5);
		assert_eq!(body["retried"], 3);
	}
}
