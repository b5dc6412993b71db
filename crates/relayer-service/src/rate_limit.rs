//! Per-client request budget for the health surface.

use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

struct Window {
	started: Instant,
	count: u32,
}

/// Fixed-window limiter keyed by client IP.
pub struct RateLimiter {
	limit: u32,
	window: Duration,
	clients: DashMap<IpAddr, Window>,
}

impl RateLimiter {
	pub fn new(limit: u32, window: Duration) -> Self {
		Self {
			limit,
			window,
			clients: DashMap::new(),
		}
	}

	pub fn per_second(limit: u32) -> Self {
		Self::new(limit, Duration::from_secs(1))
	}

	/// Counts one request from `client`. Returns false once its budget for
	/// the current window is spent.
	pub fn check(&self, client: IpAddr) -> bool {
		let now = Instant::now();
		let mut entry = self.clients.entry(client).or_insert(Window {
			started: now,
			count: 0,
		});

		if now.duration_since(entry.started) >= self.window {
			entry.started = now;
			entry.count = 0;
		}

		if entry.count >= self.limit {
			return false;
		}
		entry.count += 1;
		true
	}

	/// Forgets clients whose window has expired.
	pub fn prune(&self) {
		let now = Instant::now();
		self.clients
			.retain(|_, window| now.duration_since(window.started) < self.window);
	}
}
