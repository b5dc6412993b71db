//! Connection state of the chain event listener.

use serde::{Deserialize, Serialize};
use std::fmt;

/// States of the listener's connection state machine.
///
/// `Disconnected → Subscribed → Receiving`, with `Reconnecting` entered on
/// any provider error and left once the node answers again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerState {
	/// Not started, or stopped.
	Disconnected,
	/// Connected to the node, catching up to the chain head.
	Subscribed,
	/// Caught up and polling for new events.
	Receiving,
	/// Backing off after a provider error.
	Reconnecting,
}

impl fmt::Display for ListenerState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ListenerState::Disconnected => "disconnected",
			ListenerState::Subscribed => "subscribed",
			ListenerState::Receiving => "receiving",
			ListenerState::Reconnecting => "reconnecting",
		};
		f.write_str(name)
	}
}
