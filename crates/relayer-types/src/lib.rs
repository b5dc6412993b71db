//! Shared types for the encrypted-order relayer.
//!
//! Every other crate in the workspace speaks in terms of these types: orders
//! observed on-chain, the public settlement values returned by the evaluator,
//! transactions sent back to the chain and the lifecycle events emitted while
//! an order moves through the pipeline.

pub mod contracts;
pub mod delivery;
pub mod evaluation;
pub mod events;
pub mod listener;
pub mod order;

pub use delivery::*;
pub use evaluation::*;
pub use events::*;
pub use listener::*;
pub use order::*;
