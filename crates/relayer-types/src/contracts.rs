//! ABI of the encrypted swap router the relayer settles against.

alloy::sol! {
	#[derive(Debug, PartialEq, Eq)]
	interface IEncryptedSwapRouter {
		/// Emitted when a user submits an encrypted order.
		event EncryptedOrderSubmitted(
			uint256 indexed orderId,
			address indexed submitter,
			address tokenIn,
			address tokenOut
		);

		/// Settles an order with evaluator-provided public values.
		///
		/// Restricted to accounts holding the relayer role.
		function executeEncryptedSwap(
			uint256 orderId,
			bytes fheResultBlob,
			uint256 amountIn,
			uint256 minOut,
			uint256 publicAmountOut,
			uint256 publicPrice
		) external;
	}
}

pub use IEncryptedSwapRouter::{executeEncryptedSwapCall, EncryptedOrderSubmitted};
