//! Transport errors

use mqrpc_core::RpcError;

use crate::Destination;

/// Result alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport has been shut down
    #[error("Transport is closed")]
    Closed,

    /// A message could not be handed to the destination
    #[error("Failed to publish to {destination}: {reason}")]
    PublishFailed {
        /// Target destination
        destination: Destination,
        /// Reason for the failure
        reason: String,
    },

    /// Acknowledgment referenced a delivery that is not outstanding
    #[error("Unknown or already acknowledged delivery tag {tag}")]
    UnknownDeliveryTag {
        /// Offending delivery tag
        tag: u64,
    },
}

impl From<TransportError> for RpcError {
    fn from(error: TransportError) -> Self {
        RpcError::transport(error.to_string())
    }
}
