//! Error taxonomy shared by the client call engine and the server dispatcher
//!
//! Per-message failures (`Protocol`, `NotFound`, `Handler`) are contained by
//! the dispatcher and only ever logged. `Timeout` and `Unavailable` are the
//! typed failures a synchronous caller can observe. `DuplicateCommand` and
//! `InvalidSignature` are startup-time configuration errors.

use crate::mode::CallMode;

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, RpcError>;

/// RPC operation errors
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Malformed envelope (missing command or argument container)
    #[error("Protocol error: {reason}")]
    Protocol {
        /// What was wrong with the envelope
        reason: String,
    },

    /// Command not registered for the service and call mode
    #[error("{mode}-{service}: command '{command}' not found")]
    NotFound {
        /// Logical service name
        service: String,
        /// Call mode the lookup was made for
        mode: CallMode,
        /// Requested command
        command: String,
    },

    /// A user handler returned an error or panicked
    #[error("Handler for '{command}' failed: {message}")]
    Handler {
        /// Command whose handler failed
        command: String,
        /// Failure description
        message: String,
    },

    /// No correlated response arrived within the window after every attempt
    #[error("Call '{command}' on service '{service}' timed out after {attempts} attempt(s) of {timeout_ms}ms")]
    Timeout {
        /// Target service
        service: String,
        /// Command that was called
        command: String,
        /// Publish attempts made
        attempts: u32,
        /// Per-attempt reply window in milliseconds
        timeout_ms: u64,
    },

    /// The transport refused the request or the client endpoint is shut down
    #[error("Service '{service}' unavailable: {reason}")]
    Unavailable {
        /// Target service
        service: String,
        /// Why the call could not be carried
        reason: String,
    },

    /// The same (service, mode, command) key was registered twice
    #[error("{mode}-{service}: command '{command}' registered more than once")]
    DuplicateCommand {
        /// Logical service name
        service: String,
        /// Call mode of the clashing registration
        mode: CallMode,
        /// Clashing command name
        command: String,
    },

    /// A declared client operation cannot be called the way it was declared
    #[error("Invalid signature for '{command}' on service '{service}': {reason}")]
    InvalidSignature {
        /// Logical service name
        service: String,
        /// Offending operation
        command: String,
        /// What is wrong with the declaration
        reason: String,
    },

    /// JSON encoding or decoding failed
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The underlying transport failed
    #[error("Transport error: {reason}")]
    Transport {
        /// Transport failure description
        reason: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {reason}")]
    Config {
        /// What is wrong with the configuration
        reason: String,
    },
}

impl RpcError {
    /// Create a protocol error
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(service: impl Into<String>, mode: CallMode, command: impl Into<String>) -> Self {
        Self::NotFound {
            service: service.into(),
            mode,
            command: command.into(),
        }
    }

    /// Create a handler error
    pub fn handler(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Handler {
            command: command.into(),
            message: message.into(),
        }
    }

    /// Create an unavailable error
    pub fn unavailable(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            service: service.into(),
            reason: reason.into(),
        }
    }

    /// Create a transport error
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Whether this error is fatal at startup and must keep a service from
    /// accepting traffic
    pub fn is_startup_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateCommand { .. } | Self::InvalidSignature { .. } | Self::Config { .. }
        )
    }
}
