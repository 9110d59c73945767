//! Call modes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::RpcError;

/// How a remote operation is invoked.
///
/// Each mode travels on its own destination and is registered separately
/// in the command registry, so the same command name can be exposed for
/// both modes with independent handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallMode {
    /// Request/response: the caller waits for a correlated reply
    Sync,
    /// Fire-and-forget: no reply is produced or awaited
    Async,
}

impl CallMode {
    /// Both modes, in registration order
    pub const ALL: [CallMode; 2] = [CallMode::Sync, CallMode::Async];

    /// Wire/log name of this mode
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMode::Sync => "SYNC",
            CallMode::Async => "ASYNC",
        }
    }

    /// Whether the caller expects a response
    pub fn expects_reply(&self) -> bool {
        matches!(self, CallMode::Sync)
    }
}

impl fmt::Display for CallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallMode {
    type Err = RpcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SYNC" => Ok(CallMode::Sync),
            "ASYNC" => Ok(CallMode::Async),
            other => Err(RpcError::config(format!("unknown call mode '{other}'"))),
        }
    }
}
