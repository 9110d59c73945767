//! Named transport destinations

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Name of a queue a message is published to or consumed from.
///
/// For a service `orders` the conventional names are `orders` for
/// synchronous requests, `orders.async` for asynchronous requests and
/// `orders.reply.<client-id>` for one client's replies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Destination(String);

impl Destination {
    /// Create a destination from a raw name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Destination consumed by a service's synchronous dispatcher
    pub fn sync_requests(service: &str) -> Self {
        Self(service.to_string())
    }

    /// Destination consumed by a service's asynchronous dispatcher
    pub fn async_requests(service: &str) -> Self {
        Self(format!("{service}.async"))
    }

    /// Reply destination private to one client instance
    pub fn replies(service: &str, client_id: Uuid) -> Self {
        Self(format!("{service}.reply.{client_id}"))
    }

    /// Get the destination name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Destination {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for Destination {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventional_names() {
        assert_eq!(Destination::sync_requests("orders").as_str(), "orders");
        assert_eq!(Destination::async_requests("orders").as_str(), "orders.async");
        let client = Uuid::nil();
        assert_eq!(
            Destination::replies("orders", client).to_string(),
            "orders.reply.00000000-0000-0000-0000-000000000000"
        );
    }
}
