//! Command registry
//!
//! Maps `(service, mode, command)` to a handler. The registry is assembled
//! through a [`CommandRegistryBuilder`] at startup and sealed before any
//! dispatcher sees it; the sealed [`CommandRegistry`] has no mutating methods
//! and is shared read-only across workers.

use mqrpc_core::{CallMode, ParamType, RawArgs, Result, RpcError};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::handler::{invoke_contained, CommandHandler, HandlerError, Operation};

type CommandTable = HashMap<String, HandlerDescriptor>;

/// A registered command
#[derive(Clone)]
pub struct HandlerDescriptor {
    command: String,
    params: Vec<ParamType>,
    handler: Arc<dyn CommandHandler>,
}

impl HandlerDescriptor {
    /// Exposed command name
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Declared parameter types, in positional order
    pub fn params(&self) -> &[ParamType] {
        &self.params
    }

    /// Invoke the handler; a panic is reported as a handler error
    pub async fn invoke(&self, args: &RawArgs) -> std::result::Result<Option<Value>, HandlerError> {
        invoke_contained(self.handler.as_ref(), args).await
    }
}

impl fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("command", &self.command)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Mutable registry used during startup
#[derive(Debug, Default)]
pub struct CommandRegistryBuilder {
    services: HashMap<String, HashMap<CallMode, CommandTable>>,
}

impl CommandRegistryBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `(service, mode, command)`.
    ///
    /// Fails with [`RpcError::DuplicateCommand`] if the key is taken and with
    /// [`RpcError::InvalidSignature`] if the command name is empty.
    pub fn register(
        &mut self,
        service: &str,
        mode: CallMode,
        command: &str,
        handler: Arc<dyn CommandHandler>,
        params: Vec<ParamType>,
    ) -> Result<()> {
        if command.is_empty() {
            return Err(RpcError::InvalidSignature {
                service: service.to_string(),
                command: command.to_string(),
                reason: "exposed name must not be empty".to_string(),
            });
        }

        let table = self
            .services
            .entry(service.to_string())
            .or_default()
            .entry(mode)
            .or_default();
        if table.contains_key(command) {
            return Err(RpcError::DuplicateCommand {
                service: service.to_string(),
                mode,
                command: command.to_string(),
            });
        }

        table.insert(
            command.to_string(),
            HandlerDescriptor {
                command: command.to_string(),
                params,
                handler,
            },
        );
        Ok(())
    }

    /// Register an exposed operation
    pub fn register_operation(
        &mut self,
        service: &str,
        mode: CallMode,
        operation: &Operation,
    ) -> Result<()> {
        self.register(
            service,
            mode,
            operation.name(),
            operation.handler().clone(),
            operation.params().to_vec(),
        )
    }

    /// Freeze the registry
    pub fn seal(self) -> CommandRegistry {
        CommandRegistry {
            services: self.services,
        }
    }
}

/// Sealed, read-only registry
#[derive(Debug, Default)]
pub struct CommandRegistry {
    services: HashMap<String, HashMap<CallMode, CommandTable>>,
}

impl CommandRegistry {
    /// Find the handler for `(service, mode, command)`
    pub fn lookup(&self, service: &str, mode: CallMode, command: &str) -> Result<&HandlerDescriptor> {
        self.services
            .get(service)
            .and_then(|modes| modes.get(&mode))
            .and_then(|table| table.get(command))
            .ok_or_else(|| RpcError::not_found(service, mode, command))
    }

    /// Registered command names for a service and mode, sorted
    pub fn commands(&self, service: &str, mode: CallMode) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .services
            .get(service)
            .and_then(|modes| modes.get(&mode))
            .map(|table| table.keys().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Total number of registered commands
    pub fn len(&self) -> usize {
        self.services
            .values()
            .flat_map(HashMap::values)
            .map(HashMap::len)
            .sum()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
