//! Client and server configuration
//!
//! Configuration is consumed, never produced, by the call engine and the
//! dispatcher. It can be built in code, loaded from TOML, and overridden
//! from `MQRPC_*` environment variables:
//!
//! ```toml
//! [client]
//! reply_timeout_ms = 2000
//! max_attempts = 3
//!
//! [server]
//! concurrency = 4
//! slow_call_threshold_ms = 1000
//! modes = ["SYNC", "ASYNC"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{CallMode, Result, RpcError};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "MQRPC_";

/// Synchronous call policy of a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long each attempt waits for a correlated reply
    pub reply_timeout_ms: u64,
    /// Total publish attempts per synchronous call (1 = no retry)
    pub max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reply_timeout_ms: 2000,
            max_attempts: 3,
        }
    }
}

impl ClientConfig {
    /// Per-attempt reply window
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    /// Call options derived from this configuration
    pub fn call_options(&self) -> CallOptions {
        CallOptions {
            timeout: self.reply_timeout(),
            max_attempts: self.max_attempts,
        }
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        self.call_options().validate()
    }
}

/// Dispatch policy of a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Concurrent consumer workers per attached call mode
    pub concurrency: usize,
    /// Completed dispatches slower than this are logged as warnings
    pub slow_call_threshold_ms: u64,
    /// Call modes the server consumes
    pub modes: Vec<CallMode>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            slow_call_threshold_ms: 1000,
            modes: CallMode::ALL.to_vec(),
        }
    }
}

impl ServerConfig {
    /// Slow-call threshold as a duration
    pub fn slow_call_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_call_threshold_ms)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(RpcError::config("server.concurrency must be greater than 0"));
        }
        if self.modes.is_empty() {
            return Err(RpcError::config("server.modes must name at least one call mode"));
        }
        let mut modes = self.modes.clone();
        modes.sort();
        modes.dedup();
        if modes.len() != self.modes.len() {
            return Err(RpcError::config("server.modes must not repeat a call mode"));
        }
        Ok(())
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Client-side settings
    pub client: ClientConfig,
    /// Server-side settings
    pub server: ServerConfig,
}

impl RpcConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RpcError::config(format!("invalid TOML: {e}")))
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RpcError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Apply overrides from `MQRPC_*` environment variables
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply overrides from `(name, value)` pairs; names without the
    /// `MQRPC_` prefix are ignored
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            if let Some(key) = name.as_ref().strip_prefix(ENV_PREFIX) {
                self.set_from_string(&key.to_ascii_lowercase(), value.as_ref())?;
            }
        }
        Ok(())
    }

    /// Set one value by its flattened key (e.g. `client_max_attempts`)
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "client_reply_timeout_ms" => self.client.reply_timeout_ms = parse(key, value)?,
            "client_max_attempts" => self.client.max_attempts = parse(key, value)?,
            "server_concurrency" => self.server.concurrency = parse(key, value)?,
            "server_slow_call_threshold_ms" => {
                self.server.slow_call_threshold_ms = parse(key, value)?;
            }
            "server_modes" => {
                self.server.modes = value
                    .split(',')
                    .filter(|mode| !mode.trim().is_empty())
                    .map(str::parse)
                    .collect::<Result<Vec<CallMode>>>()?;
            }
            other => return Err(RpcError::config(format!("unknown configuration key '{other}'"))),
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.server.validate()
    }
}

fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| RpcError::config(format!("invalid value '{value}' for {key}: {e}")))
}

/// Per-call overrides for a synchronous call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Reply window of each attempt
    pub timeout: Duration,
    /// Total publish attempts
    pub max_attempts: u32,
}

impl Default for CallOptions {
    fn default() -> Self {
        ClientConfig::default().call_options()
    }
}

impl CallOptions {
    /// Override the reply window
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the attempt count
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(RpcError::config("reply timeout must be greater than 0"));
        }
        if self.max_attempts == 0 {
            return Err(RpcError::config("max_attempts must be greater than 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_policy() {
        let config = RpcConfig::default();
        assert_eq!(config.client.reply_timeout(), Duration::from_secs(2));
        assert_eq!(config.client.max_attempts, 3);
        assert_eq!(config.server.concurrency, 1);
        assert_eq!(config.server.slow_call_threshold(), Duration::from_secs(1));
        assert_eq!(config.server.modes, vec![CallMode::Sync, CallMode::Async]);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RpcConfig::from_toml_str(
            r#"
            [server]
            concurrency = 4
            modes = ["SYNC"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.concurrency, 4);
        assert_eq!(config.server.modes, vec![CallMode::Sync]);
        assert_eq!(config.client, ClientConfig::default());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[client]\nreply_timeout_ms = 250\nmax_attempts = 1").unwrap();
        let config = RpcConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.client.call_options().timeout, Duration::from_millis(250));
        assert_eq!(config.client.max_attempts, 1);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = RpcConfig::load_from_file(Path::new("/nonexistent/mqrpc.toml")).unwrap_err();
        assert!(err.is_startup_error());
    }

    #[test]
    fn environment_overrides_apply() {
        let mut config = RpcConfig::default();
        config
            .merge_with_vars([
                ("MQRPC_CLIENT_MAX_ATTEMPTS", "5"),
                ("MQRPC_SERVER_MODES", "async"),
                ("HOME", "/root"),
            ])
            .unwrap();
        assert_eq!(config.client.max_attempts, 5);
        assert_eq!(config.server.modes, vec![CallMode::Async]);
    }

    #[test]
    fn bad_override_is_rejected() {
        let mut config = RpcConfig::default();
        assert!(config
            .merge_with_vars([("MQRPC_SERVER_CONCURRENCY", "many")])
            .is_err());
        assert!(config.merge_with_vars([("MQRPC_NOPE", "1")]).is_err());
    }

    #[test]
    fn validation_rejects_degenerate_settings() {
        let mut config = RpcConfig::default();
        config.client.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = RpcConfig::default();
        config.server.modes = vec![CallMode::Sync, CallMode::Sync];
        assert!(config.validate().is_err());

        let mut config = RpcConfig::default();
        config.server.concurrency = 0;
        assert!(config.validate().is_err());

        assert!(CallOptions::default()
            .with_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }
}
