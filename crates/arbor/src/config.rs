//! # System Configuration
//!
//! Everything an [`ActorSystem`](crate::ActorSystem) needs to know at boot. The
//! struct deserializes with serde (missing fields take their defaults) and has
//! `with_*` builder methods for code-driven setup:
//!
//! ```rust
//! use arbor::{Directive, SupervisionStrategy, SystemConfig};
//! use std::time::Duration;
//!
//! let config = SystemConfig::new("orders")
//!     .with_port(0)
//!     .with_root_strategy(SupervisionStrategy::one_for_one(Directive::Restart))
//!     .with_resolve_timeout(Duration::from_secs(2));
//! assert_eq!(config.pool_size, 16);
//! ```

use crate::supervision::{Directive, SupervisionStrategy};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Name of the system; the first segment of its remote paths.
    pub name: String,
    /// Host advertised in remote paths and bound by the listener.
    pub host: String,
    /// Listener port. `None` disables inbound remoting, `Some(0)` picks a free port.
    pub port: Option<u16>,
    /// Log every dead letter, not only those nobody subscribed to.
    pub log_dead_letters: bool,
    /// Strategy `/user` applies to top-level application actors.
    pub root_strategy: SupervisionStrategy,
    pub resolve_timeout: Duration,
    pub resolution_cache_capacity: usize,
    pub constructor_cache_capacity: usize,
    /// Connections per remote host.
    pub pool_size: usize,
    pub connect_retries: u32,
    pub idle_timeout: Duration,
    pub idle_check_interval: Duration,
    pub max_frame_size: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            name: "arbor".to_string(),
            host: "127.0.0.1".to_string(),
            port: None,
            log_dead_letters: false,
            root_strategy: SupervisionStrategy::one_for_one(Directive::Restart),
            resolve_timeout: Duration::from_secs(10),
            resolution_cache_capacity: 16_384,
            constructor_cache_capacity: 4_096,
            pool_size: 16,
            connect_retries: 3,
            idle_timeout: Duration::from_secs(30),
            idle_check_interval: Duration::from_secs(15),
            max_frame_size: 16 * 1024 * 1024,
        }
    }
}

impl SystemConfig {
    pub fn new(name: impl Into<String>) -> Self {
        SystemConfig {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_log_dead_letters(mut self, log: bool) -> Self {
        self.log_dead_letters = log;
        self
    }

    pub fn with_root_strategy(mut self, strategy: SupervisionStrategy) -> Self {
        self.root_strategy = strategy;
        self
    }

    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn with_resolution_cache_capacity(mut self, capacity: usize) -> Self {
        self.resolution_cache_capacity = capacity;
        self
    }

    pub fn with_constructor_cache_capacity(mut self, capacity: usize) -> Self {
        self.constructor_cache_capacity = capacity;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn with_connect_retries(mut self, retries: u32) -> Self {
        self.connect_retries = retries.max(1);
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration, check_interval: Duration) -> Self {
        self.idle_timeout = timeout;
        self.idle_check_interval = check_interval;
        self
    }

    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervision::Mode;

    #[test]
    fn missing_fields_take_defaults() {
        let config: SystemConfig =
            serde_json::from_str(r#"{"name":"edge","port":9100,"log_dead_letters":true}"#).unwrap();
        assert_eq!(config.name, "edge");
        assert_eq!(config.port, Some(9100));
        assert!(config.log_dead_letters);
        assert_eq!(config.pool_size, 16);
        assert_eq!(config.connect_retries, 3);
        assert_eq!(config.resolve_timeout, Duration::from_secs(10));
        assert_eq!(config.root_strategy.mode, Mode::OneForOne);
    }

    #[test]
    fn builder_clamps_pool_size() {
        let config = SystemConfig::new("x").with_pool_size(0);
        assert_eq!(config.pool_size, 1);
    }
}
