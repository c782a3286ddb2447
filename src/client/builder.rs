use std::sync::Arc;
use std::time::Duration;

use config::ConfigError;

use super::Client;
use crate::coordination::Connector;
use crate::CacheConfig;
use crate::Error;
use crate::Result;
use crate::RetryPolicy;
use crate::TreeWatchConfig;

pub struct ClientBuilder {
    config: TreeWatchConfig,
    connector: Option<Arc<dyn Connector>>,
}

impl ClientBuilder {
    /// Create a new builder with default config and the given connect string
    pub fn new(connect_string: String) -> Self {
        let mut config = TreeWatchConfig::default();
        config.session.connect_string = connect_string;
        Self {
            config,
            connector: None,
        }
    }

    /// Transport used to open sessions. Required.
    pub fn connector(
        mut self,
        connector: Arc<dyn Connector>,
    ) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Backoff for session establishment (default: 1s base, 3 retries)
    pub fn retry_policy(
        mut self,
        policy: RetryPolicy,
    ) -> Self {
        self.config.retry = policy;
        self
    }

    /// Set session timeout (default: 5s)
    pub fn session_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.session.session_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set per-attempt connection timeout (default: 5s)
    pub fn connection_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.config.session.connection_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn cache_config(
        mut self,
        config: CacheConfig,
    ) -> Self {
        self.config.cache = config;
        self
    }

    /// Completely replaces the configuration, connect string included.
    ///
    /// Settings applied earlier through the granular methods are discarded.
    pub fn set_config(
        mut self,
        config: TreeWatchConfig,
    ) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and builds the client. No I/O happens here.
    pub fn build(self) -> Result<Client> {
        let connector = self
            .connector
            .ok_or_else(|| Error::Config(ConfigError::Message("a connector must be provided".to_string())))?;
        Client::from_config(self.config, connector)
    }
}
