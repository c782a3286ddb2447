use std::fmt;
use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Ensemble address and session timeouts
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Comma separated `host:port` list, e.g. `zk1:2181,zk2:2181`
    #[serde(default = "default_connect_string")]
    pub connect_string: String,

    /// Session expiry negotiated with the ensemble (unit: milliseconds)
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,

    /// Budget for a single connection attempt (unit: milliseconds)
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_string: default_connect_string(),
            session_timeout_ms: default_session_timeout_ms(),
            connection_timeout_ms: default_connection_timeout_ms(),
        }
    }
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    pub fn target(&self) -> Result<ConnectionTarget> {
        ConnectionTarget::parse(&self.connect_string)
    }

    pub fn validate(&self) -> Result<()> {
        self.target()?;
        if self.session_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "session_timeout_ms must be greater than 0".to_string(),
            )));
        }
        if self.connection_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "connection_timeout_ms must be greater than 0".to_string(),
            )));
        }
        Ok(())
    }
}

/// Immutable ensemble address: the endpoints a session may connect to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionTarget {
    endpoints: Vec<String>,
}

impl ConnectionTarget {
    /// Parses `host:port[,host:port...]`
    pub fn parse(connect_string: &str) -> Result<Self> {
        let endpoints: Vec<String> = connect_string
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if endpoints.is_empty() {
            return Err(Error::Config(ConfigError::Message(
                "connect string contains no endpoints".to_string(),
            )));
        }

        for endpoint in &endpoints {
            let valid = endpoint
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
                .unwrap_or(false);
            if !valid {
                return Err(Error::Config(ConfigError::Message(format!(
                    "invalid endpoint {endpoint:?}, expected host:port"
                ))));
            }
        }

        Ok(Self { endpoints })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.endpoints.join(","))
    }
}

fn default_connect_string() -> String {
    "127.0.0.1:2181".to_string()
}
fn default_session_timeout_ms() -> u64 {
    5000
}
fn default_connection_timeout_ms() -> u64 {
    5000
}
