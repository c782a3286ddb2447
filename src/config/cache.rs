use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Watch cache tuning shared by all cache variants
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    /// Deepest level mirrored by subtree caches, root is depth 0.
    /// `None` mirrors the whole subtree.
    #[serde(default)]
    pub max_tree_depth: Option<usize>,

    /// Times a full resynchronization is attempted after reconnecting
    /// before the cache reports itself desynchronized
    #[serde(default = "default_max_resync_attempts")]
    pub max_resync_attempts: usize,

    /// Give up re-establishing an expired session after this many rounds
    /// of the retry policy. 0 means keep trying until the cache is closed.
    #[serde(default)]
    pub max_session_rebuilds: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_tree_depth: None,
            max_resync_attempts: default_max_resync_attempts(),
            max_session_rebuilds: 0,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_resync_attempts == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_resync_attempts must be at least 1".to_string(),
            )));
        }
        Ok(())
    }
}

fn default_max_resync_attempts() -> usize {
    3
}
