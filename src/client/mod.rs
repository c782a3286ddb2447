//! Entry point tying a connector, a session configuration and the cache
//! defaults together.
//!
//! # Basic Usage
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use treewatch::Client;
//! use treewatch::InMemoryEnsemble;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let client = Client::builder("127.0.0.1:2181")
//!         .connector(Arc::new(InMemoryEnsemble::new()))
//!         .session_timeout(Duration::from_secs(5))
//!         .build()
//!         .unwrap();
//!
//!     client.nodes().create("/app/config", "v1").await.unwrap();
//!
//!     let cache = client.node_cache("/app/config").unwrap();
//!     cache.listenable().add(|event: &treewatch::CacheEvent| println!("{event:?}"));
//!     cache.start().await.unwrap();
//! }
//! ```

mod builder;

pub use builder::*;


use std::sync::Arc;

use crate::cache::ChildListCache;
use crate::cache::SingleNodeCache;
use crate::cache::SubtreeCache;
use crate::coordination::Connector;
use crate::session::Session;
use crate::session::SessionFactory;
use crate::store::NodeStore;
use crate::ConnectionTarget;
use crate::Result;
use crate::TreeWatchConfig;

/// Hands out node stores and caches bound to one ensemble.
///
/// Cheap to clone. Every cache it builds owns a fresh [`Session`]; nothing is
/// connected until that cache is started.
#[derive(Clone)]
pub struct Client {
    factory: SessionFactory,
    connector: Arc<dyn Connector>,
    target: ConnectionTarget,
    config: TreeWatchConfig,
}

impl Client {
    /// Create a configured client builder
    pub fn builder(connect_string: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(connect_string.into())
    }

    /// Builds a client from an already loaded configuration.
    ///
    /// The configuration is validated first.
    pub fn from_config(
        config: TreeWatchConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self> {
        let config = config.validate()?;
        Ok(Self {
            factory: SessionFactory::new(connector.clone()),
            connector,
            target: config.session.target()?,
            config,
        })
    }

    pub fn config(&self) -> &TreeWatchConfig {
        &self.config
    }

    /// One-shot node operations
    pub fn nodes(&self) -> NodeStore {
        NodeStore::new(
            self.factory.clone(),
            self.target.clone(),
            self.config.retry,
            self.config.session.session_timeout(),
            self.config.session.connection_timeout(),
        )
    }

    /// A new session in state `Created`
    pub fn session(&self) -> Session {
        self.factory.create_session(
            self.target.clone(),
            self.config.retry,
            self.config.session.session_timeout(),
            self.config.session.connection_timeout(),
        )
    }

    pub fn node_cache(
        &self,
        path: impl Into<String>,
    ) -> Result<SingleNodeCache> {
        Ok(SingleNodeCache::new(self.session(), path)?.with_config(self.config.cache.clone()))
    }

    pub fn children_cache(
        &self,
        path: impl Into<String>,
    ) -> Result<ChildListCache> {
        Ok(ChildListCache::new(self.session(), path)?.with_config(self.config.cache.clone()))
    }

    /// Honors `cache.max_tree_depth` from the configuration
    pub fn tree_cache(
        &self,
        path: impl Into<String>,
    ) -> Result<SubtreeCache> {
        Ok(SubtreeCache::new(self.session(), path)?.with_config(self.config.cache.clone()))
    }

    pub fn connector(&self) -> &Arc<dyn Connector> {
        &self.connector
    }
}
