//! Client-side layer over a hierarchical coordination service.
//!
//! - [`SessionFactory`] / [`Session`]: sessions established under a
//!   [`RetryPolicy`]
//! - [`NodeStore`]: one-shot node CRUD
//! - [`SingleNodeCache`], [`ChildListCache`], [`SubtreeCache`]: local mirrors
//!   kept current by one-shot watches that are re-armed after every fire
//! - [`Client`]: builds all of the above from one configuration
//!
//! [`InMemoryEnsemble`] implements the service in-process.

mod cache;
mod client;
mod config;
mod coordination;
mod ensemble;
mod errors;
mod metrics;
mod session;
mod store;
mod utils;

pub use cache::*;
pub use client::*;
pub use config::*;
pub use coordination::*;
pub use ensemble::*;
pub use errors::*;
pub use metrics::gather_metrics;
pub use session::*;
pub use store::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
