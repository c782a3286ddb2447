//! In-process coordination service.
//!
//! Implements [`Connector`](crate::coordination::Connector) and
//! [`CoordinationClient`](crate::coordination::CoordinationClient) over a
//! shared in-memory tree, with one-shot watch tables per session and fault
//! injection for partitions and session expiry.

mod memory;

pub use memory::*;
