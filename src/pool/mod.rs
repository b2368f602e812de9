//! Connection pooling and version negotiation.
//!
//! One [`HttpConnectionPool`] per destination identity ([`PoolKey`]) owns
//! the idle lists, request queues, and connection lifecycle for all three
//! protocol versions; the [`PoolManager`] keys pools, sweeps them
//! periodically, and reacts to network changes.

pub mod altsvc;
pub mod key;
pub mod manager;
#[allow(clippy::module_inception)]
pub mod pool;

pub use key::{PoolKey, PoolKind};
pub use manager::PoolManager;
pub use pool::{HttpConnectionPool, PoolCollaborators};
