//! # cachette core
//!
//! Ports and orchestration for namespaced, versioned cache pools.
//!
//! - [`ports`]: the [`Store`] and [`Marshaller`] contracts backends and
//!   serializers implement
//! - [`marshal`]: default value serializers
//! - [`pool`]: [`CachePool`], the adapter composing key resolution, the
//!   deferred write buffer and a store
//! - [`compute`]: the compute-and-cache [`CachePool::get`] with
//!   probabilistic early expiration and single-flight locking
//!
//! This crate never depends on a backend client library; concrete stores
//! live in `cachette-infra`.

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod compute;
pub mod marshal;
pub mod pool;
pub mod ports;

pub use compute::{should_recompute_early, LockRegistry};
pub use marshal::{DeflateMarshaller, JsonMarshaller};
pub use pool::{CachePool, Items, PoolStats, PoolStatsSnapshot};
pub use ports::{Marshaller, Store, StoreError, StoreResult};

#[cfg(test)]
pub(crate) mod testing;
