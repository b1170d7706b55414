//! # cachette infrastructure
//!
//! Implementations of the `cachette-core` storage port, plus the impure
//! glue around them.
//!
//! This crate contains:
//! - Storage backends: filesystem, SQLite, in-process and Redis
//! - The lazy-initialization wrapper and the backend factory
//! - Configuration loading from environment variables and files
//! - Tracing subscriber setup
//!
//! ## Architecture
//! - Implements traits defined in `cachette-core`
//! - Contains all client crates (`rusqlite`, `r2d2`, `redis`)
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cachette_domain::CacheError;
//! use cachette_infra::{config, open_pool, LockRegistry};
//!
//! let locks = Arc::new(LockRegistry::default());
//! let settings = config::load()?;
//! let pool = open_pool::<String>(&settings, &locks)?;
//! let greeting =
//!     pool.get("greeting", |_item, _save| Ok::<_, CacheError>("hello".to_string()), None)?;
//! # Ok::<(), cachette_domain::CacheError>(())
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod observability;
pub mod stores;

use std::sync::Arc;

use cachette_common::{Clock, SystemClock};
use cachette_core::{CachePool, JsonMarshaller};
pub use cachette_core::LockRegistry;
use cachette_domain::{CacheResult, CacheSettings};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use observability::{init_tracing, LogFormat, TracingInitError};
pub use stores::{Backend, FilesystemStore, LazyStore, MemoryStore, SqliteStore};
#[cfg(feature = "redis")]
pub use stores::RedisStore;

/// Open the configured backend and wrap it in a JSON-marshalling pool.
///
/// Every pool of a process should be handed the same `locks` so
/// concurrent `get` calls single-flight across pools.
///
/// # Errors
///
/// Configuration and structural storage errors from [`Backend::open`] or
/// [`CachePool::new`].
pub fn open_pool<V>(
    settings: &CacheSettings,
    locks: &Arc<LockRegistry>,
) -> CacheResult<CachePool<V>>
where
    V: Serialize + DeserializeOwned + 'static,
{
    open_pool_with_clock(settings, Arc::new(SystemClock), locks)
}

/// [`open_pool`] with an explicit clock shared by the pool and its store.
///
/// # Errors
///
/// See [`open_pool`].
pub fn open_pool_with_clock<V>(
    settings: &CacheSettings,
    clock: Arc<dyn Clock>,
    locks: &Arc<LockRegistry>,
) -> CacheResult<CachePool<V>>
where
    V: Serialize + DeserializeOwned + 'static,
{
    let store =
        Backend::open_with_clock(&settings.backend, &settings.pool.namespace, Arc::clone(&clock))?
            .into_store();
    Ok(CachePool::new(store, Arc::new(JsonMarshaller), &settings.pool)?
        .with_clock(clock)
        .with_lock_registry(Arc::clone(locks)))
}
