//! External key-value server store on Redis.
//!
//! Operations map onto native commands: `MGET` for fetches, a pipeline of
//! `SET`/`SETEX` for saves, `UNLINK` (falling back to `DEL`) for deletes and
//! `SCAN MATCH` + `UNLINK` for prefix clears. An empty-prefix clear is
//! `FLUSHDB`.
//!
//! In cluster mode keys spread over shards: fetches and deletes go key by
//! key, and a prefix clear is a best-effort scan of every configured node.
//! Because that sweep cannot be atomic the store reports
//! [`Store::requires_versioning`], so pools switch to namespace versioning.

use std::time::Duration;

use cachette_core::{Store, StoreResult};
use cachette_domain::constants::REDIS_SCAN_COUNT;
use cachette_domain::{CacheError, CacheResult, RedisConfig};
use parking_lot::Mutex;
use redis::cluster::{ClusterClient, ClusterConnection};
use redis::{Client, Connection, ConnectionLike, ErrorKind, Pipeline, RedisError, RedisResult};
use tracing::{debug, info, instrument};

use crate::errors::IntoStoreError;

const BACKEND: &str = "redis";

enum Handle {
    Single { client: Client, conn: Mutex<Option<Connection>> },
    Cluster { client: ClusterClient, conn: Mutex<Option<ClusterConnection>>, nodes: Vec<String> },
}

/// Store backed by a Redis server or cluster.
pub struct RedisStore {
    handle: Handle,
}

impl RedisStore {
    /// Connect to the server or cluster described by `config`.
    ///
    /// The connection is opened immediately; wrap the store in
    /// [`crate::stores::LazyStore`] to defer it.
    ///
    /// # Errors
    ///
    /// [`CacheError::Config`] for an unparsable URL,
    /// [`CacheError::Storage`] when the server cannot be reached.
    #[instrument(skip(config), fields(dsn = %redact(&config.dsn), cluster = config.is_cluster()))]
    pub fn connect(config: &RedisConfig) -> CacheResult<Self> {
        let handle = if config.is_cluster() {
            let client = ClusterClient::new(config.cluster_nodes.clone())
                .map_err(|e| CacheError::Config(format!("invalid redis cluster nodes: {e}")))?;
            let conn = client
                .get_connection()
                .map_err(|e| CacheError::Storage(format!("cannot connect to redis cluster: {e}")))?;
            Handle::Cluster {
                client,
                conn: Mutex::new(Some(conn)),
                nodes: config.cluster_nodes.clone(),
            }
        } else {
            let client = Client::open(config.dsn.as_str())
                .map_err(|e| CacheError::Config(format!("invalid redis DSN: {e}")))?;
            let conn = client
                .get_connection()
                .map_err(|e| CacheError::Storage(format!("cannot connect to redis: {e}")))?;
            Handle::Single { client, conn: Mutex::new(Some(conn)) }
        };
        info!(cache_adapter = BACKEND, cluster = config.is_cluster(), "Redis store ready");
        Ok(Self { handle })
    }

    /// Whether this store talks to a cluster.
    #[must_use]
    pub const fn is_cluster(&self) -> bool {
        matches!(self.handle, Handle::Cluster { .. })
    }

    fn run<T>(&self, f: impl FnOnce(&mut dyn ConnectionLike) -> RedisResult<T>) -> RedisResult<T> {
        match &self.handle {
            Handle::Single { client, conn } => run_on(conn, || client.get_connection(), f),
            Handle::Cluster { client, conn, .. } => run_on(conn, || client.get_connection(), f),
        }
    }

    fn save_one(&self, id: &str, payload: &[u8], ttl: Duration) -> RedisResult<()> {
        self.run(|conn| set_command(id, payload, ttl).query(conn))
    }

    fn unlink(&self, ids: &[String]) -> RedisResult<()> {
        self.run(|conn| match redis::cmd("UNLINK").arg(ids).query::<()>(conn) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::ResponseError => {
                debug!(cache_adapter = BACKEND, error = %e, "UNLINK rejected, using DEL");
                redis::cmd("DEL").arg(ids).query(conn)
            }
            Err(e) => Err(e),
        })
    }

    /// Delete every key matching `pattern` reachable through `conn`.
    fn sweep(conn: &mut dyn ConnectionLike, pattern: &str) -> RedisResult<usize> {
        let mut cursor: u64 = 0;
        let mut removed = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(REDIS_SCAN_COUNT)
                .query(conn)?;
            if !keys.is_empty() {
                removed += keys.len();
                match redis::cmd("UNLINK").arg(&keys).query::<()>(conn) {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::ResponseError => {
                        redis::cmd("DEL").arg(&keys).query::<()>(conn)?;
                    }
                    Err(e) => return Err(e),
                }
            }
            cursor = next;
            if cursor == 0 {
                return Ok(removed);
            }
        }
    }

    /// Scan each known node directly and delete matches one by one through
    /// the cluster connection, which routes every key to its shard.
    fn clear_cluster(&self, nodes: &[String], pattern: &str) -> StoreResult<bool> {
        let mut ok = true;
        for node in nodes {
            let scanned = Client::open(node.as_str()).and_then(|client| {
                let mut conn = client.get_connection()?;
                let mut cursor: u64 = 0;
                let mut keys = Vec::new();
                loop {
                    let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(REDIS_SCAN_COUNT)
                        .query(&mut conn)?;
                    keys.extend(batch);
                    cursor = next;
                    if cursor == 0 {
                        return Ok(keys);
                    }
                }
            });
            let keys = match scanned {
                Ok(keys) => keys,
                Err(e) => {
                    debug!(
                        cache_adapter = BACKEND,
                        node = %redact(node),
                        error = %e,
                        "Cannot scan cluster node"
                    );
                    ok = false;
                    continue;
                }
            };
            for key in keys {
                if let Err(e) = self.run(|conn| redis::cmd("DEL").arg(&key).query::<()>(conn)) {
                    debug!(cache_adapter = BACKEND, key = %key, error = %e, "Failed to delete key");
                    ok = false;
                }
            }
        }
        Ok(ok)
    }
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("cluster", &self.is_cluster()).finish_non_exhaustive()
    }
}

impl Store for RedisStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn fetch_many(&self, ids: &[String]) -> StoreResult<Vec<(String, Vec<u8>)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<Vec<u8>>> = if self.is_cluster() {
            ids.iter()
                .map(|id| self.run(|conn| redis::cmd("GET").arg(id).query(conn)))
                .collect::<RedisResult<_>>()
                .map_err(IntoStoreError::into_store_error)?
        } else {
            self.run(|conn| redis::cmd("MGET").arg(ids).query(conn))
                .map_err(IntoStoreError::into_store_error)?
        };
        Ok(ids
            .iter()
            .zip(values)
            .filter_map(|(id, value)| value.map(|payload| (id.clone(), payload)))
            .collect())
    }

    fn has(&self, id: &str) -> StoreResult<bool> {
        self.run(|conn| redis::cmd("EXISTS").arg(id).query(conn))
            .map_err(IntoStoreError::into_store_error)
    }

    fn save_many(&self, values: &[(String, Vec<u8>)], ttl: Duration) -> StoreResult<Vec<String>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        if !self.is_cluster() {
            let mut pipe = Pipeline::new();
            for (id, payload) in values {
                pipe.add_command(set_command(id, payload, ttl)).ignore();
            }
            match self.run(|conn| pipe.query::<()>(conn)) {
                Ok(()) => return Ok(Vec::new()),
                Err(e) => debug!(
                    cache_adapter = BACKEND,
                    error = %e,
                    "Pipelined save failed, retrying one by one"
                ),
            }
        }

        let mut failed = Vec::new();
        let mut last_error = None;
        for (id, payload) in values {
            if let Err(e) = self.save_one(id, payload, ttl) {
                debug!(cache_adapter = BACKEND, id = %id, error = %e, "Failed to save key");
                failed.push(id.clone());
                last_error = Some(e);
            }
        }
        match last_error {
            // Nothing went through: report the cause instead of a list.
            Some(e) if failed.len() == values.len() && is_connection_failure(&e) => {
                Err(e.into_store_error())
            }
            _ => Ok(failed),
        }
    }

    fn delete_many(&self, ids: &[String]) -> StoreResult<bool> {
        if ids.is_empty() {
            return Ok(true);
        }
        if self.is_cluster() {
            for id in ids {
                self.run(|conn| redis::cmd("DEL").arg(id).query::<()>(conn))
                    .map_err(IntoStoreError::into_store_error)?;
            }
            return Ok(true);
        }
        self.unlink(ids).map_err(IntoStoreError::into_store_error)?;
        Ok(true)
    }

    fn clear(&self, prefix: &str) -> StoreResult<bool> {
        let pattern = format!("{}*", escape_glob(prefix));
        match &self.handle {
            Handle::Cluster { nodes, .. } => self.clear_cluster(nodes, &pattern),
            Handle::Single { .. } if prefix.is_empty() => {
                self.run(|conn| redis::cmd("FLUSHDB").query::<()>(conn))
                    .map_err(IntoStoreError::into_store_error)?;
                Ok(true)
            }
            Handle::Single { .. } => {
                let removed = self
                    .run(|conn| Self::sweep(conn, &pattern))
                    .map_err(IntoStoreError::into_store_error)?;
                debug!(cache_adapter = BACKEND, prefix, removed, "Cleared keys");
                Ok(true)
            }
        }
    }

    fn requires_versioning(&self) -> bool {
        self.is_cluster()
    }
}

fn run_on<C, T>(
    slot: &Mutex<Option<C>>,
    connect: impl FnOnce() -> RedisResult<C>,
    f: impl FnOnce(&mut dyn ConnectionLike) -> RedisResult<T>,
) -> RedisResult<T>
where
    C: ConnectionLike,
{
    let mut guard = slot.lock();
    if guard.is_none() {
        *guard = Some(connect()?);
    }
    let conn = guard
        .as_mut()
        .ok_or_else(|| RedisError::from((ErrorKind::ClientError, "connection unavailable")))?;
    let result = f(conn);
    if let Err(e) = &result {
        if is_connection_failure(e) {
            // Reconnect on next use.
            *guard = None;
        }
    }
    result
}

fn set_command(id: &str, payload: &[u8], ttl: Duration) -> redis::Cmd {
    if ttl.is_zero() {
        let mut cmd = redis::cmd("SET");
        cmd.arg(id).arg(payload);
        cmd
    } else {
        let mut cmd = redis::cmd("SETEX");
        cmd.arg(id).arg(ttl.as_secs().max(1)).arg(payload);
        cmd
    }
}

fn is_connection_failure(err: &RedisError) -> bool {
    err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_io_error()
        || err.is_timeout()
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Hide credentials before logging a URL.
fn redact(dsn: &str) -> String {
    match (dsn.find("://"), dsn.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &dsn[..scheme_end], &dsn[at..])
        }
        _ => dsn.to_string(),
    }
}
