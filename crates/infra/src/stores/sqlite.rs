//! Relational table store on SQLite.
//!
//! One row per id in a table with id, data, lifetime and write-time
//! columns. Liveness is decided in SQL (`lifetime IS NULL OR lifetime +
//! time > now`), and rows that are found already expired while fetching are
//! deleted on the same connection.
//!
//! Connections come from an r2d2 pool; every connection gets WAL journaling,
//! `synchronous=NORMAL` and a busy timeout.

use std::sync::Arc;
use std::time::Duration;

use cachette_common::{Clock, SystemClock};
use cachette_core::{Store, StoreResult};
use cachette_domain::constants::{NAMESPACE_SEPARATOR, SQL_MAX_ID_LENGTH};
use cachette_domain::{CacheError, CacheResult, SqliteConfig, UpsertStrategy};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info, instrument};

use crate::errors::{is_missing_table, IntoStoreError};

const BACKEND: &str = "sqlite";

/// Ids bound per `IN (...)` statement.
const ID_CHUNK: usize = 500;

/// SQL text prepared once from the configured table layout.
#[derive(Debug)]
struct Statements {
    create: String,
    select_live: String,
    delete_expired_in: String,
    exists_live: String,
    upsert: String,
    update: String,
    insert: String,
    delete_in: String,
    delete_all: String,
    delete_prefix: String,
    prune: String,
    prune_prefix: String,
}

impl Statements {
    fn new(config: &SqliteConfig) -> Self {
        let SqliteConfig {
            table, id_col: id, data_col: data, lifetime_col: lifetime, time_col: time, ..
        } = config;
        let live = format!("({lifetime} IS NULL OR {lifetime} + {time} > ?1)");
        let columns = format!("{id}, {data}, {lifetime}, {time}");
        let upsert = match config.upsert {
            UpsertStrategy::InsertOrReplace => {
                format!("INSERT OR REPLACE INTO {table} ({columns}) VALUES (?1, ?2, ?3, ?4)")
            }
            UpsertStrategy::OnConflict => format!(
                "INSERT INTO {table} ({columns}) VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT ({id}) DO UPDATE SET {data} = excluded.{data}, \
                 {lifetime} = excluded.{lifetime}, {time} = excluded.{time}"
            ),
            UpsertStrategy::UpdateThenInsert => String::new(),
        };
        Self {
            create: format!(
                "CREATE TABLE IF NOT EXISTS {table} (\
                 {id} VARCHAR({SQL_MAX_ID_LENGTH}) NOT NULL PRIMARY KEY, \
                 {data} BLOB NOT NULL, \
                 {lifetime} INTEGER, \
                 {time} REAL NOT NULL)"
            ),
            select_live: format!("SELECT {id}, {data} FROM {table} WHERE {live} AND {id} IN "),
            delete_expired_in: format!(
                "DELETE FROM {table} WHERE {lifetime} + {time} <= ?1 AND {id} IN "
            ),
            exists_live: format!("SELECT 1 FROM {table} WHERE {id} = ?2 AND {live}"),
            upsert,
            update: format!(
                "UPDATE {table} SET {data} = ?2, {lifetime} = ?3, {time} = ?4 WHERE {id} = ?1"
            ),
            insert: format!("INSERT INTO {table} ({columns}) VALUES (?1, ?2, ?3, ?4)"),
            delete_in: format!("DELETE FROM {table} WHERE {id} IN "),
            delete_all: format!("DELETE FROM {table}"),
            delete_prefix: format!("DELETE FROM {table} WHERE substr({id}, 1, ?1) = ?2"),
            prune: format!("DELETE FROM {table} WHERE {lifetime} + {time} <= ?1"),
            prune_prefix: format!(
                "DELETE FROM {table} WHERE {lifetime} + {time} <= ?1 AND substr({id}, 1, ?2) = ?3"
            ),
        }
    }
}

/// `(?2, ?3, ...)` placeholder list for `count` ids starting at `first`.
fn placeholders(first: usize, count: usize) -> String {
    let list: Vec<String> = (first..first + count).map(|n| format!("?{n}")).collect();
    format!("({})", list.join(", "))
}

/// Store keeping entries in a SQLite table.
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    statements: Statements,
    upsert: UpsertStrategy,
    namespace: Option<String>,
    clock: Arc<dyn Clock>,
}

impl SqliteStore {
    /// Open the database and its connection pool.
    ///
    /// The table is not created here; call [`SqliteStore::create_table`]
    /// or let the first save create it.
    ///
    /// # Errors
    ///
    /// [`CacheError::Config`] for an invalid table layout,
    /// [`CacheError::Storage`] when the pool cannot open a connection.
    #[instrument(skip(config), fields(path = %config.path.display(), table = %config.table))]
    pub fn new(config: &SqliteConfig) -> CacheResult<Self> {
        config.validate()?;

        let in_memory = config.path.as_os_str() == ":memory:";
        let manager = if in_memory {
            SqliteConnectionManager::memory()
        } else {
            SqliteConnectionManager::file(&config.path)
        };
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager =
            manager.with_init(move |conn| apply_connection_pragmas(conn, busy_timeout, !in_memory));

        // Every in-memory connection is its own database.
        let max_size = if in_memory { 1 } else { config.pool_size };
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_timeout(busy_timeout.max(Duration::from_secs(1)))
            .build(manager)
            .map_err(|e| CacheError::Storage(format!("failed to open sqlite pool: {e}")))?;

        info!(cache_adapter = BACKEND, pool_size = max_size, "SQLite store ready");
        Ok(Self {
            pool,
            statements: Statements::new(config),
            upsert: config.upsert,
            namespace: None,
            clock: Arc::new(SystemClock),
        })
    }

    /// Use `clock` for write times and liveness checks.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Restrict [`Store::prune`] to ids of one pool namespace.
    #[must_use]
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace =
            (!namespace.is_empty()).then(|| format!("{namespace}{NAMESPACE_SEPARATOR}"));
        self
    }

    /// Create the cache table if it does not exist.
    ///
    /// # Errors
    ///
    /// The database failure, converted to a store error.
    pub fn create_table(&self) -> StoreResult<()> {
        let conn = self.connection()?;
        conn.execute(&self.statements.create, []).map_err(IntoStoreError::into_store_error)?;
        debug!(cache_adapter = BACKEND, "Cache table ensured");
        Ok(())
    }

    fn connection(&self) -> StoreResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(IntoStoreError::into_store_error)
    }

    fn write_one(
        &self,
        conn: &Connection,
        id: &str,
        payload: &[u8],
        lifetime: Option<i64>,
        now: f64,
    ) -> rusqlite::Result<()> {
        match self.upsert {
            UpsertStrategy::InsertOrReplace | UpsertStrategy::OnConflict => {
                conn.prepare_cached(&self.statements.upsert)?
                    .execute(params![id, payload, lifetime, now])?;
            }
            UpsertStrategy::UpdateThenInsert => {
                let updated = conn
                    .prepare_cached(&self.statements.update)?
                    .execute(params![id, payload, lifetime, now])?;
                if updated == 0 {
                    let inserted = conn
                        .prepare_cached(&self.statements.insert)?
                        .execute(params![id, payload, lifetime, now]);
                    match inserted {
                        Ok(_) => {}
                        // Another writer inserted the row in between.
                        Err(e) if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) => {
                            conn.prepare_cached(&self.statements.update)?
                                .execute(params![id, payload, lifetime, now])?;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
        Ok(())
    }

    /// One pass over `values`; `Err` only for a missing table or a
    /// structural failure.
    fn try_save(
        &self,
        values: &[(String, Vec<u8>)],
        lifetime: Option<i64>,
    ) -> Result<Vec<String>, rusqlite::Error> {
        let conn = match self.pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                debug!(cache_adapter = BACKEND, error = %e, "No connection for save");
                return Ok(values.iter().map(|(id, _)| id.clone()).collect());
            }
        };
        let now = self.clock.epoch_secs();
        let mut failed = Vec::new();
        for (id, payload) in values {
            if let Err(e) = self.write_one(&conn, id, payload, lifetime, now) {
                if is_missing_table(&e) || is_structural(&e) {
                    return Err(e);
                }
                debug!(cache_adapter = BACKEND, id = %id, error = %e, "Failed to save row");
                failed.push(id.clone());
            }
        }
        Ok(failed)
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("upsert", &self.upsert)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl Store for SqliteStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    fn fetch_many(&self, ids: &[String]) -> StoreResult<Vec<(String, Vec<u8>)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connection()?;
        let now = self.clock.epoch_secs();
        let mut found = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let bound: Vec<Value> = std::iter::once(Value::Real(now))
                .chain(chunk.iter().map(|id| Value::Text(id.clone())))
                .collect();
            let list = placeholders(2, chunk.len());

            let purge = format!("{}{list}", self.statements.delete_expired_in);
            let result = conn
                .execute(&purge, params_from_iter(bound.iter()))
                .and_then(|_| {
                    let mut stmt = conn.prepare(&format!("{}{list}", self.statements.select_live))?;
                    let rows = stmt.query_map(params_from_iter(bound.iter()), |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                    })?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()
                });
            match result {
                Ok(rows) => found.extend(rows),
                Err(e) if is_missing_table(&e) => return Ok(Vec::new()),
                Err(e) => return Err(e.into_store_error()),
            }
        }
        Ok(found)
    }

    fn has(&self, id: &str) -> StoreResult<bool> {
        let conn = self.connection()?;
        let now = self.clock.epoch_secs();
        let found =
            conn.query_row(&self.statements.exists_live, params![now, id], |_| Ok(())).optional();
        match found {
            Ok(found) => Ok(found.is_some()),
            Err(e) if is_missing_table(&e) => Ok(false),
            Err(e) => Err(e.into_store_error()),
        }
    }

    fn save_many(&self, values: &[(String, Vec<u8>)], ttl: Duration) -> StoreResult<Vec<String>> {
        if values.is_empty() {
            return Ok(Vec::new());
        }
        let lifetime = (!ttl.is_zero()).then(|| i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        match self.try_save(values, lifetime) {
            Ok(failed) => Ok(failed),
            Err(e) if is_missing_table(&e) => {
                debug!(cache_adapter = BACKEND, "Cache table missing, creating it");
                self.create_table()?;
                self.try_save(values, lifetime).map_err(IntoStoreError::into_store_error)
            }
            Err(e) => Err(e.into_store_error()),
        }
    }

    fn delete_many(&self, ids: &[String]) -> StoreResult<bool> {
        if ids.is_empty() {
            return Ok(true);
        }
        let conn = self.connection()?;
        for chunk in ids.chunks(ID_CHUNK) {
            let sql = format!("{}{}", self.statements.delete_in, placeholders(1, chunk.len()));
            match conn.execute(&sql, params_from_iter(chunk.iter())) {
                Ok(_) => {}
                Err(e) if is_missing_table(&e) => return Ok(true),
                Err(e) => return Err(e.into_store_error()),
            }
        }
        Ok(true)
    }

    fn clear(&self, prefix: &str) -> StoreResult<bool> {
        let conn = self.connection()?;
        let result = if prefix.is_empty() {
            conn.execute(&self.statements.delete_all, [])
        } else {
            let len = i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX);
            conn.execute(&self.statements.delete_prefix, params![len, prefix])
        };
        match result {
            Ok(removed) => {
                debug!(cache_adapter = BACKEND, prefix, removed, "Cleared rows");
                Ok(true)
            }
            Err(e) if is_missing_table(&e) => Ok(true),
            Err(e) => Err(e.into_store_error()),
        }
    }

    fn prune(&self) -> StoreResult<bool> {
        let conn = self.connection()?;
        let now = self.clock.epoch_secs();
        let result = match &self.namespace {
            Some(prefix) => {
                let len = i64::try_from(prefix.chars().count()).unwrap_or(i64::MAX);
                conn.execute(&self.statements.prune_prefix, params![now, len, prefix])
            }
            None => conn.execute(&self.statements.prune, params![now]),
        };
        match result {
            Ok(removed) => {
                debug!(cache_adapter = BACKEND, removed, "Pruned expired rows");
                Ok(true)
            }
            Err(e) if is_missing_table(&e) => Ok(true),
            Err(e) => Err(e.into_store_error()),
        }
    }

    fn max_id_length(&self) -> Option<usize> {
        Some(SQL_MAX_ID_LENGTH)
    }
}

/// Apply per-connection pragmas: WAL journaling for file databases,
/// `synchronous=NORMAL` and the busy timeout.
fn apply_connection_pragmas(
    conn: &mut Connection,
    busy_timeout: Duration,
    wal: bool,
) -> rusqlite::Result<()> {
    if wal {
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    }
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

fn is_structural(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(
            ErrorCode::ReadOnly
                | ErrorCode::DiskFull
                | ErrorCode::CannotOpen
                | ErrorCode::NotADatabase
        )
    )
}
