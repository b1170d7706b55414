//! Configuration value types for pools and storage backends
//!
//! These types only describe configuration. Loading them from the
//! environment or from files lives in `cachette-infra::config`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{
    DEFAULT_DATA_COL, DEFAULT_ID_COL, DEFAULT_LIFETIME_COL, DEFAULT_SQLITE_BUSY_TIMEOUT_MS,
    DEFAULT_SQLITE_POOL_SIZE, DEFAULT_TABLE, DEFAULT_TIME_COL,
};
use crate::errors::{CacheError, CacheResult};
use crate::key::validate_namespace;

/// Pool-level behavior shared by every backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Prefix partitioning this pool's keys inside a shared backend
    pub namespace: String,

    /// Lifetime applied to items saved without an explicit expiry, in
    /// seconds (0 = forever)
    pub default_lifetime_secs: u64,

    /// Whether keys carry the namespace version token
    pub versioning: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { namespace: String::new(), default_lifetime_secs: 0, versioning: false }
    }
}

impl PoolConfig {
    /// Create a new configuration builder
    #[must_use]
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }

    /// Default lifetime as a [`Duration`]
    #[must_use]
    pub const fn default_lifetime(&self) -> Duration {
        Duration::from_secs(self.default_lifetime_secs)
    }

    /// Validate the namespace.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidNamespace`] for illegal characters.
    pub fn validate(&self) -> CacheResult<()> {
        validate_namespace(&self.namespace).map(|_| ())
    }
}

/// Builder for [`PoolConfig`] with fluent API
#[derive(Debug, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// Set the namespace
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.config.namespace = namespace.into();
        self
    }

    /// Set the default lifetime (whole seconds; zero means forever)
    #[must_use]
    pub const fn default_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.default_lifetime_secs = lifetime.as_secs();
        self
    }

    /// Enable or disable namespace versioning
    #[must_use]
    pub const fn versioning(mut self, enabled: bool) -> Self {
        self.config.versioning = enabled;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidNamespace`] for illegal characters.
    pub fn build(self) -> CacheResult<PoolConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BackendConfig {
    Filesystem(FilesystemConfig),
    Sqlite(SqliteConfig),
    Memory(MemoryConfig),
    Redis(RedisConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Memory(MemoryConfig::default())
    }
}

impl BackendConfig {
    /// Short backend name used in logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Filesystem(_) => "filesystem",
            Self::Sqlite(_) => "sqlite",
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }
}

/// One file per entry under a root directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemConfig {
    #[serde(default = "default_cache_directory")]
    pub directory: PathBuf,
}

impl Default for FilesystemConfig {
    fn default() -> Self {
        Self { directory: default_cache_directory() }
    }
}

fn default_cache_directory() -> PathBuf {
    std::env::temp_dir().join("cachette")
}

/// How the relational backend writes a row that may already exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStrategy {
    /// `INSERT OR REPLACE`
    InsertOrReplace,
    /// `INSERT ... ON CONFLICT (id) DO UPDATE`
    #[default]
    OnConflict,
    /// `UPDATE`, then `INSERT` when no row was affected
    UpdateThenInsert,
}

/// Relational table backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file; `:memory:` is accepted for tests
    pub path: PathBuf,
    pub table: String,
    pub id_col: String,
    pub data_col: String,
    pub lifetime_col: String,
    pub time_col: String,
    /// Maximum pooled connections
    pub pool_size: u32,
    pub busy_timeout_ms: u64,
    pub upsert: UpsertStrategy,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("cachette.db"),
            table: DEFAULT_TABLE.to_string(),
            id_col: DEFAULT_ID_COL.to_string(),
            data_col: DEFAULT_DATA_COL.to_string(),
            lifetime_col: DEFAULT_LIFETIME_COL.to_string(),
            time_col: DEFAULT_TIME_COL.to_string(),
            pool_size: DEFAULT_SQLITE_POOL_SIZE,
            busy_timeout_ms: DEFAULT_SQLITE_BUSY_TIMEOUT_MS,
            upsert: UpsertStrategy::default(),
        }
    }
}

impl SqliteConfig {
    /// Configuration for a database file with default table layout
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), ..Self::default() }
    }

    /// Check table and column names are plain SQL identifiers.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] naming the first bad identifier.
    pub fn validate(&self) -> CacheResult<()> {
        for (what, ident) in [
            ("table", &self.table),
            ("id_col", &self.id_col),
            ("data_col", &self.data_col),
            ("lifetime_col", &self.lifetime_col),
            ("time_col", &self.time_col),
        ] {
            let valid = !ident.is_empty()
                && !ident.starts_with(|c: char| c.is_ascii_digit())
                && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
            if !valid {
                return Err(CacheError::Config(format!(
                    "{what} \"{ident}\" is not a valid SQL identifier"
                )));
            }
        }
        if self.pool_size == 0 {
            return Err(CacheError::Config("pool_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// In-process map backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Evict least recently used entries beyond this count (`None` = unbounded)
    pub max_items: Option<usize>,
}

/// External key-value server backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Connection URL for a single server
    pub dsn: String,

    /// Seed node URLs; non-empty selects cluster mode
    #[serde(default)]
    pub cluster_nodes: Vec<String>,

    /// Defer connecting until the first operation
    #[serde(default)]
    pub lazy: bool,
}

impl RedisConfig {
    /// Whether this configuration targets a cluster
    #[must_use]
    pub fn is_cluster(&self) -> bool {
        !self.cluster_nodes.is_empty()
    }

    /// Parse a DSN of the form
    /// `redis[s]://[user:pass@]host[:port][/db][?redis_cluster=1&host[h2:port]&dbindex=N&lazy=1]`.
    ///
    /// `redis:?host[a:6379]&host[b:6379]&redis_cluster=1` lists nodes without
    /// a base host.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Config`] for an unknown scheme, a DSN with no
    /// host, or several hosts without `redis_cluster`.
    ///
    /// # Example
    ///
    /// ```
    /// use cachette_domain::RedisConfig;
    ///
    /// let config = RedisConfig::from_dsn("redis://localhost:6379/2?lazy=1").unwrap();
    /// assert_eq!(config.dsn, "redis://localhost:6379/2");
    /// assert!(config.lazy);
    /// assert!(!config.is_cluster());
    /// ```
    pub fn from_dsn(dsn: &str) -> CacheResult<Self> {
        let url =
            Url::parse(dsn).map_err(|e| CacheError::Config(format!("invalid redis DSN: {e}")))?;
        let scheme = url.scheme();
        if scheme != "redis" && scheme != "rediss" {
            return Err(CacheError::Config(format!("invalid redis DSN scheme \"{scheme}\"")));
        }

        let mut hosts = Vec::new();
        let mut cluster = false;
        let mut lazy = false;
        let mut dbindex = None;
        for (name, value) in url.query_pairs() {
            if let Some(host) = name.strip_prefix("host[").and_then(|h| h.strip_suffix(']')) {
                hosts.push(host.to_string());
                continue;
            }
            match name.as_ref() {
                "redis_cluster" => cluster = is_truthy(&value),
                "lazy" => lazy = is_truthy(&value),
                "dbindex" => {
                    let index = value
                        .parse::<u32>()
                        .map_err(|_| CacheError::Config(format!("invalid dbindex \"{value}\"")))?;
                    dbindex = Some(index);
                }
                _ => {}
            }
        }

        let auth = match (url.username(), url.password()) {
            ("", None) => String::new(),
            (user, Some(pass)) => format!("{user}:{pass}@"),
            (pass, None) => format!(":{pass}@"),
        };
        let path_db = url.path().trim_matches('/');
        let db = match (path_db.is_empty(), dbindex) {
            (false, _) => format!("/{path_db}"),
            (true, Some(index)) => format!("/{index}"),
            (true, None) => String::new(),
        };
        let node_url = |host: &str| format!("{scheme}://{auth}{host}{db}");

        let base = url.host_str().map(|host| match url.port() {
            Some(port) => node_url(&format!("{host}:{port}")),
            None => node_url(host),
        });

        if cluster {
            let mut nodes: Vec<String> = base.iter().cloned().collect();
            nodes.extend(hosts.iter().map(|h| node_url(h)));
            let first = nodes
                .first()
                .cloned()
                .ok_or_else(|| CacheError::Config("redis DSN names no host".to_string()))?;
            return Ok(Self { dsn: first, cluster_nodes: nodes, lazy });
        }

        let dsn = match (base, hosts.as_slice()) {
            (Some(base), []) => base,
            (None, [single]) => node_url(single),
            (None, []) => return Err(CacheError::Config("redis DSN names no host".to_string())),
            _ => {
                return Err(CacheError::Config(
                    "several redis hosts require redis_cluster=1".to_string(),
                ))
            }
        };
        Ok(Self { dsn, cluster_nodes: Vec::new(), lazy })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "on")
}

/// Everything needed to build one cache pool
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub pool: PoolConfig,
    pub backend: BackendConfig,
}
