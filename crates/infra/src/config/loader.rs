//! Configuration loader
//!
//! Loads [`CacheSettings`] from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `CACHETTE_BACKEND` is unset or invalid, falls back to a file
//! 3. Probes several paths for config files
//! 4. Supports JSON and TOML formats
//!
//! ## Environment Variables
//! - `CACHETTE_BACKEND`: `filesystem`, `sqlite`, `memory` or `redis` (required)
//! - `CACHETTE_NAMESPACE`: Pool namespace (default empty)
//! - `CACHETTE_DEFAULT_LIFETIME`: Default lifetime in seconds, 0 = forever
//! - `CACHETTE_VERSIONING`: Whether keys carry a namespace version (true/false)
//! - `CACHETTE_FS_DIRECTORY`: Cache directory for `filesystem`
//! - `CACHETTE_SQLITE_PATH`: Database file for `sqlite` (required for it)
//! - `CACHETTE_REDIS_DSN`: Server DSN for `redis` (required for it)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./cachette.toml` or `./cachette.json` (current working directory)
//! 2. `../cachette.toml` or `../cachette.json` (parent directory)
//! 3. `../../cachette.toml` or `../../cachette.json` (grandparent directory)
//! 4. The same names next to the executable

use std::path::{Path, PathBuf};

use cachette_domain::{
    BackendConfig, CacheError, CacheResult, CacheSettings, FilesystemConfig, MemoryConfig,
    PoolConfig, RedisConfig, SqliteConfig,
};

const FILE_NAMES: [&str; 2] = ["cachette.toml", "cachette.json"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If that fails,
/// falls back to loading from a config file.
///
/// # Errors
/// Returns `CacheError::Config` if:
/// - Configuration cannot be loaded from either source
/// - File format is invalid
/// - Values fail validation
pub fn load() -> CacheResult<CacheSettings> {
    match load_from_env() {
        Ok(settings) => {
            tracing::info!(
                backend = settings.backend.kind(),
                "Configuration loaded from environment variables"
            );
            Ok(settings)
        }
        Err(e) => {
            tracing::debug!(error = ?e, "Failed to load from environment, trying file");
            load_from_file(None)
        }
    }
}

/// Load configuration from environment variables
///
/// `CACHETTE_BACKEND` must be set, plus whatever that backend requires.
///
/// # Errors
/// Returns `CacheError::Config` if required variables are missing or have
/// invalid values.
pub fn load_from_env() -> CacheResult<CacheSettings> {
    let backend_kind = env_var("CACHETTE_BACKEND")?;

    let default_lifetime_secs = match std::env::var("CACHETTE_DEFAULT_LIFETIME") {
        Ok(value) => value
            .parse::<u64>()
            .map_err(|e| CacheError::Config(format!("Invalid default lifetime: {e}")))?,
        Err(_) => 0,
    };
    let pool = PoolConfig {
        namespace: std::env::var("CACHETTE_NAMESPACE").unwrap_or_default(),
        default_lifetime_secs,
        versioning: env_bool("CACHETTE_VERSIONING", false),
    };

    let backend = match backend_kind.to_ascii_lowercase().as_str() {
        "filesystem" => BackendConfig::Filesystem(
            std::env::var("CACHETTE_FS_DIRECTORY")
                .map(|dir| FilesystemConfig { directory: PathBuf::from(dir) })
                .unwrap_or_default(),
        ),
        "sqlite" => BackendConfig::Sqlite(SqliteConfig::new(env_var("CACHETTE_SQLITE_PATH")?)),
        "memory" => BackendConfig::Memory(MemoryConfig::default()),
        "redis" => BackendConfig::Redis(RedisConfig::from_dsn(&env_var("CACHETTE_REDIS_DSN")?)?),
        other => return Err(CacheError::Config(format!("Unknown backend \"{other}\""))),
    };

    validate(CacheSettings { pool, backend })
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Errors
/// Returns `CacheError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
/// - Values fail validation
pub fn load_from_file(path: Option<PathBuf>) -> CacheResult<CacheSettings> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(CacheError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            CacheError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| CacheError::Config(format!("Failed to read config file: {e}")))?;

    validate(parse_config(&contents, &config_path)?)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> CacheResult<CacheSettings> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| CacheError::Config(format!("Invalid TOML format: {e}"))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| CacheError::Config(format!("Invalid JSON format: {e}"))),
        _ => Err(CacheError::Config(format!("Unsupported config format: {extension}"))),
    }
}

fn validate(settings: CacheSettings) -> CacheResult<CacheSettings> {
    settings.pool.validate().map_err(|e| CacheError::Config(e.to_string()))?;
    if let BackendConfig::Sqlite(sql) = &settings.backend {
        sql.validate()?;
    }
    Ok(settings)
}

/// Probe multiple paths for configuration files
///
/// Searches the current working directory and up to two parents, then the
/// executable's directory.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut bases = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        bases.extend([cwd.clone(), cwd.join(".."), cwd.join("../..")]);
    }
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            bases.push(exe_dir.to_path_buf());
        }
    }

    probe_in(&bases)
}

fn probe_in(bases: &[PathBuf]) -> Option<PathBuf> {
    bases
        .iter()
        .flat_map(|base| FILE_NAMES.iter().map(move |name| base.join(name)))
        .find(|path| path.exists())
}

/// Get required environment variable
fn env_var(key: &str) -> CacheResult<String> {
    std::env::var(key)
        .map_err(|_| CacheError::Config(format!("Missing required environment variable: {key}")))
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
