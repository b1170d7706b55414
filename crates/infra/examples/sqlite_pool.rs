//! Compute-and-cache against a SQLite file.
//!
//! ```bash
//! CACHETTE_LOG=debug cargo run -p cachette-infra --example sqlite_pool
//! ```

#![allow(clippy::print_stdout)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cachette_domain::{BackendConfig, CacheError, CacheSettings, PoolConfig, SqliteConfig};
use cachette_infra::{init_tracing, open_pool, LockRegistry, LogFormat};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::Pretty)?;

    let dir = tempfile::tempdir()?;
    let settings = CacheSettings {
        pool: PoolConfig::builder()
            .namespace("demo")
            .default_lifetime(Duration::from_secs(60))
            .build()?,
        backend: BackendConfig::Sqlite(SqliteConfig::new(dir.path().join("demo.db"))),
    };
    let locks = Arc::new(LockRegistry::default());
    let pool = open_pool::<Vec<u64>>(&settings, &locks)?;

    for round in 1..=2 {
        let primes = pool.get(
            "primes.small",
            |_item, _save| {
                println!("computing primes");
                thread::sleep(Duration::from_millis(50));
                Ok::<_, CacheError>((2..50u64).filter(|n| (2..*n).all(|d| n % d != 0)).collect())
            },
            None,
        )?;
        println!("round {round}: {primes:?}");
    }

    println!("stats: {:?}", pool.stats());
    Ok(())
}
