//! Development automation tasks for the cachette workspace.
//!
//! Run with: `cargo xtask <command>`
//!
//! This is a CLI tool for developers, so `println!` and `eprintln!` are
//! intentionally used for user-facing output rather than structured logging.

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::env;
use std::process::{Command, ExitCode};

use anyhow::anyhow;

mod features;

/// Environment variable pointing the ignored Redis tests at a live server.
const REDIS_DSN_ENV: &str = "CACHETTE_TEST_REDIS_DSN";

fn main() -> ExitCode {
    let task = env::args().nth(1);

    let result = match task.as_deref() {
        Some("ci") => run_ci(),
        Some("fmt") => run_fmt(),
        Some("clippy") => run_clippy(),
        Some("test") => run_test(),
        Some("test-redis") => run_test_redis(),
        Some("test-features") => features::test_feature_matrix(),
        Some("bench") => run_bench(),
        Some("help") | None => {
            print_help();
            Ok(())
        }
        Some(unknown) => {
            eprintln!("Unknown task: {unknown}");
            eprintln!();
            print_help();
            Err(anyhow::anyhow!("Unknown task"))
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Task failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn print_help() {
    println!("cachette Development Tasks");
    println!();
    println!("USAGE:");
    println!("    cargo xtask <TASK>");
    println!();
    println!("TASKS:");
    println!("    ci             Run all CI checks (fmt, clippy, test, test-features)");
    println!("    fmt            Check Rust code formatting");
    println!("    clippy         Run Clippy lints");
    println!("    test           Run all tests");
    println!("    test-redis     Run the Redis tests against ${REDIS_DSN_ENV}");
    println!("    test-features  Verify the cachette-infra feature matrix");
    println!("    bench          Run the cache pool benchmarks");
    println!("    help           Show this help message");
}

/// Run all CI checks in sequence
fn run_ci() -> anyhow::Result<()> {
    println!("==> Running CI checks...\n");

    println!("==> Step 1/4: Checking Rust format...");
    run_fmt()?;

    println!("\n==> Step 2/4: Running Clippy...");
    run_clippy()?;

    println!("\n==> Step 3/4: Running tests...");
    run_test()?;

    println!("\n==> Step 4/4: Checking feature combinations...");
    features::test_feature_matrix()?;

    if env::var_os(REDIS_DSN_ENV).is_some() {
        println!("\n==> Extra: Running Redis tests...");
        run_test_redis()?;
    }

    println!("\n✓ All CI checks passed!");
    Ok(())
}

/// Check Rust code formatting
fn run_fmt() -> anyhow::Result<()> {
    let status = Command::new("cargo").args(["fmt", "--all", "--", "--check"]).status()?;

    if !status.success() {
        anyhow::bail!("Format check failed. Run 'cargo fmt --all' to fix.");
    }

    Ok(())
}

/// Run Clippy lints
fn run_clippy() -> anyhow::Result<()> {
    let status =
        Command::new("cargo").args(["clippy", "--all-targets", "--all-features"]).status()?;

    if status.success() {
        Ok(())
    } else {
        Err(anyhow!("Clippy run failed. See output above."))
    }
}

/// Run all workspace tests
fn run_test() -> anyhow::Result<()> {
    let status = Command::new("cargo").args(["test", "--workspace", "--all-features"]).status()?;

    if !status.success() {
        anyhow::bail!("Tests failed");
    }

    Ok(())
}

/// Run the ignored tests that need a live Redis server
fn run_test_redis() -> anyhow::Result<()> {
    if env::var_os(REDIS_DSN_ENV).is_none() {
        anyhow::bail!("{REDIS_DSN_ENV} is not set (e.g. redis://127.0.0.1:6379/15)");
    }

    let status = Command::new("cargo")
        .args(["test", "-p", "cachette-infra", "--features", "redis", "--", "--ignored"])
        .status()?;

    if !status.success() {
        anyhow::bail!("Redis tests failed");
    }

    Ok(())
}

/// Run the cache pool benchmarks
fn run_bench() -> anyhow::Result<()> {
    let status = Command::new("cargo").args(["bench", "-p", "cachette-core"]).status()?;

    if !status.success() {
        anyhow::bail!("Benchmarks failed");
    }

    Ok(())
}
