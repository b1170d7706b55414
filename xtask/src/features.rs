use std::process::Command;

use anyhow::{Context, Result};

/// `(label, extra cargo args)` for each supported build of `cachette-infra`.
const FEATURE_COMBINATIONS: &[(&str, &[&str])] = &[
    ("default", &[]),
    ("no-default-features", &["--no-default-features"]),
    ("redis", &["--no-default-features", "--features", "redis"]),
];

/// Check that every supported feature combination compiles and passes its
/// unit tests.
pub fn test_feature_matrix() -> Result<()> {
    println!("Testing {} cachette-infra feature combinations...", FEATURE_COMBINATIONS.len());

    for (index, (label, args)) in FEATURE_COMBINATIONS.iter().enumerate() {
        println!(
            "\n[{}/{}] cargo test -p cachette-infra --lib {}",
            index + 1,
            FEATURE_COMBINATIONS.len(),
            args.join(" ")
        );

        let status = Command::new("cargo")
            .args(["test", "-p", "cachette-infra", "--lib"])
            .args(*args)
            .status()
            .with_context(|| format!("Failed to run cargo test for '{label}'"))?;

        if !status.success() {
            anyhow::bail!("Feature combination '{label}' failed");
        }

        println!("✅ Features '{label}' passed");
    }

    println!("\n✅ All {} feature combinations pass!", FEATURE_COMBINATIONS.len());

    Ok(())
}
