use std::process::Command;

use anyhow::{Context, Result};

/// `vigil-common` feature tiers; `runtime` implies `foundation`.
const FEATURE_COMBINATIONS: &[&[&str]] = &[
    &[], // no tiers
    &["foundation"],
    &["runtime"],
    &["foundation", "runtime"],
];

/// Check that every `vigil-common` tier compiles on its own and that its
/// tests pass.
pub fn test_feature_matrix() -> Result<()> {
    println!("Testing {} vigil-common feature combinations...", FEATURE_COMBINATIONS.len());

    for (index, features) in FEATURE_COMBINATIONS.iter().enumerate() {
        let joined = features.join(",");
        let display_label = if features.is_empty() { "none".to_string() } else { joined.clone() };

        println!(
            "\n[{}/{}] cargo test -p vigil-common --no-default-features{}",
            index + 1,
            FEATURE_COMBINATIONS.len(),
            if features.is_empty() { String::new() } else { format!(" --features {joined}") }
        );

        let mut command = Command::new("cargo");
        command.args(["test", "-p", "vigil-common", "--no-default-features"]);
        if !features.is_empty() {
            command.arg("--features").arg(&joined);
        }

        let status = command
            .status()
            .with_context(|| format!("Failed to run cargo test for '{display_label}'"))?;

        if !status.success() {
            anyhow::bail!("Feature combination '{display_label}' failed");
        }

        println!("✅ Features '{display_label}' passed");
    }

    println!("\n✅ All {} feature combinations pass!", FEATURE_COMBINATIONS.len());

    Ok(())
}
