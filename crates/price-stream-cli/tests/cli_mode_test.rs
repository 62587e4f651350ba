/*
[INPUT]:  Built price-stream binary + sample YAML configs
[OUTPUT]: Exit status checks for config validation paths
[POS]:    Integration test layer - binary entry point
[UPDATE]: When changing CLI flags or startup validation
*/

use std::process::Command;

fn sample_config_path() -> String {
    format!("{}/examples/watchlist.yaml", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn cli_mode_with_config_and_dry_run_works() {
    let binary_path = env!("CARGO_BIN_EXE_price-stream");

    let output = Command::new(binary_path)
        .arg("--config")
        .arg(sample_config_path())
        .arg("--symbol")
        .arg("nvda")
        .arg("--dry-run")
        .arg("--log-level")
        .arg("error")
        .output()
        .expect("Failed to start price-stream binary");

    assert!(
        output.status.success(),
        "Process exited with non-zero status: {}\nStdout: {}\nStderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn cli_mode_rejects_missing_config() {
    let binary_path = env!("CARGO_BIN_EXE_price-stream");
    let missing = format!("{}/examples/does-not-exist.yaml", env!("CARGO_MANIFEST_DIR"));

    let output = Command::new(binary_path)
        .arg("--config")
        .arg(missing)
        .arg("--dry-run")
        .output()
        .expect("Failed to start price-stream binary");

    assert!(!output.status.success());
}

#[test]
fn cli_mode_rejects_empty_url_override() {
    let binary_path = env!("CARGO_BIN_EXE_price-stream");

    let output = Command::new(binary_path)
        .arg("--config")
        .arg(sample_config_path())
        .arg("--url")
        .arg("  ")
        .arg("--dry-run")
        .output()
        .expect("Failed to start price-stream binary");

    assert!(!output.status.success());
}

#[test]
fn cli_mode_rejects_non_websocket_url_override() {
    let binary_path = env!("CARGO_BIN_EXE_price-stream");

    let output = Command::new(binary_path)
        .arg("--config")
        .arg(sample_config_path())
        .arg("--url")
        .arg("https://prices.example.com/ws")
        .arg("--dry-run")
        .output()
        .expect("Failed to start price-stream binary");

    assert!(!output.status.success());
}
