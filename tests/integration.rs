use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn tlsh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tlsh");
    path
}

/// Tempdir with a config pointing the store into the tempdir and the API at
/// a port nothing listens on (so remote calls fail fast, without a network).
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[store]
path = "{}/data/raw.sqlite"

[api]
base_url = "http://127.0.0.1:1"
timeout_secs = 2
max_attempts = 1
"#,
        root.display()
    );

    let config_path = config_dir.join("tlsh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_tlsh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tlsh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tlsh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_init_creates_store() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_tlsh(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/raw.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_tlsh(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_tlsh(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_unreachable_store_is_fatal() {
    let tmp = TempDir::new().unwrap();

    // A plain file where the store's parent directory should go makes the
    // store path impossible to create.
    fs::write(tmp.path().join("blocker"), "").unwrap();

    let config_path = tmp.path().join("tlsh.toml");
    fs::write(
        &config_path,
        format!(
            r#"[store]
path = "{}/blocker/raw.sqlite"
"#,
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_tlsh(&config_path, &["info", "--wait-between", "0"]);
    assert!(!success, "expected startup failure");
    assert!(
        stderr.contains("document store") || stderr.contains("Failed to create"),
        "unexpected stderr: {}",
        stderr
    );
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("tlsh.toml");
    fs::write(&config_path, "[api]\ntimeout_secs = 0\n").unwrap();

    let (_, stderr, success) = run_tlsh(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("timeout_secs"), "unexpected stderr: {}", stderr);
}

#[test]
fn test_single_shape_failure_exits_nonzero() {
    let (_tmp, config_path) = setup_test_env();

    run_tlsh(&config_path, &["init"]);
    let (_, stderr, success) = run_tlsh(
        &config_path,
        &["analyze", "example.com", "--wait-between", "0"],
    );
    assert!(!success, "expected terminal fetch error");
    assert!(stderr.contains("attempts"), "unexpected stderr: {}", stderr);
}

#[test]
fn test_batch_continues_past_failing_hosts() {
    let (tmp, config_path) = setup_test_env();

    run_tlsh(&config_path, &["init"]);

    let hosts = tmp.path().join("hosts.txt");
    fs::write(&hosts, "a.example\nb.example\n").unwrap();

    let (stdout, stderr, success) = run_tlsh(
        &config_path,
        &["batch", hosts.to_str().unwrap(), "--wait-between", "0"],
    );

    // Per-host failures are swallowed; the batch itself succeeds.
    assert!(success, "batch aborted: stdout={}, stderr={}", stdout, stderr);
    assert!(stderr.contains("a.example"));
    assert!(stderr.contains("b.example"));
    assert!(stdout.contains("batch done: 2 hosts, 2 failed"));
}
