use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn kb_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("kb");
    path
}

/// Config that needs no external service: in-memory index, providers off.
fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("nested")).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Alpha\n\nAlpha is the first document. It talks about Rust.\n\nCargo builds crates.",
    )
    .unwrap();
    fs::write(
        files_dir.join("nested").join("gamma.txt"),
        "Gamma notes about deployment.",
    )
    .unwrap();
    fs::write(files_dir.join("image.png"), [0x89, b'P', b'N', b'G']).unwrap();

    let config_content = r#"[chunking]
chunk_size = 40
overlap = 5
boundary_window = 20

[embedding]
provider = "disabled"

[generation]
provider = "disabled"

[index]
backend = "memory"

[logging]
filter = "warn"
"#;

    let config_path = config_dir.join("kb.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_kb(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = kb_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run kb binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_help_lists_commands() {
    let output = Command::new(kb_binary()).arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["serve", "ingest", "ask", "delete", "clear", "stats", "chunk"] {
        assert!(stdout.contains(command), "missing {} in help:\n{}", command, stdout);
    }
}

#[test]
fn test_chunk_previews_offline() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("files").join("alpha.md");

    let (stdout, stderr, success) = run_kb(&config_path, &["chunk", file.to_str().unwrap()]);
    assert!(success, "chunk failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("--- chunk 0 [0.."));
    assert!(stdout.contains("--- chunk 1 ["));
    assert!(stdout.contains("Cargo builds crates."));
}

#[test]
fn test_chunk_rejects_unsupported_file() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("files").join("image.png");

    let (_, stderr, success) = run_kb(&config_path, &["chunk", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported content"), "stderr={}", stderr);
}

#[test]
fn test_stats_on_fresh_memory_index() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_kb(&config_path, &["stats"]);
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Index:      memory"));
    assert!(stdout.contains("Documents:  0"));
    assert!(stdout.contains("Vectors:    0"));
}

#[test]
fn test_ingest_with_embedding_disabled_fails_per_file() {
    let (tmp, config_path) = setup_test_env();
    let files = tmp.path().join("files");

    let (stdout, stderr, success) = run_kb(&config_path, &["ingest", files.to_str().unwrap()]);
    assert!(!success);
    // image.png is skipped by the directory walk
    assert!(stdout.contains("0 ingested, 2 failed."), "stdout={}", stdout);
    assert!(stderr.contains("alpha.md"));
    assert!(stderr.contains("gamma.txt"));
    assert!(!stderr.contains("image.png"));
}

#[test]
fn test_ask_reports_unavailable_generator() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kb(&config_path, &["ask", "What is Rust?"]);
    assert!(!success);
    assert!(stderr.contains("generation"), "stderr={}", stderr);
}

#[test]
fn test_delete_unknown_document() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_kb(&config_path, &["delete", "missing-id"]);
    assert!(!success);
    assert!(stderr.contains("document not found: missing-id"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("bad.toml");
    fs::write(&config_path, "[chunking]\nchunk_size = 0\n").unwrap();

    let (_, stderr, success) = run_kb(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("chunking.chunk_size must be > 0"));
}

#[test]
fn test_missing_explicit_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("absent.toml");

    let (_, stderr, success) = run_kb(&config_path, &["stats"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}
