use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn trag_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("trag");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    let dataset = data_dir.join("dataset_acme");
    fs::create_dir_all(&dataset).unwrap();
    fs::write(
        dataset.join("admissions.md"),
        "# Admissions\n\nApplications for the engineering programme close in June.",
    )
    .unwrap();
    fs::write(
        dataset.join("hostel.txt"),
        "Hostel rooms are shared by two students. Mess timings are posted weekly.",
    )
    .unwrap();
    fs::write(
        dataset.join("courses.csv"),
        "Course,Seats\nMechanical,60\nCivil,45\n",
    )
    .unwrap();
    fs::write(dataset.join("logo.png"), [0u8; 16]).unwrap();

    let config_content = format!(
        r#"[storage]
dataset_prefix = "{root}/data/dataset_"
index_prefix = "{root}/data/index_"
staging_prefix = "{root}/data/staging_"

[chunking]
chunk_size = 1024
chunk_overlap = 200

[retrieval]
top_k = 5

[labeling]
provider = "disabled"

[embedding]
provider = "disabled"

[completion]
provider = "disabled"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("trag.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_trag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = trag_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run trag binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn test_ingest_dataset() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_trag(&config_path, &["ingest", "acme"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files scanned: 3"));
    assert!(stdout.contains("ingested: 3"));
}

#[test]
fn test_ingest_idempotent_no_duplicates() {
    let (_tmp, config_path) = setup_test_env();

    run_trag(&config_path, &["ingest", "acme"]);
    let (stdout, _, success) = run_trag(&config_path, &["ingest", "acme"]);
    assert!(success);
    assert!(stdout.contains("ingested: 0"));
    assert!(stdout.contains("unchanged: 3"));

    let (stats, _, _) = run_trag(&config_path, &["stats", "acme", "--json"]);
    let stats: serde_json::Value = serde_json::from_str(&stats).unwrap();
    assert_eq!(stats["documents"], 3);
}

#[test]
fn test_search_bulk_loads_on_first_use() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_trag(&config_path, &["search", "acme", "hostel"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("hostel.txt"));
    assert!(!stdout.contains("admissions.md"));
}

#[test]
fn test_search_no_results() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_trag(&config_path, &["search", "acme", "zyxwvut"]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_empty_query() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, _, success) = run_trag(&config_path, &["search", "acme", "   "]);
    assert!(success);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_unknown_tenant_has_no_dataset() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_trag(&config_path, &["search", "globex", "hostel"]);
    assert!(!success);
    assert!(stderr.contains("Directory not found"));
}

#[test]
fn test_invalid_tenant_id() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_trag(&config_path, &["ingest", "../acme"]);
    assert!(!success);
    assert!(stderr.contains("Invalid tenant id"));
}

#[test]
fn test_ingest_foreign_dataset_rejected() {
    let (tmp, config_path) = setup_test_env();
    let foreign = tmp.path().join("data").join("dataset_acme");

    let (_, stderr, success) = run_trag(
        &config_path,
        &["ingest", "globex", "--dir", foreign.to_str().unwrap()],
    );
    assert!(!success);
    assert!(stderr.contains("belongs to tenant acme"));
}

#[test]
fn test_faq_then_search() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_trag(
        &config_path,
        &["faq", "acme", "Is there a shuttle?", "Yes, every hour from gate 2."],
    );
    assert!(success, "faq failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("ingested: 1"));

    let (stdout, _, _) = run_trag(&config_path, &["search", "acme", "shuttle"]);
    assert!(stdout.contains("faq_"));
}

#[test]
fn test_upload_and_finalize() {
    let (tmp, config_path) = setup_test_env();
    let upload = tmp.path().join("fees.txt");
    fs::write(&upload, "Semester fees are payable online.").unwrap();

    let (stdout, stderr, success) =
        run_trag(&config_path, &["upload", "acme", upload.to_str().unwrap()]);
    assert!(success, "upload failed: stdout={}, stderr={}", stdout, stderr);
    assert!(tmp.path().join("data/staging_acme/fees.txt").exists());

    let (stdout, _, success) = run_trag(&config_path, &["finalize", "acme"]);
    assert!(success);
    assert!(stdout.contains("moved fees.txt"));
    assert!(tmp.path().join("data/dataset_acme/fees.txt").exists());
    assert!(!tmp.path().join("data/staging_acme").exists());
}

#[test]
fn test_finalize_without_uploads_errors() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_trag(&config_path, &["finalize", "acme"]);
    assert!(!success);
    assert!(stderr.contains("No staged uploads"));
}

#[test]
fn test_ask_errors_when_completion_disabled() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_trag(&config_path, &["ask", "acme", "When do applications close?"]);
    assert!(!success);
    assert!(stderr.contains("Completion provider is disabled"));
}

#[test]
fn test_embed_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_trag(&config_path, &["embed", "acme"]);
    assert!(!success);
    assert!(stderr.contains("Embeddings are disabled"));
}

#[test]
fn test_relabel_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_trag(&config_path, &["relabel", "acme"]);
    assert!(!success);
    assert!(stderr.contains("Labeling is disabled"));
}

#[test]
fn test_invalid_config_rejected() {
    let (tmp, _) = setup_test_env();
    let bad = tmp.path().join("config").join("bad.toml");
    fs::write(&bad, "[chunking]\nchunk_size = 100\nchunk_overlap = 100\n").unwrap();

    let (_, stderr, success) = run_trag(&bad, &["stats", "acme"]);
    assert!(!success);
    assert!(stderr.contains("chunk_overlap"));
}
