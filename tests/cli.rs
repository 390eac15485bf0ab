use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use job_harvest::sqlite_store::SqliteStore;
use job_harvest_core::models::{ItemRecord, TableName};
use job_harvest_core::store::RecordStore;

fn jh_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("jh");
    path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    setup_with_extra("")
}

fn setup_with_extra(extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/jobs.db"

[browser]
headless = true
cookie_file = "{}/cookies.json"
{}"#,
        root.display(),
        root.display(),
        extra
    );

    let config_path = config_dir.join("jh.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn db_path(tmp: &TempDir) -> PathBuf {
    tmp.path().join("data").join("jobs.db")
}

fn run_jh(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = jh_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run jh binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

/// Seed `table` with `records` through the library store.
async fn seed(tmp: &TempDir, table: &str, records: &[ItemRecord]) {
    let store = SqliteStore::open(&db_path(tmp)).await.unwrap();
    let table = TableName::parse(table).unwrap();
    store.ensure_table(&table).await.unwrap();
    for r in records {
        store.upsert_ignore(&table, r).await.unwrap();
    }
    store.close().await;
}

fn posting(id: &str, title: &str, body: &str) -> ItemRecord {
    ItemRecord::new(id, format!("https://www.linkedin.com/jobs/view/{}", id))
        .with_title(title)
        .with_attributor("Acme")
        .with_body(body)
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_jh(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(db_path(&tmp).exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_jh(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_jh(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_missing_config_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, success) = run_jh(&tmp.path().join("nope.toml"), &["list"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr={}", stderr);
}

#[test]
fn test_invalid_config_rejected() {
    let (_tmp, config_path) = setup_with_extra("\n[search]\ntarget_count = 0\n");
    let (_, stderr, success) = run_jh(&config_path, &["list"]);
    assert!(!success);
    assert!(stderr.contains("search.target_count"), "stderr={}", stderr);
}

#[test]
fn test_invalid_recency_rejected() {
    let (_tmp, config_path) = setup_with_extra("\n[search]\nrecency = \"last decade\"\n");
    let (_, stderr, success) = run_jh(&config_path, &["list"]);
    assert!(!success);
    assert!(stderr.contains("search.recency"), "stderr={}", stderr);
}

#[test]
fn test_list_empty_database() {
    let (_tmp, config_path) = setup_test_env();
    run_jh(&config_path, &["init"]);

    let (stdout, stderr, success) = run_jh(&config_path, &["list"]);
    assert!(success, "list failed: stderr={}", stderr);
    assert_eq!(stdout.trim(), "Tables in the database:");
}

#[tokio::test]
async fn test_list_shows_seeded_tables() {
    let (tmp, config_path) = setup_test_env();
    seed(&tmp, "linkedin_jobs_rust_remote", &[posting("1", "Rust Dev", "Write Rust.")]).await;
    seed(&tmp, "linkedin_jobs_go_berlin", &[]).await;

    let (stdout, stderr, success) = run_jh(&config_path, &["list"]);
    assert!(success, "list failed: stderr={}", stderr);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(
        lines,
        vec![
            "Tables in the database:",
            "- linkedin_jobs_go_berlin",
            "- linkedin_jobs_rust_remote",
        ]
    );
}

#[tokio::test]
async fn test_query_truncates_description_and_limits_rows() {
    let (tmp, config_path) = setup_test_env();
    let long = "d".repeat(120);
    seed(
        &tmp,
        "linkedin_jobs_pm_us",
        &[
            posting("10", "PM", &long),
            posting("11", "Senior PM", "Short."),
            posting("12", "Staff PM", "Also short."),
        ],
    )
    .await;

    let (stdout, stderr, success) =
        run_jh(&config_path, &["query", "linkedin_jobs_pm_us", "2"]);
    assert!(success, "query failed: stderr={}", stderr);
    assert!(stdout.contains("job_description"));
    assert!(stdout.contains(&format!("{}...", "d".repeat(80))));
    assert!(!stdout.contains(&"d".repeat(81)));
    assert!(stdout.contains("Senior PM"));
    assert!(!stdout.contains("Staff PM"), "limit not applied: {}", stdout);
    assert!(stdout.starts_with('╒'));
}

#[test]
fn test_query_missing_table_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_jh(&config_path, &["init"]);

    let (_, stderr, success) = run_jh(&config_path, &["query", "linkedin_jobs_nothing_here"]);
    assert!(!success);
    assert!(stderr.contains("table not found: linkedin_jobs_nothing_here"), "stderr={}", stderr);
}

#[tokio::test]
async fn test_purge_drops_table() {
    let (tmp, config_path) = setup_test_env();
    seed(&tmp, "linkedin_jobs_old", &[posting("1", "Old", "Gone soon.")]).await;

    let (stdout, stderr, success) = run_jh(&config_path, &["purge", "linkedin_jobs_old"]);
    assert!(success, "purge failed: stderr={}", stderr);
    assert!(stdout.contains("Table 'linkedin_jobs_old' has been purged."));

    let (stdout, _, _) = run_jh(&config_path, &["list"]);
    assert!(!stdout.contains("linkedin_jobs_old"));
}

#[test]
fn test_purge_missing_table_succeeds() {
    let (_tmp, config_path) = setup_test_env();
    run_jh(&config_path, &["init"]);

    let (stdout, stderr, success) = run_jh(&config_path, &["purge", "linkedin_jobs_never"]);
    assert!(success, "purge of a missing table failed: stderr={}", stderr);
    assert!(stdout.contains("has been purged"));
}

#[tokio::test]
async fn test_export_csv_to_file() {
    let (tmp, config_path) = setup_test_env();
    seed(
        &tmp,
        "linkedin_jobs_csv",
        &[posting("7", "Engineer, Platform", "Line one\nLine two")],
    )
    .await;
    let out = tmp.path().join("out.csv");

    let (_, stderr, success) = run_jh(
        &config_path,
        &["export", "linkedin_jobs_csv", "--out", out.to_str().unwrap()],
    );
    assert!(success, "export failed: stderr={}", stderr);

    let mut reader = csv::Reader::from_path(&out).unwrap();
    let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
    assert_eq!(
        headers,
        vec![
            "job_id",
            "url",
            "job_title",
            "company_name",
            "job_description",
            "scraped_date",
            "scraped_timestamp"
        ]
    );
    let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), 1);
    assert_eq!(&rows[0][0], "7");
    assert_eq!(&rows[0][2], "Engineer, Platform");
    assert_eq!(&rows[0][4], "Line one\nLine two");
}

#[tokio::test]
async fn test_export_json_to_stdout() {
    let (tmp, config_path) = setup_test_env();
    seed(
        &tmp,
        "linkedin_jobs_json",
        &[posting("1", "A", "a"), posting("2", "B", "b")],
    )
    .await;

    let (stdout, stderr, success) =
        run_jh(&config_path, &["export", "linkedin_jobs_json", "--format", "json"]);
    assert!(success, "export failed: stderr={}", stderr);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let rows = parsed.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["job_id"], "1");
    assert_eq!(rows[1]["job_title"], "B");
    assert_eq!(rows[0]["company_name"], "Acme");
}

#[tokio::test]
async fn test_duplicate_keys_are_stored_once() {
    let (tmp, config_path) = setup_test_env();
    seed(
        &tmp,
        "linkedin_jobs_dupes",
        &[
            posting("5", "First", "first body"),
            posting("5", "Second", "second body"),
        ],
    )
    .await;

    let (stdout, _, success) =
        run_jh(&config_path, &["export", "linkedin_jobs_dupes", "--format", "json"]);
    assert!(success);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let rows = parsed.as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["job_title"], "First");
}

#[test]
fn test_apply_requires_urls() {
    let (_tmp, config_path) = setup_test_env();
    let (_, _, success) = run_jh(&config_path, &["apply"]);
    assert!(!success);
}

#[test]
fn test_apply_without_resume_fails_before_launching() {
    let (_tmp, config_path) =
        setup_with_extra("\n[apply]\nresume_path = \"/nonexistent/jh/resume.pdf\"\n");
    let (_, stderr, success) =
        run_jh(&config_path, &["apply", "https://www.linkedin.com/jobs/view/1"]);
    assert!(!success);
    assert!(stderr.contains("Resume file not found"), "stderr={}", stderr);
}
