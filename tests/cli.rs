use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn ainsights_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("ainsights");
    path
}

const SALES_CSV: &str = "\
Date,Region,Product,Sales,Profit
2024-01-01,North,Widget,1200,300
2024-01-02,South,Gadget,800,-50
2024-01-03,North,Gadget,\"1,000\",120
2024-01-04,West,Widget,650,80
2024-01-05,North,Widget,2100,410
";

fn write_config(root: &Path, dims: usize) -> PathBuf {
    // Port 9 (discard) refuses connections, so generation fails fast.
    let config_content = format!(
        r#"[index]
path = "{root}/data/index.json"

[chunking]
max_chars = 500
overlap_chars = 50

[embedding]
provider = "hash"
dims = {dims}

[retrieval]
top_k = 5
context_budget_chars = 4000

[generation]
backend = "local"
url = "http://127.0.0.1:9"
timeout_secs = 2
max_retries = 0
backoff_ms = 10

[connectors.filesystem]
root = "{root}/files"
include_globs = ["**/*.md", "**/*.txt"]
"#,
        root = root.display(),
        dims = dims
    );
    let config_path = root.join("config").join("ainsights.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.md"),
        "# Q3 Review\n\nNorth region revenue grew on strong Widget demand.\n\nMargins held steady and crates shipped on time.",
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Logistics\n\nWest region shipping delays hurt Gadget sales.\n\nA new carrier starts in October.",
    )
    .unwrap();
    fs::write(
        files_dir.join("pricing.txt"),
        "Pricing memo.\n\nWidget list prices rise five percent in November.\n\nGadget discounts end after the holiday quarter.",
    )
    .unwrap();
    fs::write(files_dir.join("empty.md"), "").unwrap();
    fs::write(root.join("sales.csv"), SALES_CSV).unwrap();

    let config_path = write_config(&root, 256);
    (tmp, config_path)
}

fn run_ainsights(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = ainsights_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run ainsights binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn segment_count(info_stdout: &str) -> usize {
    info_stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("Segments:"))
        .map(|v| v.trim().parse().unwrap())
        .expect("info output has a Segments line")
}

#[test]
fn test_ingest_reports_per_document_failures() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_ainsights(&config_path, &["ingest", "--progress", "off"]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents found: 4"));
    assert!(stdout.contains("documents ingested: 3"));
    assert!(stdout.contains("documents failed: 1"));
    assert!(stdout.contains("empty.md"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_reingest_does_not_duplicate() {
    let (_tmp, config_path) = setup_test_env();

    run_ainsights(&config_path, &["ingest", "--progress", "off"]);
    let (first, _, _) = run_ainsights(&config_path, &["info"]);
    run_ainsights(&config_path, &["ingest", "--progress", "off"]);
    let (second, _, _) = run_ainsights(&config_path, &["info"]);

    assert!(segment_count(&first) >= 3);
    assert_eq!(segment_count(&first), segment_count(&second));
    assert!(second.contains("Documents:   3"));
}

#[test]
fn test_ingest_explicit_directory() {
    let (tmp, config_path) = setup_test_env();
    let extra = tmp.path().join("extra");
    fs::create_dir_all(&extra).unwrap();
    fs::write(extra.join("notes.md"), "Board notes about the South region.").unwrap();

    let (stdout, stderr, success) = run_ainsights(
        &config_path,
        &["ingest", "--progress", "off", extra.to_str().unwrap()],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents ingested: 1"));

    let (info, _, _) = run_ainsights(&config_path, &["info"]);
    assert!(info.contains("notes.md"));
}

#[test]
fn test_unreadable_path_does_not_abort_the_batch() {
    let (tmp, config_path) = setup_test_env();
    let loose = tmp.path().join("loose");
    fs::create_dir_all(&loose).unwrap();
    fs::write(loose.join("good.md"), "South region orders doubled in May.").unwrap();
    fs::write(loose.join("other.md"), "Gadget returns fell after the recall.").unwrap();
    let good = loose.join("good.md");
    let missing = loose.join("missing.md");
    let other = loose.join("other.md");

    let (stdout, stderr, success) = run_ainsights(
        &config_path,
        &[
            "ingest",
            "--progress",
            "off",
            good.to_str().unwrap(),
            missing.to_str().unwrap(),
            other.to_str().unwrap(),
        ],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents found: 3"));
    assert!(stdout.contains("documents ingested: 2"));
    assert!(stdout.contains("documents failed: 1"));
    assert!(stdout.contains("missing.md"));

    let (info, _, _) = run_ainsights(&config_path, &["info"]);
    assert!(info.contains("Documents:   2"));
}

#[test]
fn test_explicit_file_under_root_keeps_its_scanned_id() {
    let (tmp, config_path) = setup_test_env();
    run_ainsights(&config_path, &["ingest", "--progress", "off"]);
    let (first, _, _) = run_ainsights(&config_path, &["info"]);

    let alpha = tmp.path().join("files").join("alpha.md");
    let (stdout, stderr, success) = run_ainsights(
        &config_path,
        &["ingest", "--progress", "off", alpha.to_str().unwrap()],
    );
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents ingested: 1"));

    let (second, _, _) = run_ainsights(&config_path, &["info"]);
    assert!(second.contains("Documents:   3"));
    assert_eq!(segment_count(&first), segment_count(&second));
}

#[test]
fn test_search_ranks_matching_document_first() {
    let (_tmp, config_path) = setup_test_env();
    run_ainsights(&config_path, &["ingest", "--progress", "off"]);

    let (stdout, stderr, success) = run_ainsights(
        &config_path,
        &["search", "Widget list prices rise five percent in November", "--k", "2"],
    );
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("1. ["), "unexpected output: {}", stdout);
    assert!(first.contains("pricing.txt"), "unexpected first hit: {}", first);
    assert!(!stdout.contains("3. ["));
}

#[test]
fn test_search_without_index_fails() {
    let (_tmp, config_path) = setup_test_env();
    let (_, stderr, success) = run_ainsights(&config_path, &["search", "anything"]);
    assert!(!success);
    assert!(stderr.contains("ainsights ingest"));
}

#[test]
fn test_remove_document() {
    let (_tmp, config_path) = setup_test_env();
    run_ainsights(&config_path, &["ingest", "--progress", "off"]);

    let (stdout, stderr, success) = run_ainsights(&config_path, &["remove", "beta.md"]);
    assert!(success, "remove failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("removed beta.md"));

    let (info, _, _) = run_ainsights(&config_path, &["info"]);
    assert!(!info.contains("beta.md"));
    assert!(info.contains("Documents:   2"));

    let (_, _, again) = run_ainsights(&config_path, &["remove", "beta.md"]);
    assert!(!again, "removing a missing document should fail");
}

#[test]
fn test_ask_when_generator_unreachable_is_unavailable_not_a_crash() {
    let (_tmp, config_path) = setup_test_env();
    run_ainsights(&config_path, &["ingest", "--progress", "off"]);
    run_ainsights(&config_path, &["remove", "pricing.txt"]);

    let (stdout, stderr, success) = run_ainsights(
        &config_path,
        &["ask", "Why did West sales drop?", "--json"],
    );
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);

    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(response["status"], "unavailable");
    assert!(response["answer"]
        .as_str()
        .unwrap()
        .starts_with("Answer unavailable"));
    let citations: Vec<&str> = response["citations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|c| c.as_str().unwrap())
        .collect();
    assert!(citations.contains(&"beta.md"));
    assert!(!citations.contains(&"pricing.txt"));
    assert_eq!(response["latency"]["attempts"], 1);
}

#[test]
fn test_ask_with_dataset_filters() {
    let (tmp, config_path) = setup_test_env();
    let dataset = tmp.path().join("sales.csv");

    let (stdout, stderr, success) = run_ainsights(
        &config_path,
        &[
            "ask",
            "How is North doing?",
            "--dataset",
            dataset.to_str().unwrap(),
            "--filter",
            "Region=North",
            "--json",
        ],
    );
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(response["context_chars"].as_u64().unwrap() > 0);
    assert_eq!(response["citations"].as_array().unwrap().len(), 0);
}

#[test]
fn test_stats_runs_without_config() {
    let (tmp, _) = setup_test_env();
    let dataset = tmp.path().join("sales.csv");
    let missing = tmp.path().join("no-such-config.toml");

    let (stdout, stderr, success) = run_ainsights(
        &missing,
        &[
            "stats",
            "--dataset",
            dataset.to_str().unwrap(),
            "--filter",
            "Region=North",
        ],
    );
    assert!(success, "stats failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Rows: 3"));
    assert!(stdout.contains("Filters: Region = North"));
    assert!(stdout.contains("Sales: Total=4,300, Average=1,433"));
}

#[test]
fn test_stats_rejects_unknown_filter_column() {
    let (tmp, config_path) = setup_test_env();
    let dataset = tmp.path().join("sales.csv");
    let (_, _, success) = run_ainsights(
        &config_path,
        &["stats", "--dataset", dataset.to_str().unwrap(), "--filter", "Country=US"],
    );
    assert!(!success);
}

#[test]
fn test_dimension_change_requires_rebuild() {
    let (tmp, config_path) = setup_test_env();
    run_ainsights(&config_path, &["ingest", "--progress", "off"]);
    let (before, _, _) = run_ainsights(&config_path, &["info"]);

    write_config(tmp.path(), 128);

    let (_, stderr, success) = run_ainsights(&config_path, &["search", "West shipping"]);
    assert!(!success, "search against a stale index should fail");
    assert!(stderr.contains("rebuild"), "stderr: {}", stderr);

    // Questions still get an answer path, just without documents.
    let (stdout, stderr, success) =
        run_ainsights(&config_path, &["ask", "West shipping?", "--json"]);
    assert!(success, "ask failed: stdout={}, stderr={}", stdout, stderr);
    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(response["degraded"]
        .as_str()
        .unwrap()
        .contains("dimension mismatch"));

    let (stdout, stderr, success) = run_ainsights(&config_path, &["rebuild"]);
    assert!(success, "rebuild failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("dims: 256 -> 128"));

    let (after, _, _) = run_ainsights(&config_path, &["info"]);
    assert_eq!(segment_count(&before), segment_count(&after));

    let (_, stderr, success) = run_ainsights(&config_path, &["search", "West shipping"]);
    assert!(success, "search after rebuild failed: {}", stderr);
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    fs::write(
        &config_path,
        "[chunking]\nmax_chars = 100\noverlap_chars = 200\n",
    )
    .unwrap();
    let (_, stderr, success) = run_ainsights(&config_path, &["info"]);
    assert!(!success);
    assert!(stderr.contains("overlap_chars"));
}
