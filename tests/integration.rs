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

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("guide.md"),
        "# Installation\n\nInstallation steps: unpack the unit, mount it, connect power.\n\nMaintenance is covered elsewhere.",
    )
    .unwrap();
    fs::write(
        files_dir.join("recipes.txt"),
        "Bread recipe.\n\nMix flour and water, knead, bake.",
    )
    .unwrap();
    fs::write(files_dir.join("empty.txt"), "").unwrap();
    fs::write(files_dir.join("image.png"), "png bytes").unwrap();

    let config_content = format!(
        r#"[data]
dir = "{}/data"

[embedding]
provider = "hashing"
dims = 512

[index]
backend = "sqlite"

[retrieval]
top_k = 3
"#,
        root.display()
    );

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
    (stdout, stderr, output.status.success())
}

fn file_arg(config_path: &Path, name: &str) -> String {
    let root = config_path.parent().unwrap().parent().unwrap();
    root.join("files").join(name).to_string_lossy().to_string()
}

#[test]
fn test_collections_lifecycle() {
    let (_tmp, config) = setup_test_env();

    let (stdout, _, ok) = run_kb(&config, &["collections", "list"]);
    assert!(ok);
    assert!(stdout.contains("General"));

    let (stdout, _, ok) = run_kb(&config, &["collections", "create", "Manuals"]);
    assert!(ok);
    let id = stdout.split('\t').next().unwrap().trim().to_string();
    assert!(!id.is_empty());

    let (_, _, ok) = run_kb(&config, &["collections", "rename", &id, "Handbooks"]);
    assert!(ok);
    let (stdout, _, _) = run_kb(&config, &["collections", "list"]);
    assert!(stdout.contains("Handbooks"));
    assert!(!stdout.contains("Manuals"));

    // Lookup by name works as well as by id.
    let (_, _, ok) = run_kb(&config, &["collections", "delete", "Handbooks"]);
    assert!(ok);
    let (stdout, _, _) = run_kb(&config, &["collections", "list"]);
    assert!(!stdout.contains("Handbooks"));

    let (_, stderr, ok) = run_kb(&config, &["collections", "delete", "Nope"]);
    assert!(!ok);
    assert!(stderr.contains("Unknown collection"));
}

#[test]
fn test_add_query_prompt_delete() {
    let (_tmp, config) = setup_test_env();
    run_kb(&config, &["collections", "create", "Manuals"]);

    let guide = file_arg(&config, "guide.md");
    let (stdout, stderr, ok) = run_kb(
        &config,
        &["add", &guide, "--collection", "Manuals", "--progress", "json"],
    );
    assert!(ok, "add failed: {}", stderr);
    assert!(stdout.contains("guide.md"));
    assert!(stdout.contains("Manuals"));
    let statuses: Vec<String> = stderr
        .lines()
        .filter_map(|l| serde_json::from_str::<serde_json::Value>(l).ok())
        .filter_map(|v| v["status"].as_str().map(str::to_string))
        .collect();
    assert_eq!(statuses.first().map(String::as_str), Some("PENDING"));
    assert_eq!(statuses.last().map(String::as_str), Some("READY"));
    assert!(statuses.iter().any(|s| s == "INDEXING"));

    let recipes = file_arg(&config, "recipes.txt");
    let (_, stderr, ok) = run_kb(&config, &["add", &recipes, "--progress", "off"]);
    assert!(ok, "add failed: {}", stderr);

    let (stdout, _, ok) = run_kb(
        &config,
        &["query", "installation steps", "--collection", "Manuals", "--json"],
    );
    assert!(ok);
    let results: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert!(!results.is_empty() && results.len() <= 3);
    assert!(results.iter().all(|r| r["file_name"] == "guide.md"));

    let (stdout, _, ok) = run_kb(
        &config,
        &["prompt", "How do I install it?", "--collection", "Manuals"],
    );
    assert!(ok);
    assert!(stdout.contains("--- guide.md ---"));
    assert!(stdout.contains("Question: How do I install it?"));

    let (stdout, _, _) = run_kb(&config, &["docs", "list"]);
    assert!(stdout.contains("guide.md"));
    assert!(stdout.contains("recipes.txt"));

    let (_, _, ok) = run_kb(&config, &["delete", "guide.md"]);
    assert!(ok);
    let (stdout, _, _) = run_kb(&config, &["docs", "list", "--collection", "Manuals"]);
    assert!(!stdout.contains("guide.md"));

    let (stdout, _, ok) = run_kb(
        &config,
        &["query", "installation steps", "--collection", "Manuals", "--json"],
    );
    assert!(ok);
    let results: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert!(results.is_empty());

    let (_, stderr, ok) = run_kb(&config, &["delete", "guide.md"]);
    assert!(!ok);
    assert!(stderr.contains("No document"));
}

#[test]
fn test_add_rejections_and_failures() {
    let (_tmp, config) = setup_test_env();

    let png = file_arg(&config, "image.png");
    let (_, stderr, ok) = run_kb(&config, &["add", &png]);
    assert!(!ok);
    assert!(stderr.contains("unsupported file format"));

    let empty = file_arg(&config, "empty.txt");
    let (_, stderr, ok) = run_kb(&config, &["add", &empty, "--progress", "off"]);
    assert!(!ok);
    assert!(stderr.contains("no text segments"));

    let guide = file_arg(&config, "guide.md");
    let (_, _, ok) = run_kb(&config, &["add", &guide, "--progress", "off"]);
    assert!(ok);
    let (_, stderr, ok) = run_kb(&config, &["add", &guide, "--progress", "off"]);
    assert!(!ok);
    assert!(stderr.contains("already exists"));

    let (_, stderr, ok) = run_kb(&config, &["add", "/definitely/not/here.txt"]);
    assert!(!ok);
    assert!(stderr.contains("File not found"));
}

#[test]
fn test_status_and_persistence() {
    let (_tmp, config) = setup_test_env();
    let guide = file_arg(&config, "guide.md");
    let empty = file_arg(&config, "empty.txt");
    run_kb(&config, &["add", &guide, "--progress", "off"]);
    run_kb(&config, &["add", &empty, "--progress", "off"]);

    // Only READY documents survive into the next process.
    let (stdout, _, ok) = run_kb(&config, &["status"]);
    assert!(ok);
    assert!(stdout.contains("documents:   1"));
    assert!(stdout.contains("ready:       1"));
    assert!(stdout.contains("hashing (available)"));

    let (stdout, _, _) = run_kb(&config, &["docs", "list"]);
    assert!(stdout.contains("guide.md"));
    assert!(!stdout.contains("empty.txt"));
}

#[test]
fn test_unavailable_provider_returns_no_results() {
    let (tmp, _) = setup_test_env();
    let config_path = tmp.path().join("config").join("disabled.toml");
    fs::write(
        &config_path,
        format!(
            "[data]\ndir = \"{}/data\"\n\n[embedding]\nprovider = \"disabled\"\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (stdout, stderr, ok) = run_kb(&config_path, &["query", "anything", "--json"]);
    assert!(ok, "query should degrade, not fail: {}", stderr);
    let results: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert!(results.is_empty());

    let (stdout, _, ok) = run_kb(&config_path, &["prompt", "plain question"]);
    assert!(ok);
    assert_eq!(stdout.trim_end(), "plain question");

    let (stdout, _, _) = run_kb(&config_path, &["status"]);
    assert!(stdout.contains("disabled (unavailable)"));
}
