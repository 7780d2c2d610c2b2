use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tempfile::TempDir;

fn tribed_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("tribed");
    path
}

const RECORDS: &str = r#"{"source_type":"reddit","source_id":"t3_rust","url":"https://www.reddit.com/r/rust/comments/abc/?utm_source=share","title":"Rust ownership and borrowing explained","raw_text":"<p>A deep dive into Rust ownership, borrowing, cargo and crates.</p>","published_at":"2024-05-01T12:00:00Z","tags":["rust"]}
{"source_type":"youtube","source_id":"yt_python","url":"https://www.youtube.com/watch?v=py123","title":"Python machine learning crash course","raw_text":"PyTorch, deep learning and neural networks with Python.","published_at":"2024-05-01T12:00:00Z","tags":["ml"]}
{"source_type":"medium","source_id":"md_k8s","url":"https://medium.com/@ops/kubernetes-in-production","title":"Kubernetes in production","raw_text":"Deployment, Docker images and infrastructure notes.","published_at":"2024-04-01T12:00:00Z","tags":["devops"]}
"#;

fn setup_test_env_with(provider: &str, extra: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let data_dir = root.join("data");
    fs::create_dir_all(&data_dir).unwrap();

    fs::write(root.join("records.jsonl"), RECORDS).unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/tribed.sqlite"

[embedding]
provider = "{}"
dims = 128

[server]
bind = "127.0.0.1:7341"

[logging]
filter = "warn"
{}
"#,
        root.display(),
        provider,
        extra
    );

    let config_path = config_dir.join("tribed.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn setup_test_env() -> (TempDir, PathBuf) {
    setup_test_env_with("hash", "")
}

fn records_path(config_path: &Path) -> String {
    config_path
        .parent()
        .unwrap()
        .parent()
        .unwrap()
        .join("records.jsonl")
        .to_str()
        .unwrap()
        .to_string()
}

fn run_tribed(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = tribed_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run tribed binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ingest_records(config_path: &Path) {
    let records = records_path(config_path);
    let (stdout, stderr, success) = run_tribed(config_path, &["ingest", &records]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
}

fn feed_json(config_path: &Path, args: &[&str]) -> serde_json::Value {
    let mut full = vec!["feed"];
    full.extend_from_slice(args);
    full.push("--json");
    let (stdout, stderr, success) = run_tribed(config_path, &full);
    assert!(success, "feed failed: stdout={}, stderr={}", stdout, stderr);
    serde_json::from_str(&stdout).unwrap()
}

fn line_value(stdout: &str, key: &str) -> String {
    stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix(key).map(|v| v.trim().to_string()))
        .unwrap_or_else(|| panic!("no '{}' line in: {}", key, stdout))
}

#[test]
fn test_init_creates_database() {
    let (_tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_tribed(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_tribed(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_tribed(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_records() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);

    let records = records_path(&config_path);
    let (stdout, stderr, success) = run_tribed(&config_path, &["ingest", &records]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("records: 3"));
    assert!(stdout.contains("indexed: 3"));
    assert!(stdout.contains("skipped: 0"));
    assert!(stdout.contains("ok"));
}

#[test]
fn test_ingest_twice_is_unchanged() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let records = records_path(&config_path);
    let (stdout, _, success) = run_tribed(&config_path, &["ingest", &records]);
    assert!(success);
    assert!(stdout.contains("unchanged: 3"), "stdout={}", stdout);
    assert!(stdout.contains("indexed: 0"));
}

#[test]
fn test_ingest_reports_bad_lines() {
    let (tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);

    let file = tmp.path().join("mixed.jsonl");
    fs::write(
        &file,
        r#"{"source_type":"web","source_id":"w1","url":"https://example.com/a","title":"A","raw_text":"Some text"}
this is not json
{"source_type":"web","source_id":"w2","url":"https://example.com/b","title":"B"}
{"source_type":"myspace","source_id":"m1","url":"https://myspace.com/x","raw_text":"hi"}
"#,
    )
    .unwrap();

    let (stdout, stderr, success) = run_tribed(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("indexed: 1"));
    assert!(stdout.contains("skipped: 3"));
    assert!(stdout.contains("line 2:"));
    assert!(stdout.contains("line 3:"));
    assert!(stdout.contains("line 4:"));
}

#[test]
fn test_ingest_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);

    let records = records_path(&config_path);
    let (stdout, _, success) = run_tribed(&config_path, &["ingest", &records, "--dry-run"]);
    assert!(success);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("valid: 3"));

    let feed = feed_json(&config_path, &["rust"]);
    assert!(feed["items"].as_array().unwrap().is_empty());
}

#[test]
fn test_feed_ranks_matching_content_first() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let (stdout, stderr, success) = run_tribed(
        &config_path,
        &["feed", "rust ownership borrowing cargo crates"],
    );
    assert!(success, "feed failed: stdout={}, stderr={}", stdout, stderr);
    let first = stdout.lines().find(|l| l.starts_with("1. ")).unwrap();
    assert!(first.contains("Rust ownership"), "stdout={}", stdout);
    assert!(stdout.contains("embedding_version: hash-v1"));
}

#[test]
fn test_feed_canonicalizes_urls() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let feed = feed_json(&config_path, &["rust"]);
    let urls: Vec<&str> = feed["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["url"].as_str().unwrap())
        .collect();
    assert!(urls.iter().all(|u| !u.contains("utm_source")));
    assert!(urls.iter().all(|u| !u.contains("www.")));
}

#[test]
fn test_feed_source_filter() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let feed = feed_json(&config_path, &["learning", "--source", "youtube"]);
    let items = feed["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["source_type"], "youtube");
}

#[test]
fn test_feed_time_window() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let feed = feed_json(
        &config_path,
        &["kubernetes", "--since", "2024-03-01", "--until", "2024-04-30"],
    );
    let items = feed["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["title"], "Kubernetes in production");
}

#[test]
fn test_feed_explain() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let (stdout, _, success) = run_tribed(&config_path, &["feed", "rust", "--explain"]);
    assert!(success);
    assert!(stdout.contains("similarity"));
    assert!(stdout.contains("recency"));
    assert!(stdout.contains("diversity run"));
}

#[test]
fn test_feed_pagination() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let page1 = feed_json(&config_path, &["rust python kubernetes", "--page-size", "2"]);
    let items1 = page1["items"].as_array().unwrap();
    assert_eq!(items1.len(), 2);
    let token = page1["next_page_token"].as_str().unwrap().to_string();

    let page2 = feed_json(
        &config_path,
        &[
            "rust python kubernetes",
            "--page-size",
            "2",
            "--page-token",
            &token,
        ],
    );
    let items2 = page2["items"].as_array().unwrap();
    assert_eq!(items2.len(), 1);
    assert!(page2["next_page_token"].is_null());

    let seen: Vec<&str> = items1
        .iter()
        .chain(items2.iter())
        .map(|i| i["content_id"].as_str().unwrap())
        .collect();
    let mut unique = seen.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), 3);
}

#[test]
fn test_feed_rejects_token_for_other_prompt() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let page1 = feed_json(&config_path, &["rust", "--page-size", "1"]);
    let token = page1["next_page_token"].as_str().unwrap().to_string();

    let (_, stderr, success) = run_tribed(
        &config_path,
        &["feed", "python", "--page-size", "1", "--page-token", &token],
    );
    assert!(!success);
    assert!(stderr.contains("page token"), "stderr={}", stderr);
}

#[test]
fn test_feed_empty_prompt_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);

    let (_, stderr, success) = run_tribed(&config_path, &["feed", "   "]);
    assert!(!success);
    assert!(stderr.contains("prompt"));
}

#[test]
fn test_share_and_get() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let (stdout, stderr, success) = run_tribed(
        &config_path,
        &["feed", "rust", "--share", "--owner", "alice"],
    );
    assert!(success, "share failed: stdout={}, stderr={}", stdout, stderr);
    let share_id = line_value(&stdout, "share_id:");

    let (stdout, _, success) = run_tribed(&config_path, &["share", "get", &share_id, "--json"]);
    assert!(success);
    let snapshot: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(snapshot["share_id"], share_id.as_str());
    assert_eq!(snapshot["owner_ref"], "alice");
    assert_eq!(snapshot["prompt"], "rust");
    assert_eq!(snapshot["feed"]["items"].as_array().unwrap().len(), 3);
}

#[test]
fn test_share_survives_retirement() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let (stdout, _, _) = run_tribed(&config_path, &["feed", "rust", "--share", "--owner", "bob"]);
    let share_id = line_value(&stdout, "share_id:");
    let before = feed_json(&config_path, &["rust"]);
    let id = before["items"][0]["content_id"].as_str().unwrap().to_string();

    let (_, _, success) = run_tribed(&config_path, &["retire", &id]);
    assert!(success);

    let (stdout, _, _) = run_tribed(&config_path, &["share", "get", &share_id, "--json"]);
    let snapshot: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(snapshot["feed"]["items"][0]["content_id"], id.as_str());
}

#[test]
fn test_share_get_unknown() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);

    let (_, stderr, success) = run_tribed(&config_path, &["share", "get", "nope"]);
    assert!(!success);
    assert!(stderr.contains("share not found"));
}

#[test]
fn test_share_requires_owner() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);

    let (_, _, success) = run_tribed(&config_path, &["feed", "rust", "--share"]);
    assert!(!success);
}

#[test]
fn test_retire_removes_from_feed() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let before = feed_json(&config_path, &["rust"]);
    let id = before["items"][0]["content_id"].as_str().unwrap().to_string();

    let (stdout, _, success) = run_tribed(&config_path, &["retire", &id]);
    assert!(success);
    assert!(stdout.contains("retired"));

    let after = feed_json(&config_path, &["rust"]);
    let items = after["items"].as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i["content_id"] != id.as_str()));

    let (stdout, _, success) = run_tribed(&config_path, &["retire", &id]);
    assert!(success);
    assert!(stdout.contains("already retired"));
}

#[test]
fn test_retire_older_than() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let (stdout, _, success) = run_tribed(&config_path, &["retire-older-than", "2024-04-15"]);
    assert!(success);
    assert!(stdout.contains("retired: 1"));

    let feed = feed_json(&config_path, &["kubernetes"]);
    assert!(feed["items"]
        .as_array()
        .unwrap()
        .iter()
        .all(|i| i["title"] != "Kubernetes in production"));
}

#[test]
fn test_tribe_create_follow_list_feed() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let (stdout, stderr, success) = run_tribed(
        &config_path,
        &[
            "tribe",
            "create",
            "Rustaceans",
            "--prompt",
            "rust systems programming",
            "--tag",
            "rust",
        ],
    );
    assert!(success, "tribe create failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("members: 1"));
    let tribe_id = line_value(&stdout, "id:");

    let (stdout, _, success) = run_tribed(
        &config_path,
        &["tribe", "follow", &tribe_id, "--user", "alice"],
    );
    assert!(success);
    assert!(stdout.contains("following: 1"));

    let (stdout, _, success) = run_tribed(&config_path, &["tribe", "list"]);
    assert!(success);
    let row = stdout.lines().find(|l| l.contains("Rustaceans")).unwrap();
    assert!(row.contains(&tribe_id));
    assert!(row.split_whitespace().nth(1) == Some("1"), "row={}", row);

    let (stdout, _, success) = run_tribed(
        &config_path,
        &["tribe", "feed", &tribe_id, "--user", "alice", "--json"],
    );
    assert!(success);
    let feed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let items = feed["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["source_type"], "reddit");

    let (stdout, _, success) = run_tribed(
        &config_path,
        &["tribe", "unfollow", &tribe_id, "--user", "alice"],
    );
    assert!(success);
    assert!(stdout.contains("following: 0"));
}

#[test]
fn test_tribe_follow_unknown() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);

    let (_, stderr, success) = run_tribed(
        &config_path,
        &["tribe", "follow", "missing", "--user", "alice"],
    );
    assert!(!success);
    assert!(stderr.contains("tribe not found"));
}

#[test]
fn test_index_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let (stdout, _, success) = run_tribed(&config_path, &["index", "stats", "--json"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["embedding_version"], "hash-v1");
    assert_eq!(stats["index"]["live"], 3);
    assert_eq!(stats["index"]["dims"], 128);
}

#[test]
fn test_index_rebuild_after_model_change() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        content.replace("dims = 128", "dims = 128\nmodel = \"hash-v2\""),
    )
    .unwrap();

    let (stdout, stderr, success) = run_tribed(&config_path, &["index", "rebuild"]);
    assert!(success, "rebuild failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("version: hash-v2"));
    assert!(stdout.contains("indexed: 3"));

    let feed = feed_json(&config_path, &["rust"]);
    assert_eq!(feed["embedding_version"], "hash-v2");
    assert_eq!(feed["items"].as_array().unwrap().len(), 3);
}

#[test]
fn test_opening_does_not_re_embed_stale_content() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        content.replace("dims = 128", "dims = 128\nmodel = \"hash-v2\""),
    )
    .unwrap();

    let (stdout, _, success) = run_tribed(&config_path, &["index", "stats", "--json"]);
    assert!(success);
    let stats: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(stats["embedding_version"], "hash-v2");
    assert_eq!(stats["index"]["live"], 0);
    assert_eq!(stats["contents_by_status"]["indexed"], 3);

    let (stdout, _, success) = run_tribed(&config_path, &["index", "rebuild"]);
    assert!(success);
    assert!(stdout.contains("re-embedded: 3"));
}

#[test]
fn test_index_compact() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let (stdout, _, success) = run_tribed(&config_path, &["index", "compact"]);
    assert!(success);
    assert!(stdout.contains("tombstones removed"));
}

#[test]
fn test_embed_pending_up_to_date() {
    let (_tmp, config_path) = setup_test_env();
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let (stdout, _, success) = run_tribed(&config_path, &["embed", "pending"]);
    assert!(success);
    assert!(stdout.contains("all content up to date"));
}

#[test]
fn test_embed_pending_disabled_fails() {
    let (_tmp, config_path) = setup_test_env_with("disabled", "");
    run_tribed(&config_path, &["init"]);

    let (_, stderr, success) = run_tribed(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_invalid_weight_rejected() {
    let (_tmp, config_path) = setup_test_env_with("hash", "\n[ranking]\nw_sim = -1.0\n");

    let (_, stderr, success) = run_tribed(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Invalid engine settings"), "stderr={}", stderr);
}

#[test]
fn test_unknown_provider_rejected() {
    let (_tmp, config_path) = setup_test_env_with("magic", "");

    let (_, stderr, success) = run_tribed(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("Unknown embedding provider"));
}

#[test]
fn test_missing_config() {
    let (_, stderr, success) = run_tribed(Path::new("/nonexistent/tribed.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

// ============ HTTP server ============

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn setup_server_env(port: u16) -> (TempDir, PathBuf) {
    let (tmp, config_path) = setup_test_env();
    let content = fs::read_to_string(&config_path).unwrap();
    fs::write(
        &config_path,
        content.replace("127.0.0.1:7341", &format!("127.0.0.1:{}", port)),
    )
    .unwrap();
    (tmp, config_path)
}

fn start_server(config_path: &Path) -> Child {
    Command::new(tribed_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to start server")
}

fn wait_for_server(port: u16) -> bool {
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        if let Ok(resp) = reqwest::blocking::get(&url) {
            if resp.status().is_success() {
                return true;
            }
        }
        std::thread::sleep(std::time::Duration::from_millis(100));
    }
    false
}

fn records_json() -> serde_json::Value {
    let records: Vec<serde_json::Value> = RECORDS
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    serde_json::json!({ "records": records })
}

#[test]
fn test_server_health() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_server_env(port);
    run_tribed(&config_path, &["init"]);

    let mut server = start_server(&config_path);
    assert!(wait_for_server(port), "server did not start");

    let resp = reqwest::blocking::get(format!("http://127.0.0.1:{}/health", port)).unwrap();
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["embedding_version"], "hash-v1");
    assert_eq!(body["index"], "ready");
    assert!(body["version"].is_string());

    server.kill().ok();
    server.wait().ok();
}

#[test]
fn test_server_ingest_generate_share() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_server_env(port);
    run_tribed(&config_path, &["init"]);

    let mut server = start_server(&config_path);
    assert!(wait_for_server(port), "server did not start");
    let client = reqwest::blocking::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let resp = client
        .post(format!("{}/content/ingest", base))
        .json(&records_json())
        .send()
        .unwrap();
    assert!(resp.status().is_success());
    let report: serde_json::Value = resp.json().unwrap();
    assert_eq!(report["indexed"], 3);

    let resp = client
        .post(format!("{}/feed/generate", base))
        .json(&serde_json::json!({
            "prompt": "python deep learning",
            "page_size": 2
        }))
        .send()
        .unwrap();
    assert!(resp.status().is_success());
    let feed: serde_json::Value = resp.json().unwrap();
    assert_eq!(feed["items"].as_array().unwrap().len(), 2);
    assert_eq!(feed["items"][0]["source_type"], "youtube");
    assert!(feed["next_page_token"].is_string());

    let resp = client
        .post(format!("{}/feed/share", base))
        .json(&serde_json::json!({ "feed": feed, "owner_ref": "alice" }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let created: serde_json::Value = resp.json().unwrap();
    let share_id = created["share_id"].as_str().unwrap().to_string();

    let resp = client
        .get(format!("{}/feed/{}", base, share_id))
        .send()
        .unwrap();
    assert!(resp.status().is_success());
    let snapshot: serde_json::Value = resp.json().unwrap();
    assert_eq!(snapshot["owner_ref"], "alice");
    assert_eq!(snapshot["feed"]["items"], feed["items"]);

    server.kill().ok();
    server.wait().ok();
}

#[test]
fn test_server_tribes() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_server_env(port);
    run_tribed(&config_path, &["init"]);
    ingest_records(&config_path);

    let mut server = start_server(&config_path);
    assert!(wait_for_server(port), "server did not start");
    let client = reqwest::blocking::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let resp = client
        .post(format!("{}/tribes", base))
        .json(&serde_json::json!({
            "name": "ML",
            "description": "machine learning",
            "prompt": "machine learning",
            "tags": ["ml"]
        }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 201);
    let tribe: serde_json::Value = resp.json().unwrap();
    let tribe_id = tribe["id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{}/tribes/{}/follow", base, tribe_id))
        .json(&serde_json::json!({ "user_ref": "bob" }))
        .send()
        .unwrap();
    assert!(resp.status().is_success());

    let resp = client.get(format!("{}/tribes", base)).send().unwrap();
    let list: serde_json::Value = resp.json().unwrap();
    let first = &list["tribes"][0];
    assert_eq!(first["id"], tribe_id.as_str());
    assert_eq!(first["follower_count"], 1);

    let resp = client
        .get(format!("{}/tribes/{}/feed?user_ref=bob", base, tribe_id))
        .send()
        .unwrap();
    assert!(resp.status().is_success());
    let feed: serde_json::Value = resp.json().unwrap();
    assert_eq!(feed["items"].as_array().unwrap().len(), 1);

    server.kill().ok();
    server.wait().ok();
}

#[test]
fn test_server_error_shape() {
    let port = find_free_port();
    let (_tmp, config_path) = setup_server_env(port);
    run_tribed(&config_path, &["init"]);

    let mut server = start_server(&config_path);
    assert!(wait_for_server(port), "server did not start");
    let client = reqwest::blocking::Client::new();
    let base = format!("http://127.0.0.1:{}", port);

    let resp = client
        .post(format!("{}/feed/generate", base))
        .json(&serde_json::json!({ "prompt": "" }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "invalid_prompt");
    assert_eq!(body["error"]["retryable"], false);
    assert!(body["error"]["message"].is_string());

    let resp = client
        .post(format!("{}/feed/generate", base))
        .json(&serde_json::json!({ "prompt": "???" }))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "invalid_prompt");

    let resp = client
        .get(format!("{}/feed/does-not-exist", base))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "share_not_found");

    let resp = client
        .post(format!("{}/feed/generate", base))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    server.kill().ok();
    server.wait().ok();
}
