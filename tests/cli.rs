//! End-to-end tests for the `rag` binary against a mock Ollama server on a
//! loopback port.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tempfile::TempDir;

use rag_harness::answer::INSUFFICIENT_EVIDENCE;
use rag_harness::corpus::read_chunks;

const TOPICS: [&str; 4] = ["rust", "python", "kubernetes", "cooking"];

fn topic_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut v: Vec<f32> = TOPICS
        .iter()
        .map(|t| if lower.contains(t) { 1.0 } else { 0.0 })
        .collect();
    v.push(0.05);
    v
}

#[derive(Default)]
struct MockCounters {
    embed_calls: AtomicUsize,
    chat_calls: AtomicUsize,
}

async fn embed(State(counters): State<Arc<MockCounters>>, Json(body): Json<Value>) -> Json<Value> {
    counters.embed_calls.fetch_add(1, Ordering::SeqCst);
    let inputs: Vec<String> = match &body["input"] {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().unwrap_or_default().to_string())
            .collect(),
        _ => Vec::new(),
    };
    let embeddings: Vec<Vec<f32>> = inputs.iter().map(|t| topic_vector(t)).collect();
    Json(json!({ "model": body["model"], "embeddings": embeddings }))
}

async fn chat(State(counters): State<Arc<MockCounters>>, Json(body): Json<Value>) -> Json<Value> {
    counters.chat_calls.fetch_add(1, Ordering::SeqCst);
    let prompt = body["messages"][1]["content"].as_str().unwrap_or_default();
    let content = if prompt.contains("Context:") {
        "Grounded mock answer."
    } else {
        "Malformed prompt."
    };
    Json(json!({
        "model": body["model"],
        "message": { "role": "assistant", "content": content },
        "done": true
    }))
}

/// Start the mock on its own runtime; it lives until the test process exits.
fn start_mock() -> (SocketAddr, Arc<MockCounters>) {
    let counters = Arc::new(MockCounters::default());
    let state = counters.clone();
    let (tx, rx) = std::sync::mpsc::channel();

    std::thread::spawn(move || {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async move {
            let app = Router::new()
                .route("/api/embed", post(embed))
                .route("/api/chat", post(chat))
                .with_state(state);
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            tx.send(listener.local_addr().unwrap()).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });

    (rx.recv().unwrap(), counters)
}

fn setup(provider_url: Option<SocketAddr>) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    let docs = root.join("docs");
    fs::create_dir_all(docs.join("ops")).unwrap();
    fs::write(
        docs.join("alpha.md"),
        "Rust gives memory safety without a garbage collector. Ownership rules are checked at compile time. \
         Cargo builds Rust crates and resolves their dependencies. Rust traits describe shared behavior.",
    )
    .unwrap();
    fs::write(
        docs.join("beta.txt"),
        "Python is popular for data science. Notebooks make Python experiments easy to share. \
         Python packages are installed with pip.",
    )
    .unwrap();
    fs::write(
        docs.join("ops").join("gamma.txt"),
        "Kubernetes schedules containers onto nodes. A Kubernetes deployment keeps replicas running.",
    )
    .unwrap();

    let (embedding, generation) = match provider_url {
        Some(addr) => (
            format!(
                "provider = \"ollama\"\nmodel = \"mock-embed\"\ndims = 5\nurl = \"http://{}\"\nmax_retries = 0\ntimeout_secs = 10",
                addr
            ),
            format!(
                "provider = \"ollama\"\nmodel = \"mock-chat\"\nurl = \"http://{}\"\nmax_retries = 0\ntimeout_secs = 10",
                addr
            ),
        ),
        None => ("provider = \"disabled\"".to_string(), "provider = \"disabled\"".to_string()),
    };

    let config = format!(
        r#"[index]
path = "{root}/data/index.json"

[chunking]
max_size = 120
overlap = 30

[retrieval]
top_k = 3
similarity_threshold = 0.5
max_context_chars = 1000

[embedding]
{embedding}

[generation]
{generation}

[corpus]
root = "{root}/docs"
include_globs = ["**/*.md", "**/*.txt"]
"#,
        root = root.display(),
        embedding = embedding,
        generation = generation,
    );

    let config_path = root.join("rag.toml");
    fs::write(&config_path, config).unwrap();
    (tmp, config_path)
}

fn run_rag(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_rag"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("OPENAI_API_KEY")
        .output()
        .expect("failed to run rag binary");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_chunk_and_stats_without_providers() {
    let (tmp, config) = setup(None);
    let out = tmp.path().join("chunks.json");

    let (stdout, stderr, ok) = run_rag(&config, &["chunk", "--out", out.to_str().unwrap()]);
    assert!(ok, "chunk failed: {}", stderr);
    assert!(stdout.contains("alpha"));
    assert!(stdout.contains("ops/gamma"));

    let file = read_chunks(&out).unwrap();
    assert_eq!(file.chunking_config.max_size, 120);
    assert_eq!(file.chunking_config.overlap, 30);
    assert!(file.chunks.iter().any(|c| c.document_id == "beta"));
    assert!(file.chunks.iter().all(|c| c.end - c.start <= 120));

    let (stdout, stderr, ok) = run_rag(&config, &["stats"]);
    assert!(ok, "stats failed: {}", stderr);
    assert!(stdout.contains("Chunk Quality"));
    assert!(stdout.contains("DOCUMENT"));
}

#[test]
fn test_index_build_requires_embedding_provider() {
    let (_tmp, config) = setup(None);
    let (_stdout, stderr, ok) = run_rag(&config, &["index", "build"]);
    assert!(!ok);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_info_without_index_fails() {
    let (_tmp, config) = setup(None);
    let (_stdout, stderr, ok) = run_rag(&config, &["index", "info"]);
    assert!(!ok);
    assert!(stderr.contains("rag index build"));
}

#[test]
fn test_build_search_ask_against_mock_ollama() {
    let (addr, counters) = start_mock();
    let (tmp, config) = setup(Some(addr));

    let (stdout, stderr, ok) = run_rag(&config, &["index", "build"]);
    assert!(ok, "index build failed: {}", stderr);
    assert!(stdout.contains("documents: 3"));
    assert!(tmp.path().join("data").join("index.json").exists());
    assert!(counters.embed_calls.load(Ordering::SeqCst) >= 1);

    let (stdout, stderr, ok) = run_rag(&config, &["index", "info"]);
    assert!(ok, "index info failed: {}", stderr);
    assert!(stdout.contains("mock-embed"));
    assert!(stdout.contains("cosine"));
    assert!(stdout.contains("Dims:        5"));

    let (stdout, stderr, ok) = run_rag(&config, &["search", "kubernetes pods", "--top-k", "2"]);
    assert!(ok, "search failed: {}", stderr);
    let first = stdout.lines().next().unwrap_or_default();
    assert!(first.starts_with("1. "), "unexpected output: {}", stdout);
    assert!(first.contains("ops/gamma_chunk_"), "unexpected first hit: {}", first);
    assert!(!stdout.contains("3. "));

    let (stdout, stderr, ok) = run_rag(&config, &["ask", "Why use Rust?"]);
    assert!(ok, "ask failed: {}", stderr);
    assert!(stdout.contains("Grounded mock answer."));
    assert!(stdout.contains("Sources:"));
    assert!(stdout.contains("alpha_chunk_"));
    assert_eq!(counters.chat_calls.load(Ordering::SeqCst), 1);

    let (stdout, stderr, ok) = run_rag(&config, &["ask", "Best cooking recipes?"]);
    assert!(ok, "ask failed: {}", stderr);
    assert!(stdout.contains(INSUFFICIENT_EVIDENCE));
    assert!(!stdout.contains("Sources:"));
    assert_eq!(counters.chat_calls.load(Ordering::SeqCst), 1);
}
