//! Integration tests using the actual git CLI
//!
//! A real git client pushes to and clones from the server, while a WebSocket
//! subscriber watches the repository. Skipped when git is not installed.

use futures::StreamExt;
use gitrelay::{Config, GitRelayServer, SuperHub};
use std::path::Path;
use std::process::Output;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Check if git is available
fn git_available() -> bool {
    std::process::Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

async fn git(args: &[&str], cwd: &Path) -> Output {
    let output = tokio::time::timeout(
        Duration::from_secs(30),
        Command::new("git")
            .args(args)
            .current_dir(cwd)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .env("HOME", cwd)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .expect("git timed out")
    .expect("failed to run git");

    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    output
}

async fn start_server(repos: &Path) -> (String, SuperHub) {
    let mut config = Config::default();
    config.storage.repos_dir = repos.to_path_buf();

    let server = GitRelayServer::new(&config).unwrap();
    let hubs = server.hubs().clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(server.serve(listener));
    (addr, hubs)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_push_clone_and_events() {
    if !git_available() {
        eprintln!("git not available, skipping");
        return;
    }

    let temp = TempDir::new().unwrap();
    let repos = temp.path().join("repos");
    std::fs::create_dir_all(&repos).unwrap();
    let (addr, hubs) = start_server(&repos).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("http://{}/repo", addr))
        .json(&serde_json::json!({ "name": "demo" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    let created: serde_json::Value = response.json().await.unwrap();
    assert_eq!(created["repoName"], "demo");
    git(&["symbolic-ref", "HEAD", "refs/heads/main"], &repos.join("demo")).await;

    let (mut ws, _) = connect_async(format!("ws://{}/events/demo", addr))
        .await
        .unwrap();
    for _ in 0..200 {
        let count = match hubs.hub("demo") {
            Some(hub) => hub.client_count().await,
            None => None,
        };
        if count == Some(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Commit locally and push
    let work = temp.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    git(&["init", "-q"], &work).await;
    std::fs::write(work.join("README.md"), "# demo\n").unwrap();
    git(&["add", "README.md"], &work).await;
    git(
        &[
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-q",
            "-m",
            "Initial commit",
        ],
        &work,
    )
    .await;
    let url = format!("http://{}/git/demo", addr);
    git(&["push", "-q", &url, "HEAD:refs/heads/main"], &work).await;

    let head = git(&["rev-parse", "HEAD"], &work).await;
    let head = String::from_utf8_lossy(&head.stdout).trim().to_string();

    let message = tokio::time::timeout(Duration::from_secs(10), ws.next())
        .await
        .expect("push event")
        .unwrap()
        .unwrap();
    let Message::Text(text) = message else {
        panic!("expected a text frame, got {:?}", message);
    };
    let event: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(event["type"], "CREATE");
    assert_eq!(event["newSha"], head.as_str());
    assert_eq!(event["ref"], "refs/heads/main");

    // Clone it back
    git(&["clone", "-q", "--branch", "main", &url, "clone"], temp.path()).await;
    let readme = std::fs::read_to_string(temp.path().join("clone/README.md")).unwrap();
    assert_eq!(readme, "# demo\n");

    // History endpoint
    let logs: serde_json::Value = client
        .get(format!("http://{}/git/demo/log", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(logs["status"], true);
    assert_eq!(logs["logs"][0]["commit"], head.as_str());
    assert_eq!(logs["logs"][0]["subject"], "Initial commit");
    assert_eq!(logs["logs"][0]["author"]["email"], "test@example.com");

    let page: serde_json::Value = client
        .get(format!("http://{}/git/demo/log?page=1", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["logs"], serde_json::json!([]));
}
