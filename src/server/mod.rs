mod auth;
mod events;
mod files;
mod git;
mod policy;
mod relay;
mod repo;
mod routes;

use anyhow::{Context, Result};
use axum::{
    routing::{any, get, post},
    Router,
};
use gitrelay_hub::SuperHub;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::command::GitBinary;
use crate::config::Config;
use crate::history::CommitHistoryReader;
use crate::storage::RepositoryStore;

pub use auth::{basic_credentials, BasicCredentials};
pub use files::CachePolicy;
pub use policy::AccessPolicy;
pub use relay::{RpcRequest, SubprocessRelay, RELAY_CHUNK_SIZE};
pub use repo::BANNER;
pub use routes::{Handler, ProtocolRouter, RouteError, RouteMatch};

/// Shared by every handler
#[derive(Clone)]
pub struct AppState {
    pub repos: RepositoryStore,
    pub history: CommitHistoryReader,
    pub policy: Arc<AccessPolicy>,
    pub router: Arc<ProtocolRouter>,
    pub relay: SubprocessRelay,
    pub hubs: SuperHub,
    /// Normalized route prefix, e.g. `/git`
    pub prefix: Arc<str>,
}

pub struct GitRelayServer {
    state: AppState,
    addr: String,
}

impl GitRelayServer {
    pub fn new(config: &Config) -> Result<Self> {
        let git = GitBinary::new(config.git.bin_path.clone());
        let hubs = SuperHub::new(config.hub.settings());
        let router = ProtocolRouter::new().context("Failed to compile git route table")?;

        Ok(Self {
            state: AppState {
                repos: RepositoryStore::new(config.storage.repos_dir.clone(), git.clone()),
                history: CommitHistoryReader::new(git),
                policy: Arc::new(AccessPolicy::from_config(&config.git)),
                router: Arc::new(router),
                relay: SubprocessRelay::new(&config.git, hubs.clone()),
                hubs,
                prefix: Arc::from(config.server.normalized_prefix()),
            },
            addr: config.server.bind_address.clone(),
        })
    }

    pub fn router(&self) -> Router {
        let prefix = &self.state.prefix;
        Router::new()
            .route("/", get(repo::banner))
            .route("/repo", post(repo::create_repo))
            .route("/events/:repo", get(events::subscribe))
            .route(&format!("{}/:repo", prefix), any(git::repo_status))
            .route(&format!("{}/:repo/*action", prefix), any(git::dispatch))
            .with_state(self.state.clone())
    }

    pub fn hubs(&self) -> &SuperHub {
        &self.state.hubs
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.addr)
            .await
            .with_context(|| format!("Failed to bind {}", self.addr))?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, prefix = %self.state.prefix, "listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;
    use tempfile::TempDir;

    async fn spawn_server(repos: &TempDir) -> String {
        let mut config = Config::default();
        config.storage.repos_dir = repos.path().to_path_buf();
        let server = GitRelayServer::new(&config).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.serve(listener));
        format!("http://{}", addr)
    }

    async fn get(url: String) -> (StatusCode, String) {
        let response = reqwest::get(url).await.unwrap();
        let status = response.status();
        (status, response.text().await.unwrap())
    }

    #[tokio::test]
    async fn test_banner() {
        let repos = TempDir::new().unwrap();
        let base = spawn_server(&repos).await;
        let (status, body) = get(format!("{}/", base)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, BANNER);
    }

    #[tokio::test]
    async fn test_repository_gate() {
        let repos = TempDir::new().unwrap();
        std::fs::create_dir(repos.path().join("demo")).unwrap();
        let base = spawn_server(&repos).await;

        let (status, body) = get(format!("{}/git/missing/info/refs", base)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], false);
        assert_eq!(json["error"], "repo not found");

        let (status, _) = get(format!("{}/git/bad.name/HEAD", base)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get(format!("{}/git/demo", base)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, r#"{"status":true}"#);
    }

    #[tokio::test]
    async fn test_static_routes() {
        let repos = TempDir::new().unwrap();
        let demo = repos.path().join("demo");
        std::fs::create_dir(&demo).unwrap();
        std::fs::write(demo.join("HEAD"), "ref: refs/heads/main\n").unwrap();
        let base = spawn_server(&repos).await;

        let (status, body) = get(format!("{}/git/demo/HEAD", base)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ref: refs/heads/main\n");

        let loose = "objects/ab/0123456789abcdef0123456789abcdef012345";
        let (status, body) = get(format!("{}/git/demo/{}", base, loose)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, "404 Not Found");

        let (status, _) = get(format!("{}/git/demo/config", base)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = get(format!("{}/git/demo/git-upload-pack", base)).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }
}
