//! Stateless-RPC relay between an HTTP exchange and a git subprocess
//!
//! Response headers are committed before the request body is read; the body
//! then feeds `git <rpc> --stateless-rpc` on stdin while its stdout streams
//! back to the client in small chunks. Once streaming has begun, failures can
//! only truncate the response.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures::stream;
use gitrelay_git::{parse_push_metadata, split_push_payload, PushEvent, Service};
use gitrelay_hub::SuperHub;
use std::convert::Infallible;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::auth::basic_credentials;
use crate::command::{CommandError, GitBinary};
use crate::config::GitConfig;

/// Size of each read from the subprocess, each sent as its own chunk
pub const RELAY_CHUNK_SIZE: usize = 1024;

/// Chunks buffered between the subprocess reader and the response body
const RELAY_BUFFER: usize = 16;

#[derive(Error, Debug)]
enum RelayError {
    #[error("failed to read request body: {0}")]
    Body(#[from] axum::Error),

    #[error("failed to decode gzip body: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("failed to spawn git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("subprocess pipe error: {0}")]
    Pipe(#[source] std::io::Error),

    #[error("client disconnected")]
    Disconnected,
}

/// Everything a relay task needs about one request
pub struct RpcRequest {
    pub service: Service,
    pub repo: String,
    pub repo_dir: PathBuf,
    pub headers: HeaderMap,
    pub body: Body,
}

#[derive(Clone)]
pub struct SubprocessRelay {
    git: GitBinary,
    auth_user_env_var: String,
    auth_pass_env_var: String,
    default_env: Option<(String, String)>,
    hubs: SuperHub,
}

impl SubprocessRelay {
    pub fn new(config: &GitConfig, hubs: SuperHub) -> Self {
        let default_env = config
            .default_env
            .split_once('=')
            .filter(|(key, _)| !key.is_empty())
            .map(|(key, value)| (key.to_string(), value.to_string()));
        if default_env.is_none() && !config.default_env.is_empty() {
            warn!(default_env = %config.default_env, "ignoring default_env without KEY=VALUE");
        }

        Self {
            git: GitBinary::new(config.bin_path.clone()),
            auth_user_env_var: config.auth_user_env_var.clone(),
            auth_pass_env_var: config.auth_pass_env_var.clone(),
            default_env,
            hubs,
        }
    }

    pub fn git(&self) -> &GitBinary {
        &self.git
    }

    /// Commit the response headers and relay the exchange from a spawned
    /// task. The caller has already checked access.
    pub fn service_rpc(&self, request: RpcRequest) -> Response {
        let (tx, rx) = mpsc::channel::<Bytes>(RELAY_BUFFER);
        let content_type = request.service.result_content_type();

        let relay = self.clone();
        tokio::spawn(async move {
            let repo = request.repo.clone();
            let service = request.service;
            if let Err(e) = relay.relay(request, tx).await {
                match e {
                    RelayError::Disconnected => info!(repo = %repo, %service, "{}", e),
                    _ => error!(repo = %repo, %service, "relay failed: {}", e),
                }
            }
        });

        let body = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
        });

        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
        headers.insert(header::CONNECTION, HeaderValue::from_static("Keep-Alive"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        );

        (StatusCode::OK, headers, Body::from_stream(body)).into_response()
    }

    async fn relay(&self, request: RpcRequest, tx: mpsc::Sender<Bytes>) -> Result<(), RelayError> {
        let RpcRequest {
            service,
            repo,
            repo_dir,
            headers,
            body,
        } = request;

        let mut data = axum::body::to_bytes(body, usize::MAX).await?;
        if is_gzip(&headers) {
            data = gunzip(data).await?;
        }

        let event = match service {
            Service::ReceivePack => push_event(&repo, &data),
            Service::UploadPack => None,
        };

        let mut command = self.git.command(&repo_dir);
        command
            .arg(service.rpc_name())
            .arg("--stateless-rpc")
            .arg(&repo_dir)
            .envs(self.subprocess_env(&headers))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        debug!(repo = %repo, %service, bytes = data.len(), "spawning git");
        let mut child = command.spawn().map_err(RelayError::Spawn)?;
        let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(RelayError::Pipe(std::io::ErrorKind::BrokenPipe.into()));
        };

        let write_input = async move {
            let result = stdin.write_all(&data).await;
            drop(stdin);
            result
        };

        let relay_output = async {
            let mut buf = vec![0u8; RELAY_CHUNK_SIZE];
            loop {
                let n = stdout.read(&mut buf).await.map_err(RelayError::Pipe)?;
                if n == 0 {
                    return Ok::<(), RelayError>(());
                }
                tx.send(Bytes::copy_from_slice(&buf[..n]))
                    .await
                    .map_err(|_| RelayError::Disconnected)?;
            }
        };

        let (written, relayed) = tokio::join!(write_input, relay_output);
        if let Err(e) = written {
            // git may stop reading early, e.g. when it rejects the request.
            debug!(repo = %repo, %service, "stdin closed early: {}", e);
        }
        if let Err(e) = relayed {
            // No one reads the report any more. Stop git, then still announce
            // a ref update that landed before the client went away.
            let _ = child.start_kill();
            let _ = child.wait().await;
            if let (RelayError::Disconnected, Some(event)) = (&e, &event) {
                if self.push_landed(&repo_dir, event).await {
                    self.publish(&repo, event);
                }
            }
            return Err(e);
        }

        let status = child.wait().await.map_err(RelayError::Pipe)?;
        if !status.success() {
            warn!(repo = %repo, %service, %status, "git exited with failure");
            return Ok(());
        }

        if let Some(event) = event {
            self.publish(&repo, &event);
        }
        Ok(())
    }

    fn subprocess_env(&self, headers: &HeaderMap) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let Some((key, value)) = &self.default_env {
            env.push((key.clone(), value.clone()));
        }
        if let Some(creds) = basic_credentials(headers) {
            if !self.auth_user_env_var.is_empty() {
                env.push((self.auth_user_env_var.clone(), creds.username));
            }
            if !self.auth_pass_env_var.is_empty() {
                env.push((self.auth_pass_env_var.clone(), creds.password));
            }
        }
        if let Some(version) = git_protocol(headers) {
            env.push(("GIT_PROTOCOL".to_string(), version.to_string()));
        }
        env
    }

    /// Whether the event's ref already holds its new value (or is gone,
    /// for a deletion).
    async fn push_landed(&self, repo_dir: &Path, event: &PushEvent) -> bool {
        let current = self
            .git
            .output(repo_dir, None, ["rev-parse", "--verify", "-q", event.ref_name.as_str()])
            .await
            .ok()
            .map(|out| String::from_utf8_lossy(&out).trim().to_string());
        current == event.new_sha
    }

    fn publish(&self, repo: &str, event: &PushEvent) {
        match event.to_bytes() {
            Ok(bytes) => {
                let delivered = self.hubs.publish(repo, Bytes::from(bytes));
                debug!(repo, ref_name = %event.ref_name, delivered, "push event");
            }
            Err(e) => warn!(repo, "failed to encode push event: {}", e),
        }
    }

    /// `git <service> --stateless-rpc --advertise-refs .` in `repo_dir`.
    pub async fn advertise_refs(
        &self,
        service: Service,
        repo_dir: &Path,
        protocol: Option<&str>,
    ) -> Result<Vec<u8>, CommandError> {
        self.git
            .output(
                repo_dir,
                protocol,
                [service.rpc_name(), "--stateless-rpc", "--advertise-refs", "."],
            )
            .await
    }
}

/// Value of a non-empty `Git-Protocol` header.
pub fn git_protocol(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("git-protocol")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("gzip"))
}

async fn gunzip(data: Bytes) -> Result<Bytes, RelayError> {
    let decoded = tokio::task::spawn_blocking(move || {
        let mut out = Vec::new();
        flate2::read::GzDecoder::new(data.as_ref()).read_to_end(&mut out)?;
        Ok::<_, std::io::Error>(out)
    })
    .await
    .map_err(|e| RelayError::Gzip(std::io::Error::other(e)))?
    .map_err(RelayError::Gzip)?;
    Ok(Bytes::from(decoded))
}

/// Ref update carried by a push body. Parse failures are logged and never
/// stop the push itself.
fn push_event(repo: &str, body: &[u8]) -> Option<PushEvent> {
    let metadata = split_push_payload(body)?;
    match parse_push_metadata(metadata) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(repo, "unreadable push metadata: {}", e);
            None
        }
    }
}
