//! Git HTTP routes
//!
//! Routes:
//!   - ANY {prefix}/:repo                    - repository status
//!   - GET {prefix}/:repo/log?page=N         - commit history
//!   - ANY {prefix}/:repo/*action            - smart and dumb git protocol
//!
//! Every route is gated on the repository name being valid and the
//! repository existing.

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Version},
    response::{IntoResponse, Json, Response},
};
use gitrelay_git::{protocol::service_announcement, ProtocolVersion, Service};
use serde::Deserialize;
use serde_json::json;
use std::path::{Path as FsPath, PathBuf};
use tracing::{debug, error, warn};

use super::files::{self, CachePolicy};
use super::relay::{git_protocol, RpcRequest};
use super::routes::{Handler, RouteError};
use super::AppState;
use crate::storage::is_valid_name;

#[derive(Debug, Default, Deserialize)]
pub struct GitQuery {
    service: Option<String>,
    page: Option<String>,
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": false, "error": message }))).into_response()
}

/// Directory of an existing repository, or the error response to send.
fn existing_repo(state: &AppState, repo: &str) -> Result<PathBuf, Response> {
    if !is_valid_name(repo) {
        return Err(json_error(StatusCode::BAD_REQUEST, "invalid repository name"));
    }
    if !state.repos.exists(repo) {
        return Err(json_error(StatusCode::NOT_FOUND, "repo not found"));
    }
    Ok(state.repos.resolve_path(repo))
}

/// ANY {prefix}/:repo
pub async fn repo_status(State(state): State<AppState>, Path(repo): Path<String>) -> Response {
    match existing_repo(&state, &repo) {
        Ok(_) => Json(json!({ "status": true })).into_response(),
        Err(response) => response,
    }
}

/// ANY {prefix}/:repo/*action
pub async fn dispatch(
    State(state): State<AppState>,
    Path((repo, action)): Path<(String, String)>,
    Query(query): Query<GitQuery>,
    request: Request,
) -> Response {
    let repo_dir = match existing_repo(&state, &repo) {
        Ok(dir) => dir,
        Err(response) => return response,
    };

    match action.trim_matches('/') {
        "" => return Json(json!({ "status": true })).into_response(),
        "log" => return commit_log(&state, &repo_dir, query.page.as_deref()).await,
        _ => {}
    }

    let (parts, body) = request.into_parts();
    let path = parts.uri.path();

    let matched = match state.router.route(&parts.method, path) {
        Ok(m) => m,
        Err(RouteError::NotFound) => return files::not_found(),
        Err(RouteError::MethodNotAllowed) => {
            return method_not_allowed(&parts.method, parts.version, path)
        }
    };

    if matched.base != format!("{}/{}", state.prefix, repo) {
        debug!(path, base = matched.base, "route base does not name the repository");
        return files::not_found();
    }
    let file = matched.file.to_string();

    match matched.handler {
        Handler::ServiceRpc(service) => {
            let content_type = parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            if !state
                .policy
                .is_allowed(content_type, service.rpc_name(), &repo_dir, true)
                .await
            {
                return forbidden();
            }
            state.relay.service_rpc(RpcRequest {
                service,
                repo,
                repo_dir,
                headers: parts.headers,
                body,
            })
        }
        Handler::InfoRefs => {
            info_refs(&state, query.service.as_deref(), &repo_dir, &file, &parts.headers).await
        }
        Handler::TextFile => {
            files::send_file(&repo_dir, &file, files::TEXT_PLAIN, CachePolicy::NoCache).await
        }
        Handler::InfoPacks => {
            files::send_file(&repo_dir, &file, files::TEXT_PLAIN_UTF8, CachePolicy::NoCache)
                .await
        }
        Handler::LooseObject => {
            files::send_file(&repo_dir, &file, files::LOOSE_OBJECT, CachePolicy::Forever).await
        }
        Handler::PackFile => {
            files::send_file(&repo_dir, &file, files::PACKED_OBJECTS, CachePolicy::Forever).await
        }
        Handler::IdxFile => {
            files::send_file(&repo_dir, &file, files::PACKED_OBJECTS_TOC, CachePolicy::Forever)
                .await
        }
    }
}

/// GET {prefix}/:repo/info/refs?service=git-upload-pack|git-receive-pack
///
/// Smart clients get the ref advertisement from git itself. Without a
/// permitted service the request is answered the dumb way, from the
/// `info/refs` file `update-server-info` writes.
async fn info_refs(
    state: &AppState,
    service: Option<&str>,
    repo_dir: &FsPath,
    file: &str,
    headers: &HeaderMap,
) -> Response {
    let service = service.and_then(Service::from_query);
    let allowed = match service {
        Some(s) => state.policy.is_allowed(None, s.rpc_name(), repo_dir, false).await,
        None => false,
    };
    let smart = match service {
        Some(s) if allowed => s,
        _ => return dumb_info_refs(state, repo_dir, file).await,
    };

    let protocol = git_protocol(headers);
    let refs = match state.relay.advertise_refs(smart, repo_dir, protocol).await {
        Ok(refs) => refs,
        Err(e) => {
            error!(dir = %repo_dir.display(), "advertise refs failed: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    let mut body = Vec::with_capacity(refs.len() + 64);
    if ProtocolVersion::from_header(protocol).wants_service_announcement() {
        body.extend_from_slice(&service_announcement(smart));
    }
    body.extend_from_slice(&refs);

    let mut headers = HeaderMap::new();
    CachePolicy::NoCache.apply(&mut headers);
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(smart.advertisement_content_type()),
    );
    (StatusCode::OK, headers, body).into_response()
}

async fn dumb_info_refs(state: &AppState, repo_dir: &FsPath, file: &str) -> Response {
    if let Err(e) = state.relay.git().update_server_info(repo_dir).await {
        warn!(dir = %repo_dir.display(), "update-server-info failed: {}", e);
    }
    files::send_file(repo_dir, file, files::TEXT_PLAIN_UTF8, CachePolicy::NoCache).await
}

async fn commit_log(state: &AppState, repo_dir: &FsPath, page: Option<&str>) -> Response {
    let page = match page.map(str::parse::<u64>) {
        None => 0,
        Some(Ok(page)) => page,
        Some(Err(_)) => return json_error(StatusCode::BAD_REQUEST, "invalid page"),
    };

    let logs = state.history.read(repo_dir, page).await;
    Json(json!({ "status": true, "logs": logs })).into_response()
}

/// HTTP/1.0 clients get a plain 400.
fn method_not_allowed(method: &Method, version: Version, path: &str) -> Response {
    debug!(%method, path, "method not allowed");
    if version >= Version::HTTP_11 {
        (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into_response()
    } else {
        (StatusCode::BAD_REQUEST, "Bad Request").into_response()
    }
}

fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "Forbidden").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_not_allowed_by_version() {
        let response = method_not_allowed(&Method::GET, Version::HTTP_11, "/git/demo/git-upload-pack");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = method_not_allowed(&Method::GET, Version::HTTP_10, "/git/demo/git-upload-pack");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
