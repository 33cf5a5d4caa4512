//! Dumb-protocol file serving
//!
//! Loose objects and packs are content addressed and never change once
//! written, so they are cached for a year. Everything else may change on the
//! next push and is served uncached.

use axum::{
    body::Body,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, Stream};
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::debug;

const READ_CHUNK: usize = 8192;
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub const TEXT_PLAIN: &str = "text/plain";
pub const TEXT_PLAIN_UTF8: &str = "text/plain; charset=utf-8";
pub const LOOSE_OBJECT: &str = "application/x-git-loose-object";
pub const PACKED_OBJECTS: &str = "application/x-git-packed-objects";
pub const PACKED_OBJECTS_TOC: &str = "application/x-git-packed-objects-toc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    NoCache,
    Forever,
}

impl CachePolicy {
    pub fn apply(self, headers: &mut HeaderMap) {
        match self {
            CachePolicy::NoCache => {
                headers.insert(
                    header::EXPIRES,
                    HeaderValue::from_static("Fri, 01 Jan 1980 00:00:00 GMT"),
                );
                headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
                headers.insert(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-cache, max-age=0, must-revalidate"),
                );
            }
            CachePolicy::Forever => {
                let now = Utc::now();
                insert_date(headers, header::DATE, now);
                insert_date(headers, header::EXPIRES, now + Duration::days(365));
                headers.insert(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("public, max-age=31536000"),
                );
            }
        }
    }
}

pub fn http_date(time: DateTime<Utc>) -> String {
    time.format(HTTP_DATE).to_string()
}

fn insert_date(headers: &mut HeaderMap, name: header::HeaderName, time: DateTime<Utc>) {
    if let Ok(value) = HeaderValue::from_str(&http_date(time)) {
        headers.insert(name, value);
    }
}

pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "404 Not Found").into_response()
}

/// `repo_dir/file`, or `None` if `file` tries to leave the repository.
fn resolve(repo_dir: &Path, file: &str) -> Option<PathBuf> {
    let relative = Path::new(file);
    relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| repo_dir.join(relative))
}

/// Stream `repo_dir/file` with the given content type and cache policy.
pub async fn send_file(
    repo_dir: &Path,
    file: &str,
    content_type: &'static str,
    cache: CachePolicy,
) -> Response {
    let Some(path) = resolve(repo_dir, file) else {
        return not_found();
    };

    let handle = match File::open(&path).await {
        Ok(f) => f,
        Err(e) => {
            debug!(path = %path.display(), "cannot open: {}", e);
            return not_found();
        }
    };
    let metadata = match handle.metadata().await {
        Ok(m) if m.is_file() => m,
        _ => return not_found(),
    };

    let mut headers = HeaderMap::new();
    cache.apply(&mut headers);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
    if let Ok(modified) = metadata.modified() {
        insert_date(&mut headers, header::LAST_MODIFIED, modified.into());
    }

    (StatusCode::OK, headers, Body::from_stream(file_stream(handle))).into_response()
}

fn file_stream(file: File) -> impl Stream<Item = std::io::Result<Bytes>> {
    stream::unfold(Some(file), |state| async move {
        let mut file = state?;
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        match file.read_buf(&mut buf).await {
            Ok(0) => None,
            Ok(_) => Some((Ok(buf.freeze()), Some(file))),
            Err(e) => Some((Err(e), None)),
        }
    })
}
