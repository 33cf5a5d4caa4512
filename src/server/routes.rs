//! Dispatch table for git smart and dumb HTTP requests
//!
//! Patterns are tried in order, most specific first, so a path like
//! `objects/info/packs` always reaches its own handler instead of the
//! `objects/info/*` catch-all.

use axum::http::Method;
use gitrelay_git::Service;
use regex::Regex;

/// What serves a matched request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    /// Stateless RPC exchange relayed through a git subprocess
    ServiceRpc(Service),
    /// Ref advertisement, or `info/refs` for dumb clients
    InfoRefs,
    /// Mutable plain-text metadata (HEAD, alternates, ...)
    TextFile,
    InfoPacks,
    LooseObject,
    PackFile,
    IdxFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteError {
    NotFound,
    /// The path matched but with another method. Matching stops there.
    MethodNotAllowed,
}

/// A successful match: the handler, the path before the git suffix and the
/// suffix relative to the repository directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub handler: Handler,
    pub base: &'a str,
    pub file: &'a str,
}

struct RouteEntry {
    pattern: Regex,
    method: Method,
    handler: Handler,
}

pub struct ProtocolRouter {
    routes: Vec<RouteEntry>,
}

const ROUTES: &[(&str, &str, Handler)] = &[
    ("(.*?)/git-upload-pack$", "POST", Handler::ServiceRpc(Service::UploadPack)),
    ("(.*?)/git-receive-pack$", "POST", Handler::ServiceRpc(Service::ReceivePack)),
    ("(.*?)/info/refs$", "GET", Handler::InfoRefs),
    ("(.*?)/HEAD$", "GET", Handler::TextFile),
    ("(.*?)/objects/info/alternates$", "GET", Handler::TextFile),
    ("(.*?)/objects/info/http-alternates$", "GET", Handler::TextFile),
    ("(.*?)/objects/info/packs$", "GET", Handler::InfoPacks),
    ("(.*?)/objects/info/[^/]*$", "GET", Handler::TextFile),
    ("(.*?)/objects/[0-9a-f]{2}/[0-9a-f]{38}$", "GET", Handler::LooseObject),
    ("(.*?)/objects/pack/pack-[0-9a-f]{40}\\.pack$", "GET", Handler::PackFile),
    ("(.*?)/objects/pack/pack-[0-9a-f]{40}\\.idx$", "GET", Handler::IdxFile),
];

impl ProtocolRouter {
    pub fn new() -> Result<Self, regex::Error> {
        let routes = ROUTES
            .iter()
            .map(|(pattern, method, handler)| {
                Ok(RouteEntry {
                    pattern: Regex::new(pattern)?,
                    method: if *method == "POST" { Method::POST } else { Method::GET },
                    handler: *handler,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;
        Ok(Self { routes })
    }

    /// First entry whose pattern matches `path`.
    pub fn route<'a>(&self, method: &Method, path: &'a str) -> Result<RouteMatch<'a>, RouteError> {
        for entry in &self.routes {
            let Some(caps) = entry.pattern.captures(path) else {
                continue;
            };
            if entry.method != *method {
                return Err(RouteError::MethodNotAllowed);
            }
            let base = caps.get(1).map_or("", |m| m.as_str());
            let file = path[base.len()..].trim_start_matches('/');
            return Ok(RouteMatch {
                handler: entry.handler,
                base,
                file,
            });
        }
        Err(RouteError::NotFound)
    }
}
