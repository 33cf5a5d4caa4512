use axum::http::{header, HeaderMap};
use base64::Engine;

/// Credentials from an HTTP Basic `Authorization` header.
///
/// They are not verified here, only handed to the git subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

pub fn basic_credentials(headers: &HeaderMap) -> Option<BasicCredentials> {
    let header_value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = header_value.strip_prefix("Basic ")?;

    let engine = base64::engine::general_purpose::STANDARD;
    let decoded = String::from_utf8(engine.decode(encoded.trim()).ok()?).ok()?;
    let (username, password) = decoded.split_once(':')?;

    Some(BasicCredentials {
        username: username.to_string(),
        password: password.to_string(),
    })
}
