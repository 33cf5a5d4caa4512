//! Ref-update metadata carried by a receive-pack request
//!
//! A push body is a pkt-line list of `<old> <new> <ref>` commands followed by
//! a flush and, unless every command is a deletion, a PACK stream. Only the
//! first command is reported: one event per push.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Flush packet immediately followed by a version 2 PACK header.
const PACK_BOUNDARY: &[u8; 15] = b"0000PACK\x00\x00\x00\x02\x00\x00\x00";
/// Flush packet closing a command list that has no pack (deletions only).
const FLUSH_BOUNDARY: &[u8; 4] = b"0000";

const NULL_SHA: &str = "0000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PushKind {
    Create,
    Update,
    Delete,
}

/// One ref update as delivered to live subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "type")]
    pub kind: PushKind,
    /// `None` when the ref did not exist before the push
    #[serde(rename = "oldSha")]
    pub old_sha: Option<String>,
    /// `None` when the push deletes the ref
    #[serde(rename = "newSha")]
    pub new_sha: Option<String>,
    #[serde(rename = "ref")]
    pub ref_name: String,
}

impl PushEvent {
    /// JSON encoding sent to subscribers.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Command section of a push body, i.e. everything before the pack data.
///
/// Looks for the flush + PACK header first; without one the body is taken to
/// be a deletion-only push and is cut at the last flush packet.
pub fn split_push_payload(body: &[u8]) -> Option<&[u8]> {
    let boundary = find(body, PACK_BOUNDARY).or_else(|| rfind(body, FLUSH_BOUNDARY))?;
    Some(&body[..boundary])
}

/// Parse the first ref-update command of a push.
///
/// The leading 4 bytes are the pkt-line length and are ignored. The rest must
/// hold at least three space separated fields; the ref name ends at the
/// first NUL (capabilities follow it) or newline.
pub fn parse_push_metadata(metadata: &[u8]) -> Result<PushEvent> {
    let line = metadata
        .get(4..)
        .ok_or_else(|| Error::PushMetadata("payload shorter than pkt-line header".into()))?;

    let fields: Vec<&[u8]> = line.split(|b| *b == b' ').collect();
    if fields.len() < 3 {
        return Err(Error::PushMetadata(format!(
            "expected 3 fields, found {}",
            fields.len()
        )));
    }

    let old_sha = parse_sha(fields[0])?;
    let new_sha = parse_sha(fields[1])?;

    let ref_field = fields[2];
    let ref_end = ref_field
        .iter()
        .position(|b| *b == 0 || *b == b'\n')
        .unwrap_or(ref_field.len());
    let ref_name = std::str::from_utf8(&ref_field[..ref_end])
        .map_err(|_| Error::PushMetadata("ref name is not utf-8".into()))?;
    if ref_name.is_empty() {
        return Err(Error::PushMetadata("empty ref name".into()));
    }

    let kind = if old_sha == NULL_SHA {
        PushKind::Create
    } else if new_sha == NULL_SHA {
        PushKind::Delete
    } else {
        PushKind::Update
    };

    Ok(PushEvent {
        kind,
        old_sha: non_null(old_sha),
        new_sha: non_null(new_sha),
        ref_name: ref_name.to_string(),
    })
}

fn parse_sha(field: &[u8]) -> Result<&str> {
    match std::str::from_utf8(field) {
        Ok(sha) if sha.len() == 40 && sha.bytes().all(|b| b.is_ascii_hexdigit()) => Ok(sha),
        _ => Err(Error::PushMetadata(format!(
            "invalid object id {:?}",
            String::from_utf8_lossy(field)
        ))),
    }
}

fn non_null(sha: &str) -> Option<String> {
    (sha != NULL_SHA).then(|| sha.to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
