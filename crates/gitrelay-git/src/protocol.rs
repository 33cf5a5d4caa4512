//! pkt-line framing
//!
//! Git frames protocol messages as a 4 hex digit length (which counts itself)
//! followed by the payload. `0000` is the flush packet.

use crate::service::Service;

/// Flush packet (marks end of a message section)
pub const FLUSH_PKT: &[u8] = b"0000";

/// Encode `data` as a single pkt-line.
pub fn pkt_line(data: &[u8]) -> Vec<u8> {
    let mut pkt = format!("{:04x}", data.len() + 4).into_bytes();
    pkt.extend_from_slice(data);
    pkt
}

/// `# service=git-<name>\n` followed by a flush, sent ahead of a version 0
/// ref advertisement.
pub fn service_announcement(service: Service) -> Vec<u8> {
    let mut out = pkt_line(format!("# service={}\n", service.as_str()).as_bytes());
    out.extend_from_slice(FLUSH_PKT);
    out
}
