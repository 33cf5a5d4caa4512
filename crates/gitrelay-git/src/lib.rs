//! Git smart HTTP wire helpers for gitrelay
//!
//! Everything the relay needs to know about the git protocol without being a
//! git implementation: pkt-line framing for the service announcement, the two
//! stateless-RPC services and their content types, protocol version
//! negotiation, and extraction of ref-update metadata from push payloads.

pub mod error;
pub mod protocol;
pub mod push;
pub mod service;

pub use error::{Error, Result};
pub use push::{parse_push_metadata, split_push_payload, PushEvent, PushKind};
pub use service::{ProtocolVersion, Service};
