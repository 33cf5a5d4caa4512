//! Stateless-RPC services and protocol versions

use std::fmt;
use std::str::FromStr;

use crate::Error;

/// The two services git runs over smart HTTP
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    UploadPack,
    ReceivePack,
}

impl Service {
    /// Parse the `service` query parameter of `info/refs` (`git-upload-pack`).
    ///
    /// Anything without the `git-` prefix is a dumb-protocol request and
    /// yields `None`, as does an unknown service name.
    pub fn from_query(s: &str) -> Option<Self> {
        s.strip_prefix("git-").and_then(|rpc| rpc.parse().ok())
    }

    /// Name as passed to the git executable (`upload-pack`).
    pub fn rpc_name(&self) -> &'static str {
        match self {
            Service::UploadPack => "upload-pack",
            Service::ReceivePack => "receive-pack",
        }
    }

    /// Name as announced on the wire (`git-upload-pack`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::UploadPack => "git-upload-pack",
            Service::ReceivePack => "git-receive-pack",
        }
    }

    pub fn request_content_type(&self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-request",
            Service::ReceivePack => "application/x-git-receive-pack-request",
        }
    }

    pub fn result_content_type(&self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-result",
            Service::ReceivePack => "application/x-git-receive-pack-result",
        }
    }

    pub fn advertisement_content_type(&self) -> &'static str {
        match self {
            Service::UploadPack => "application/x-git-upload-pack-advertisement",
            Service::ReceivePack => "application/x-git-receive-pack-advertisement",
        }
    }

    /// Repository config key that enables the service (`http.uploadpack`).
    pub fn config_key(&self) -> &'static str {
        match self {
            Service::UploadPack => "http.uploadpack",
            Service::ReceivePack => "http.receivepack",
        }
    }

    /// Value assumed when the repository does not set `config_key`.
    ///
    /// Fetching is open unless switched off, pushing must be switched on.
    pub fn enabled_by_config(&self, value: Option<&str>) -> bool {
        match self {
            Service::UploadPack => value != Some("false"),
            Service::ReceivePack => value == Some("true"),
        }
    }
}

impl FromStr for Service {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload-pack" => Ok(Service::UploadPack),
            "receive-pack" => Ok(Service::ReceivePack),
            other => Err(Error::UnknownService(other.to_string())),
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.rpc_name())
    }
}

/// Wire protocol version requested through the `Git-Protocol` header
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct ProtocolVersion(pub u8);

impl ProtocolVersion {
    pub const V0: ProtocolVersion = ProtocolVersion(0);

    /// Read `version=N` out of a colon separated `Git-Protocol` header.
    /// A missing header or one without a version means version 0.
    pub fn from_header(header: Option<&str>) -> Self {
        header
            .into_iter()
            .flat_map(|h| h.split(':'))
            .filter_map(|param| param.trim().strip_prefix("version="))
            .filter_map(|v| v.parse().ok())
            .last()
            .map(ProtocolVersion)
            .unwrap_or_default()
    }

    /// Version 0 advertisements carry the `# service=` preamble.
    pub fn wants_service_announcement(&self) -> bool {
        *self == Self::V0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_query() {
        assert_eq!(Service::from_query("git-upload-pack"), Some(Service::UploadPack));
        assert_eq!(Service::from_query("git-receive-pack"), Some(Service::ReceivePack));
        assert_eq!(Service::from_query("upload-pack"), None);
        assert_eq!(Service::from_query("git-archive"), None);
        assert_eq!(Service::from_query(""), None);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(
            Service::ReceivePack.request_content_type(),
            "application/x-git-receive-pack-request"
        );
        assert_eq!(
            Service::UploadPack.advertisement_content_type(),
            "application/x-git-upload-pack-advertisement"
        );
    }

    #[test]
    fn test_config_defaults_are_asymmetric() {
        assert!(Service::UploadPack.enabled_by_config(None));
        assert!(Service::UploadPack.enabled_by_config(Some("true")));
        assert!(!Service::UploadPack.enabled_by_config(Some("false")));

        assert!(!Service::ReceivePack.enabled_by_config(None));
        assert!(!Service::ReceivePack.enabled_by_config(Some("yes")));
        assert!(Service::ReceivePack.enabled_by_config(Some("true")));
    }

    #[test]
    fn test_protocol_version() {
        assert_eq!(ProtocolVersion::from_header(None), ProtocolVersion::V0);
        assert_eq!(ProtocolVersion::from_header(Some("version=2")), ProtocolVersion(2));
        assert_eq!(
            ProtocolVersion::from_header(Some("object-format=sha1:version=1")),
            ProtocolVersion(1)
        );
        assert_eq!(ProtocolVersion::from_header(Some("garbage")), ProtocolVersion::V0);
        assert!(ProtocolVersion::from_header(Some("version=0")).wants_service_announcement());
        assert!(!ProtocolVersion(2).wants_service_announcement());
    }
}
