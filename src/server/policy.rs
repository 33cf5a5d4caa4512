//! Which git services a request may use

use gitrelay_git::Service;
use std::path::Path;
use tracing::debug;

use crate::command::GitBinary;
use crate::config::GitConfig;

/// Server-wide service toggles with a per-repository fallback
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    upload_pack: Option<bool>,
    receive_pack: Option<bool>,
    git: GitBinary,
}

impl AccessPolicy {
    pub fn new(upload_pack: Option<bool>, receive_pack: Option<bool>, git: GitBinary) -> Self {
        Self {
            upload_pack,
            receive_pack,
            git,
        }
    }

    pub fn from_config(config: &GitConfig) -> Self {
        Self::new(
            config.upload_pack.as_toggle(),
            config.receive_pack.as_toggle(),
            GitBinary::new(config.bin_path.clone()),
        )
    }

    fn toggle(&self, service: Service) -> Option<bool> {
        match service {
            Service::UploadPack => self.upload_pack,
            Service::ReceivePack => self.receive_pack,
        }
    }

    /// Decide whether `rpc` may run against `repo_dir`.
    ///
    /// With `enforce_content_type` the request must declare
    /// `application/x-git-<rpc>-request`. Services without a server-wide
    /// toggle are decided by the repository's `http.<service>` config.
    pub async fn is_allowed(
        &self,
        content_type: Option<&str>,
        rpc: &str,
        repo_dir: &Path,
        enforce_content_type: bool,
    ) -> bool {
        let Ok(service) = rpc.parse::<Service>() else {
            debug!(rpc, "unknown service");
            return false;
        };

        if enforce_content_type && content_type != Some(service.request_content_type()) {
            debug!(rpc, ?content_type, "content type mismatch");
            return false;
        }

        match self.toggle(service) {
            Some(allowed) => allowed,
            None => {
                let value = self.git.config_value(repo_dir, service.config_key()).await;
                service.enabled_by_config(value.as_deref())
            }
        }
    }
}
