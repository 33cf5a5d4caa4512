use anyhow::{Context, Result};
use gitrelay_hub::HubSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub git: GitConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Path prefix git clients use, e.g. `/git` gives `/git/<repo>/info/refs`
    #[serde(default = "default_route_prefix")]
    pub route_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one bare repository per name
    #[serde(default = "default_repos_dir")]
    pub repos_dir: PathBuf,
}

/// Server-wide switch for one git service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceAccess {
    Enabled,
    Disabled,
    /// Let each repository's `http.uploadpack` / `http.receivepack` decide
    RepoConfig,
}

impl ServiceAccess {
    pub fn as_toggle(self) -> Option<bool> {
        match self {
            ServiceAccess::Enabled => Some(true),
            ServiceAccess::Disabled => Some(false),
            ServiceAccess::RepoConfig => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_git_bin")]
    pub bin_path: PathBuf,
    #[serde(default = "default_service_access")]
    pub upload_pack: ServiceAccess,
    #[serde(default = "default_service_access")]
    pub receive_pack: ServiceAccess,
    /// Variable that receives the Basic-Auth user name (empty = not passed)
    #[serde(default)]
    pub auth_user_env_var: String,
    /// Variable that receives the Basic-Auth password (empty = not passed)
    #[serde(default)]
    pub auth_pass_env_var: String,
    /// Extra `KEY=VALUE` for every RPC subprocess (empty = none)
    #[serde(default)]
    pub default_env: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_ping_period_secs")]
    pub ping_period_secs: u64,
    #[serde(default = "default_pong_wait_secs")]
    pub pong_wait_secs: u64,
    #[serde(default = "default_write_wait_secs")]
    pub write_wait_secs: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Seconds a hub may sit without subscribers before it is torn down
    /// (0 = keep hubs for the life of the process)
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_bind_address() -> String {
    "127.0.0.1:9090".to_string()
}

fn default_route_prefix() -> String {
    "/git".to_string()
}

fn default_repos_dir() -> PathBuf {
    PathBuf::from("/tmp/repos")
}

fn default_git_bin() -> PathBuf {
    PathBuf::from("git")
}

fn default_service_access() -> ServiceAccess {
    ServiceAccess::Enabled
}

fn default_queue_capacity() -> usize {
    256
}

fn default_ping_period_secs() -> u64 {
    54
}

fn default_pong_wait_secs() -> u64 {
    60
}

fn default_write_wait_secs() -> u64 {
    10
}

fn default_max_message_size() -> usize {
    512
}

fn default_idle_timeout_secs() -> u64 {
    600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            route_prefix: default_route_prefix(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            repos_dir: default_repos_dir(),
        }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            bin_path: default_git_bin(),
            upload_pack: default_service_access(),
            receive_pack: default_service_access(),
            auth_user_env_var: String::new(),
            auth_pass_env_var: String::new(),
            default_env: String::new(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ping_period_secs: default_ping_period_secs(),
            pong_wait_secs: default_pong_wait_secs(),
            write_wait_secs: default_write_wait_secs(),
            max_message_size: default_max_message_size(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Route prefix with a leading slash and no trailing one (`""` for root).
    pub fn normalized_prefix(&self) -> String {
        let trimmed = self.route_prefix.trim_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("/{}", trimmed)
        }
    }
}

impl HubConfig {
    pub fn settings(&self) -> HubSettings {
        HubSettings {
            queue_capacity: self.queue_capacity.max(1),
            ping_period: Duration::from_secs(self.ping_period_secs),
            pong_wait: Duration::from_secs(self.pong_wait_secs),
            write_wait: Duration::from_secs(self.write_wait_secs),
            max_message_size: self.max_message_size,
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
        }
    }
}

impl Config {
    /// Load config from `path` (or the default location), creating it with
    /// defaults if it doesn't exist yet
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

        if config_path.exists() {
            let content = fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            Self::parse(&content)
        } else {
            let config = Config::default();
            config.save(&config_path)?;
            Ok(config)
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }
}

/// Get the gitrelay directory (~/.gitrelay)
pub fn get_gitrelay_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".gitrelay")
}

/// Get the config file path (~/.gitrelay/config.toml)
pub fn get_config_path() -> PathBuf {
    get_gitrelay_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "127.0.0.1:9090");
        assert_eq!(config.server.normalized_prefix(), "/git");
        assert_eq!(config.storage.repos_dir, PathBuf::from("/tmp/repos"));
        assert_eq!(config.git.upload_pack, ServiceAccess::Enabled);
        assert_eq!(config.git.receive_pack, ServiceAccess::Enabled);

        let hub = config.hub.settings();
        assert_eq!(hub.queue_capacity, 256);
        assert!(hub.ping_period < hub.pong_wait);
        assert_eq!(hub.idle_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_partial_config() -> Result<()> {
        let config = Config::parse(
            r#"
            [git]
            receive_pack = "repo-config"
            upload_pack = "disabled"
            auth_user_env_var = "REMOTE_USER"

            [hub]
            idle_timeout_secs = 0
            "#,
        )?;

        assert_eq!(config.git.receive_pack.as_toggle(), None);
        assert_eq!(config.git.upload_pack.as_toggle(), Some(false));
        assert_eq!(config.git.auth_user_env_var, "REMOTE_USER");
        assert_eq!(config.git.bin_path, PathBuf::from("git"));
        assert_eq!(config.hub.settings().idle_timeout, None);
        assert_eq!(config.server.bind_address, "127.0.0.1:9090");
        Ok(())
    }

    #[test]
    fn test_prefix_normalization() {
        let mut server = ServerConfig::default();
        server.route_prefix = "repos/".to_string();
        assert_eq!(server.normalized_prefix(), "/repos");
        server.route_prefix = "/".to_string();
        assert_eq!(server.normalized_prefix(), "");
    }

    #[test]
    fn test_load_creates_default() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = Config::load(Some(&path))?;
        assert!(path.exists());
        assert_eq!(config.server.route_prefix, "/git");

        let reloaded = Config::load(Some(&path))?;
        assert_eq!(reloaded.hub.queue_capacity, 256);
        Ok(())
    }
}
