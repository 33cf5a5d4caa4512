pub mod command;
pub mod config;
pub mod history;
pub mod server;
pub mod storage;

pub use command::{CommandError, GitBinary};
pub use config::{get_config_path, get_gitrelay_dir, Config};
pub use gitrelay_git::{PushEvent, PushKind, Service};
pub use gitrelay_hub::{HubSettings, SuperHub};
pub use history::{CommitHistoryReader, CommitItem, Signature};
pub use server::GitRelayServer;
pub use storage::{is_valid_name, RepositoryStore, StoreError};
