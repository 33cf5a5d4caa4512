use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gitrelay::{CommitHistoryReader, Config, GitBinary, GitRelayServer, RepositoryStore};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gitrelay")]
#[command(about = "Git smart HTTP server with live push notifications", long_about = None)]
struct Cli {
    /// Config file (default: ~/.gitrelay/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the bare repositories
    #[arg(long, global = true)]
    repos: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Start {
        /// Address to listen on, overrides `server.bind_address`
        #[arg(long)]
        addr: Option<String>,
    },
    /// Create an empty bare repository
    Init {
        name: String,
    },
    /// Print one page of a repository's commit history as JSON
    Log {
        name: String,
        #[arg(long, default_value_t = 0)]
        page: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gitrelay=info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(repos) = cli.repos {
        config.storage.repos_dir = repos;
    }
    let git = GitBinary::new(config.git.bin_path.clone());

    match cli.command {
        Commands::Start { addr } => {
            if let Some(addr) = addr {
                config.server.bind_address = addr;
            }
            std::fs::create_dir_all(&config.storage.repos_dir).with_context(|| {
                format!(
                    "Failed to create repositories directory {}",
                    config.storage.repos_dir.display()
                )
            })?;

            let server = GitRelayServer::new(&config)?;

            println!("Starting gitrelay on {}", server.addr());
            println!("Repositories: {}", config.storage.repos_dir.display());
            println!(
                "Git remote: http://{}{}/<repo>",
                server.addr(),
                config.server.normalized_prefix()
            );
            println!("Push events: ws://{}/events/<repo>", server.addr());

            server.run().await?;
        }
        Commands::Init { name } => {
            let store = RepositoryStore::new(config.storage.repos_dir.clone(), git);
            let path = store
                .create(&name)
                .await
                .with_context(|| format!("Failed to create repository {}", name))?;
            println!("Created: {}", path.display());
        }
        Commands::Log { name, page } => {
            let store = RepositoryStore::new(config.storage.repos_dir.clone(), git.clone());
            if !store.exists(&name) {
                anyhow::bail!("Repository not found: {}", name);
            }
            let logs = CommitHistoryReader::new(git)
                .read(&store.resolve_path(&name), page)
                .await;
            println!("{}", serde_json::to_string_pretty(&logs)?);
        }
    }

    Ok(())
}
