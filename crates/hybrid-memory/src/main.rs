// hybrid-memory/src/main.rs

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use hybrid_memory::{config::Config, run_server};

/// Hybrid memory service
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// SQLite database file (overrides MEMORY_DB_PATH)
    #[arg(long)]
    db_path: Option<std::path::PathBuf>,

    /// Bind address (overrides API_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides API_PORT)
    #[arg(long)]
    port: Option<u16>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::from_env()?;
    if let Some(db_path) = cli.db_path {
        cfg.db_path = db_path;
    }
    if let Some(host) = cli.host {
        cfg.api_host = host;
    }
    if let Some(port) = cli.port {
        cfg.api_port = port;
    }

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
