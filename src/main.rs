use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use bandpractice_lib::config::Config;

#[derive(Parser)]
#[command(name = "bandpractice")]
#[command(about = "Band Practice Pro server", long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and environment)
    #[arg(short, long)]
    port: Option<u16>,

    /// SQLite database file (overrides config and environment)
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_env()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(db) = args.db {
        config.database.path = Some(db);
    }

    log::info!("Starting Band Practice Pro v{}", env!("CARGO_PKG_VERSION"));
    bandpractice_lib::run(config).await
}
