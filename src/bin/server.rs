//! AtlasWAL Server Binary
//!
//! Runs a master node (serving its log read-write) or, with `--master`, a
//! slave node replicating from a master and serving its copy read-only.

use std::fs;
use std::process;

use atlaswal::network::Server;
use atlaswal::{Config, LogStore, SlaveLog, Wal};
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

/// AtlasWAL Server
#[derive(Parser, Debug)]
#[command(name = "atlaswal-server")]
#[command(about = "Segmented write-ahead log server with master-slave replication")]
#[command(version)]
struct Args {
    /// Properties file (key=value lines); flags below override it
    #[arg(short, long)]
    config: Option<String>,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<String>,

    /// Listen address (host:port)
    #[arg(short, long)]
    listen: Option<String>,

    /// Maximum concurrent connections
    #[arg(short, long)]
    max_connections: Option<usize>,

    /// Replicate from the master at this address (runs as a slave)
    #[arg(long)]
    master: Option<String>,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,atlaswal=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    tracing::info!("AtlasWAL Server v{}", atlaswal::VERSION);
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!("Listen address: {}", config.listen_addr);

    let result = match &args.master {
        Some(master) => run_slave(config, master),
        None => run_master(config),
    };

    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
        process::exit(1);
    }

    tracing::info!("Server stopped");
}

fn load_config(args: &Args) -> atlaswal::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_properties_str(&fs::read_to_string(path)?)?,
        None => Config::default(),
    };

    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.into();
    }
    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    Ok(config)
}

fn run_master(config: Config) -> atlaswal::Result<()> {
    let store = LogStore::open(config.clone())?;
    tracing::info!("Master log opened, last entry {:?}", store.last()?.map(|e| e.lsn));

    let server = Server::bind(config, store.clone(), false)?;
    let result = server.run();
    store.close();
    result
}

fn run_slave(config: Config, master: &str) -> atlaswal::Result<()> {
    tracing::info!("Slave of master {}", master);

    let slave = SlaveLog::connect(config.clone(), master)?;
    slave.open()?;

    let local = slave
        .local()
        .ok_or_else(|| atlaswal::WalError::NotOpen("slave log not open".to_string()))?;

    let server = Server::bind(config, local, true)?;
    let result = server.run();
    slave.close();
    result
}
