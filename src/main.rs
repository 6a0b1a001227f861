use clap::Parser;
use log::{error, info};
use reactor_http_server::{
    InMemoryAuthStore, Server, ServerConfig, ServerError, ServerResult, TriggerMode,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Multi-threaded epoll HTTP server for static files
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON configuration file; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (1024-65535)
    #[arg(short, long)]
    port: Option<u16>,

    /// Trigger mode: 0 LT/LT, 1 LT/ET, 2 ET/LT, 3 ET/ET (listener/connection)
    #[arg(short = 'm', long)]
    trig_mode: Option<u8>,

    /// Idle connection timeout in milliseconds, 0 disables it
    #[arg(short, long)]
    timeout_ms: Option<u64>,

    /// Number of worker threads
    #[arg(long)]
    threads: Option<usize>,

    /// Document root
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Linger on close
    #[arg(long)]
    linger: bool,

    /// listen() backlog
    #[arg(long)]
    backlog: Option<u32>,

    /// Maximum concurrent connections
    #[arg(long)]
    max_connections: Option<usize>,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    save_config: Option<PathBuf>,
}

fn load_config(args: &Args) -> ServerResult<ServerConfig> {
    let mut config = match &args.config {
        Some(path) => ServerConfig::from_json_file(path)?,
        None => ServerConfig::new(),
    };

    if let Some(host) = &args.host {
        config.listen_address = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(selector) = args.trig_mode {
        config.trigger_mode = TriggerMode::from_selector(selector)?;
    }
    if let Some(ms) = args.timeout_ms {
        config.connection_timeout = Duration::from_millis(ms);
    }
    if let Some(threads) = args.threads {
        config.worker_threads = threads;
    }
    if let Some(root) = &args.root {
        config.doc_root = root.clone();
    }
    if args.linger {
        config.opt_linger = true;
    }
    if let Some(backlog) = args.backlog {
        config.backlog_size = backlog;
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }

    Ok(config)
}

fn main() -> ServerResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = load_config(&args)?;

    if let Some(path) = &args.save_config {
        config.save_to_json_file(path)?;
        info!("configuration saved to: {}", path.display());
        return Ok(());
    }

    let server = Server::new(config, Arc::new(InMemoryAuthStore::new()))?;

    let handle = server.shutdown_handle();
    ctrlc::set_handler(move || {
        info!("received shutdown signal, stopping server");
        handle.shutdown();
    })
    .map_err(|e| ServerError::Config(format!("failed to install signal handler: {}", e)))?;

    if let Err(e) = server.run() {
        error!("server error: {}", e);
        return Err(e);
    }

    Ok(())
}
