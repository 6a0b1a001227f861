use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Edge/level trigger selection for the listening socket and for client
/// connections, in that order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMode {
    LtLt,
    LtEt,
    EtLt,
    EtEt,
}

impl TriggerMode {
    /// Map the numeric selector 0..=3
    pub fn from_selector(selector: u8) -> ServerResult<Self> {
        match selector {
            0 => Ok(TriggerMode::LtLt),
            1 => Ok(TriggerMode::LtEt),
            2 => Ok(TriggerMode::EtLt),
            3 => Ok(TriggerMode::EtEt),
            _ => Err(ServerError::Config(format!(
                "trigger mode must be 0..=3, got {}",
                selector
            ))),
        }
    }

    pub fn listen_edge_triggered(&self) -> bool {
        matches!(self, TriggerMode::EtLt | TriggerMode::EtEt)
    }

    pub fn conn_edge_triggered(&self) -> bool {
        matches!(self, TriggerMode::LtEt | TriggerMode::EtEt)
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    // Network configuration
    pub listen_address: String,
    pub port: u16,
    pub backlog_size: u32,
    pub opt_linger: bool,
    pub trigger_mode: TriggerMode,

    /// Idle timeout per connection; zero disables it
    pub connection_timeout: Duration,

    // Thread configuration
    pub worker_threads: usize,
    /// `None` for an unbounded task queue
    pub task_queue_capacity: Option<usize>,

    // Capacity limits
    pub max_connections: usize,
    pub max_events: usize,
    pub max_request_size: usize,

    /// Directory static files are served from
    pub doc_root: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            port: 8080,
            backlog_size: 1024,
            opt_linger: false,
            trigger_mode: TriggerMode::EtEt,

            connection_timeout: Duration::from_secs(60),

            worker_threads: num_cpus::get(),
            task_queue_capacity: None,

            max_connections: 4096,
            max_events: 1024,
            max_request_size: 1024 * 1024, // 1 MB

            doc_root: PathBuf::from("resources"),
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address and port to listen on
    pub fn with_address(mut self, address: &str, port: u16) -> Self {
        self.listen_address = address.to_string();
        self.port = port;
        self
    }

    /// Set the trigger mode
    pub fn with_trigger_mode(mut self, mode: TriggerMode) -> Self {
        self.trigger_mode = mode;
        self
    }

    /// Set the idle connection timeout
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the directory to serve files from
    pub fn with_doc_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.doc_root = root.into();
        self
    }

    /// Enable or disable lingering close
    pub fn with_linger(mut self, linger: bool) -> Self {
        self.opt_linger = linger;
        self
    }

    /// Get the full address string (address:port)
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }

    /// Reject values the server cannot start with
    pub fn validate(&self) -> ServerResult<()> {
        if self.port < 1024 {
            return Err(ServerError::Config(format!(
                "port {} outside 1024..=65535",
                self.port
            )));
        }
        if self.worker_threads == 0 {
            return Err(ServerError::Config("worker_threads must be > 0".to_string()));
        }
        if self.max_connections == 0 || self.max_connections > u32::MAX as usize {
            return Err(ServerError::Config(format!(
                "max_connections {} out of range",
                self.max_connections
            )));
        }
        if self.max_events == 0 {
            return Err(ServerError::Config("max_events must be > 0".to_string()));
        }
        if self.task_queue_capacity == Some(0) {
            return Err(ServerError::Config(
                "task_queue_capacity must be > 0 when set".to_string(),
            ));
        }
        if !self.doc_root.is_dir() {
            return Err(ServerError::Config(format!(
                "doc_root {} is not a directory",
                self.doc_root.display()
            )));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_json_file<P: AsRef<Path>>(&self, path: P) -> ServerResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}
