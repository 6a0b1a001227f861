use std::io;
use thiserror::Error;

/// Errors surfaced while configuring or running the server.
///
/// Per-connection I/O failures never reach this type; they close the
/// connection instead.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed request line, unsupported method, or bad `Content-Length`
    #[error("bad request: {0}")]
    HttpParse(String),

    /// Reactor or worker pool failure
    #[error("reactor error: {0}")]
    Reactor(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config file error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ServerResult<T> = Result<T, ServerError>;
