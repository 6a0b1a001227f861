pub mod acceptor;
pub mod auth;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod poller;
pub mod pool;
pub mod response;
pub mod server;
pub mod static_files;
pub mod timer;

/// Re-exports of common components for easier access
pub use acceptor::Acceptor;
pub use auth::{AuthStore, InMemoryAuthStore};
pub use buffer::Buffer;
pub use config::{ServerConfig, TriggerMode};
pub use connection::{HttpConnection, RequestContext};
pub use error::{ServerError, ServerResult};
pub use http::{HttpRequest, Method, ParseState, ParseStatus, Status};
pub use poller::{Event, Events, Interest, Poller};
pub use pool::WorkerPool;
pub use response::HttpResponse;
pub use server::{Server, ShutdownHandle, SlotId, Task};
pub use static_files::MappedFile;
pub use timer::HeapTimer;
