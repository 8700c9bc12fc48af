//! gomiweb: a local multi-port HTTP test server. Each port maps to a
//! document root; requests are resolved through an Apache-style rewrite
//! subset, then served as script output, a directory index or listing, or
//! a static file.

pub mod dispatch;
pub mod error;
pub mod handlers;
pub mod http;
pub mod listing;
pub mod mime;
pub mod options;
pub mod rewrite;
pub mod router;
pub mod server;

pub use dispatch::Dispatcher;
pub use error::ServerError;
pub use options::{INITIAL_PORT, MAX_PORTS, ServerOptions};
pub use router::PortRouter;
pub use server::Server;
