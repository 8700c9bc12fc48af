use std::path::PathBuf;

use crate::handlers::cgi;

/// Hard ceiling on simultaneously bound ports.
pub const MAX_PORTS: usize = 5;
/// First port bound when none is configured.
pub const INITIAL_PORT: u16 = 8080;

/// Startup configuration for one [`crate::server::Server`] instance.
///
/// Mappings from port to document root are not part of the options; they
/// live in the [`crate::router::PortRouter`] and change at runtime.
#[derive(Clone)]
pub struct ServerOptions {
    /// First port to bind; the remaining ports follow sequentially.
    pub start_port: u16,
    /// Number of sequential ports to bind, clamped to [`MAX_PORTS`].
    pub port_count: usize,
    /// Extension (without dot, lowercase) that triggers script execution.
    pub script_extension: String,
    /// File served when a requested directory contains it.
    pub index_file: String,
    /// Script interpreter executable. `None` disables script execution.
    pub interpreter: Option<PathBuf>,
    /// Idle connection timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            start_port: INITIAL_PORT,
            port_count: MAX_PORTS,
            script_extension: "php".to_string(),
            index_file: "index.html".to_string(),
            interpreter: cgi::probe_interpreter(),
            timeout_seconds: 30,
        }
    }
}

impl ServerOptions {
    pub fn port_count(&self) -> usize {
        self.port_count.min(MAX_PORTS).max(1)
    }

    /// `http://localhost:{port}/`, the form shown to the user per mapping.
    pub fn format_host_uri(port: u16) -> String {
        format!("http://localhost:{}/", port)
    }
}
