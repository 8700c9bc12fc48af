use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use gomiweb::options::{MAX_PORTS, ServerOptions};
use gomiweb::server::Server;

/// Local multi-port web server for testing static sites, scripts and
/// rewrite rules.
#[derive(Parser)]
#[command(name = "gomiweb", version)]
struct Cli {
    /// Folders to serve, one per port: either `PORT=DIR` or a bare DIR
    /// assigned to the next sequential port.
    #[arg(value_name = "MAPPING", required = true)]
    mappings: Vec<String>,

    /// First port to bind; the remaining ports follow sequentially.
    #[arg(long, default_value_t = gomiweb::INITIAL_PORT)]
    port: u16,

    /// Number of sequential ports to bind (at most 5).
    #[arg(long, default_value_t = MAX_PORTS)]
    ports: usize,

    /// Script interpreter executable; defaults to probing for `php/php`
    /// next to the binary.
    #[arg(long)]
    interpreter: Option<PathBuf>,

    /// Extension handled by the script interpreter.
    #[arg(long, default_value = "php")]
    script_extension: String,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut options = ServerOptions {
        start_port: cli.port,
        port_count: cli.ports,
        script_extension: cli.script_extension.to_ascii_lowercase(),
        ..ServerOptions::default()
    };
    if cli.interpreter.is_some() {
        options.interpreter = cli.interpreter;
    }

    match &options.interpreter {
        Some(path) => info!("[Setup] Script interpreter: {}", path.display()),
        None => info!("[Setup] No script interpreter found; script execution disabled"),
    }

    let mut server = Server::new(options);
    let router = server.router();

    let mut next_port = cli.port;
    for mapping in &cli.mappings {
        let (port, dir) = match mapping.split_once('=') {
            Some((port_str, dir)) => match port_str.parse::<u16>() {
                Ok(port) => (port, dir),
                Err(_) => {
                    error!("[Setup] Invalid mapping '{}'", mapping);
                    return ExitCode::FAILURE;
                }
            },
            None => {
                let port = next_port;
                next_port += 1;
                (port, mapping.as_str())
            }
        };

        let root = PathBuf::from(dir);
        if !root.is_dir() {
            error!("[Setup] Not a directory: {}", root.display());
            return ExitCode::FAILURE;
        }
        router.set_mapping(port, &root);
        info!(
            "[Setup] {} -> {}",
            ServerOptions::format_host_uri(port),
            root.display()
        );
    }

    if let Err(e) = server.start() {
        error!("[Fatal] {}", e);
        return ExitCode::FAILURE;
    }

    loop {
        std::thread::sleep(Duration::from_secs(60));
    }
}
