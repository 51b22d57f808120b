//! Server configuration and command-line parsing

use crate::error::{ChatError, Result};
use crate::protocol::WireFormat;

/// Port the server listens on unless overridden
pub const DEFAULT_PORT: u16 = 10221;

/// Default number of worker threads
pub const DEFAULT_WORKERS: usize = 2;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Wire encoding used by every client of this run
    pub format: WireFormat,
    /// Worker threads for the runtime
    pub workers: usize,
    /// Listen port (0 binds an ephemeral port)
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            format: WireFormat::Textual,
            workers: DEFAULT_WORKERS,
            port: DEFAULT_PORT,
        }
    }
}

/// Outcome of command-line parsing
#[derive(Debug)]
pub enum Cli {
    /// Run the server with this configuration
    Run(ServerConfig),
    /// `--help` was given; print usage and exit 0
    Help,
}

/// Parse command-line arguments (without the program name)
pub fn parse_args<I>(args: I) -> Result<Cli>
where
    I: IntoIterator<Item = String>,
{
    let mut config = ServerConfig::default();

    for arg in args {
        if arg == "--help" {
            return Ok(Cli::Help);
        } else if let Some(value) = arg.strip_prefix("--format=") {
            config.format = value.parse()?;
        } else if let Some(value) = arg.strip_prefix("--workers=") {
            let workers: usize = value
                .parse()
                .map_err(|_| ChatError::config(format!("invalid worker count: {}", value)))?;
            if workers == 0 {
                return Err(ChatError::config("worker count must be positive"));
            }
            config.workers = workers;
        } else {
            return Err(ChatError::config(format!("unknown argument: {}", arg)));
        }
    }

    Ok(Cli::Run(config))
}

/// Print the usage text
pub fn print_usage() {
    println!("USAGE:");
    println!("    roomtalk [flags]");
    println!();
    println!("FLAGS:");
    println!("    --format=<textual|binary>   wire encoding for every client of this run");
    println!("                                (default: 'textual')");
    println!("    --workers=<int>             number of worker threads");
    println!("                                (default: '{}')", DEFAULT_WORKERS);
    println!("    --help                      print this help and exit");
}
