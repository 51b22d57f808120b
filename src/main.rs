//! roomtalk server binary
//!
//! Usage:
//!   roomtalk [--format=<textual|binary>] [--workers=<int>]
//!   roomtalk --help

use std::process::ExitCode;

use tracing::error;

use roomtalk::config::{self, Cli};
use roomtalk::ChatServer;

fn main() -> ExitCode {
    let cli = match config::parse_args(std::env::args().skip(1)) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = match cli {
        Cli::Help => {
            config::print_usage();
            return ExitCode::SUCCESS;
        }
        Cli::Run(config) => config,
    };

    tracing_subscriber::fmt().init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        let server = ChatServer::bind(&config)?;
        server.run().await
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server error: {}", e);
            ExitCode::FAILURE
        }
    }
}
