use std::process::ExitCode;

use clap::Parser;
use fencehub_server::{Server, config::ServerConfig, server::VERSION_STRING};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let config = ServerConfig::parse();

    println!("Fencehub Server, version {VERSION_STRING}");
    let server = match Server::from_config(&config) {
        Ok(server) => server,
        Err(err) => {
            eprintln!("fencehub-server: initialization failed: {err}");
            return ExitCode::FAILURE;
        }
    };

    match server.run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("fencehub-server: {err}");
            ExitCode::FAILURE
        }
    }
}
