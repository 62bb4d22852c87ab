use std::process::ExitCode;

use fencehub_agent::{dispatch, params::FenceParams};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let params = if args.is_empty() {
        FenceParams::read_from_lines(std::io::stdin().lock())
    } else {
        FenceParams::read_from_args(args.into_iter())
    };
    let params = match params {
        Ok(params) => params,
        Err(err) => {
            eprintln!("fencehub-agent: {err}");
            return ExitCode::FAILURE;
        }
    };

    match dispatch(&params) {
        Ok(true) => {
            println!("Action successful");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            println!("Action failed");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("fencehub-agent: {err}");
            ExitCode::FAILURE
        }
    }
}
