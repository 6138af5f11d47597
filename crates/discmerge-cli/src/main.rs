//! discmerge - Merge and subset tool for extracted disc export datasets
//!
//! Usage:
//!   discmerge plan   ...   Dry run a merge
//!   discmerge merge  ...   Union merge into a new folder
//!   discmerge subset ...   Build a disc with selected songs only
//!   discmerge --help       Show help

use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        cli::print_help();
        return Ok(());
    }
    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("discmerge v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let (command, options) = match cli::parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            cli::print_help();
            std::process::exit(2);
        }
    };

    init_logging();
    cli::run(command, options)
}

fn init_logging() {
    // Stdout is reserved for reports and JSON
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
