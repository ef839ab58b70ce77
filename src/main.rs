//! stackweave CLI: containerized web-app stacks, composed and wired.

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "stackweave",
    version,
    about = "Compose containerized web-app stacks: network, storage, database, service and the rules between them"
)]
struct Cli {
    #[command(subcommand)]
    command: stackweave::cli::Commands,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = stackweave::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
