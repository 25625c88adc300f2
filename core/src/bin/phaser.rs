//! Phaser CLI
//!
//! Runs and validates block programs from the command line and lists the
//! phase kinds the engine knows about.

use phaser_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
