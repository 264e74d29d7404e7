use std::path::PathBuf;
use clap::Parser;

use traffic_gateway::lifecycle::startup;

/// Adaptive traffic-control gateway.
#[derive(Parser)]
#[command(name = "traffic-gateway", version, about)]
struct Args {
    /// Path to the TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = startup::run(args.config).await {
        eprintln!("traffic-gateway: {}", e);
        std::process::exit(1);
    }
}
