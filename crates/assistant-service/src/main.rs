// assistant-service/src/main.rs

use assistant_service::{config::Config, run_server};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "assistant-service", about = "Voice assistant session service")]
struct Cli {
    /// Interface to listen on (overrides API_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides API_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite file for quota and threads (overrides STORE_PATH)
    #[arg(long)]
    store_path: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    assistant_service::telemetry::init_tracing();
    assistant_service::metrics::init_metrics();

    let cli = Cli::parse();
    let mut cfg = Config::from_env()?;
    if let Some(host) = cli.host {
        cfg.api_host = host;
    }
    if let Some(port) = cli.port {
        cfg.api_port = port;
    }
    if cli.store_path.is_some() {
        cfg.store_path = cli.store_path;
    }

    run_server(cfg).await
}
