use clap::Parser;
use simple_queue_demo::{initialize_logging, run_cli, Cli};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(&cli.log_level, cli.json_logs) {
        eprintln!("{e}");
        std::process::exit(e.exit_code());
    }

    if let Err(e) = run_cli(cli).await {
        error!(error = %e, "simple-queue-demo failed");
        std::process::exit(e.exit_code());
    }
}
