//! Identilink Gateway server

use clap::Parser;
use identilink_gateway::{init_tracing, start_gateway, ServeArgs};

#[derive(Parser)]
#[command(
    name = "identilink-gateway",
    version,
    about = "Identilink contact identity resolution service"
)]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.serve.log_file.as_deref())?;
    let config = cli.serve.resolve_config()?;
    start_gateway(config).await
}
