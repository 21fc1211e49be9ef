mod cli;

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    // RUST_LOG manda; si no está, nivel info para los crates propios
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vacstats=info,worker=info,common=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    cli::run().await
}
