mod config;
mod error;
mod input;
mod relay;

use clap::Parser;

use output_clickhouse::ClickHouseOutput;
use sink_api::MetricSink;

use config::{Cli, RelayConfig};
use error::RelayError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "metrics-relay failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), RelayError> {
    tracing::info!(config = %cli.config, "loading configuration");
    let config = RelayConfig::load(&cli.config)?;
    config.relay.validate()?;

    tracing::info!(
        host = %config.clickhouse.host,
        database = %config.clickhouse.database,
        batch_size = config.relay.batch_size,
        flush_interval_ms = config.relay.flush_interval_ms,
        "starting relay"
    );
    let output = ClickHouseOutput::from_config(config.clickhouse)?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let stats = relay::run(stdin, &output, &config.relay, shutdown).await?;
    output.close().await?;

    tracing::info!(
        batches = stats.batches,
        written = stats.written,
        dropped = stats.dropped,
        malformed = stats.malformed,
        "relay stopped"
    );
    Ok(())
}
