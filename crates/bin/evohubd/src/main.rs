use anyhow::Context;
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

use evohubd::config::Config;
use evohubd::replay::Replay;

/// Commands one message or tick may queue before the output is drained.
const OUTBOUND_CAPACITY: usize = 256;

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.logging.filter))
        .with_writer(std::io::stderr)
        .init();

    let mut replay = Replay::new(config.engine, OUTBOUND_CAPACITY, tokio::io::stdout());
    replay
        .apply_schemas(&config.systems)
        .context("invalid configured schema")?;

    tracing::info!(input = %config.input.path, "evohubd replaying traffic");
    if config.reads_stdin() {
        let input = BufReader::new(tokio::io::stdin());
        replay
            .run(input, config.tick_interval(), shutdown_signal())
            .await?;
    } else {
        let file = tokio::fs::File::open(&config.input.path)
            .await
            .with_context(|| format!("failed to open {}", config.input.path))?;
        replay
            .run(BufReader::new(file), config.tick_interval(), shutdown_signal())
            .await?;
    }

    let (summary, _) = replay.finish().await?;
    tracing::info!(
        messages = summary.messages,
        rejected = summary.rejected,
        commands = summary.commands,
        "replay finished"
    );
    Ok(())
}
