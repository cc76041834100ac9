use crate::config::load_runner_config;
use crate::core::start_runner_with_config;
use dply_telemetry::init_tracing;
use tracing::{error, warn};

mod config;
mod core;
mod state;

fn main() -> anyhow::Result<()> {
    // Load runner config
    let runner_config = load_runner_config()?;

    // Initialize tracing
    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    // We start the runtime.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(runner_config))?;

    Ok(())
}

async fn async_main(runner_config: config::RunnerConfig) -> anyhow::Result<()> {
    if runner_config.actions.is_empty() {
        warn!("no actions configured, nothing to apply");
        return Ok(());
    }

    // We start the apply and log any errors.
    if let Err(err) = start_runner_with_config(runner_config).await {
        error!("an error occurred while applying actions: {err:#}");

        return Err(err);
    }

    Ok(())
}
