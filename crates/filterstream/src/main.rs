//! filterstream: mock of the legacy `statuses/filter` streaming endpoint
//!
//! Serves until SIGINT or SIGTERM, then shuts down with a grace period.
//! Exits non-zero when the address cannot be bound or open streams outlive
//! the grace period.

mod cli;
mod signal;

use anyhow::Context;
use cli::Cli;
use filterstream_core::{Server, ServerConfig, ShutdownContext};
use signal::ShutdownSignal;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// Use mimalloc for better performance
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse_args().into_config();
    if let Err(e) = config.validate() {
        error!("{e}");
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServerConfig) -> anyhow::Result<()> {
    let mut signals = ShutdownSignal::register().context("failed to register signal handlers")?;
    let grace = config.shutdown_grace;

    let server = Server::new(config);
    info!(addr = %server.config().addr, "starting server");

    let mut serving = tokio::spawn({
        let server = server.clone();
        async move { server.serve().await }
    });

    tokio::select! {
        res = &mut serving => {
            res.context("server task failed")?.context("server stopped")?;
            // serve only returns cleanly after a shutdown, and none was requested
            anyhow::bail!("server stopped unexpectedly");
        }
        signal = signals.recv() => info!(signal, "shutting down server"),
    }

    server
        .shutdown(ShutdownContext::new(grace))
        .await
        .context("server shutdown failed")?;
    serving
        .await
        .context("server task failed")?
        .context("server stopped")?;

    info!("server exited properly");
    Ok(())
}
