//! remote-profiler server entry point.
//!
//! Loads configuration from the environment and streams snapshots from the
//! built-in wall-clock profiler until interrupted.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use remote_profiler::{ProfilingServer, ServerConfig, WallClockProfiler};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env().context("loading configuration")?;
    tracing::info!(
        host = %config.listen_host,
        port = config.listen_port,
        interval_ms = config.interval_ms(),
        format = %config.wire_format,
        "starting remote-profiler"
    );

    let server = ProfilingServer::bind(config, Arc::new(WallClockProfiler::new()))
        .await
        .context("binding listener")?;
    tracing::info!(addr = %server.local_addr()?, "server listening");

    tokio::select! {
        () = server.serve() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for ctrl-c")?;
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}

/// Installs the global subscriber. `LOG_FORMAT=json` switches to
/// structured JSON lines; `RUST_LOG` controls filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
