//! Entry point for hostpulse_agent. Parses args, builds the platform source
//! and serves snapshots over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use time::UtcOffset;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hostpulse_agent::collector::Collector;
use hostpulse_agent::config::{parse_args, Command, Config};
use hostpulse_agent::host::{Host, SystemHost};
use hostpulse_agent::http::router;
use hostpulse_agent::source::PlatformSource;
use hostpulse_agent::state::AppState;

fn main() -> anyhow::Result<()> {
    let cfg = match parse_args(std::env::args(), |k| std::env::var(k).ok()) {
        Ok(Command::Run(cfg)) => cfg,
        Ok(Command::Help(text)) => {
            println!("{text}");
            return Ok(());
        }
        Err(msg) => anyhow::bail!(msg),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // The local offset is only readable while the process is single-threaded.
    let offset = match UtcOffset::current_local_offset() {
        Ok(o) => o,
        Err(e) => {
            warn!("local UTC offset unavailable ({e}), reporting time in UTC");
            UtcOffset::UTC
        }
    };

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?
        .block_on(serve(cfg, offset))
}

async fn serve(cfg: Config, offset: UtcOffset) -> anyhow::Result<()> {
    let host: Arc<dyn Host> = Arc::new(SystemHost::new(cfg.command_timeout));
    let os = host.os_description();
    let source = PlatformSource::new(cfg.platform, host, cfg.disk_path.clone());
    info!(platform = %source.platform(), os = %os, "metric source ready");

    let state = AppState::new(Collector::new(Arc::new(source), os, offset));
    let app = router(state, &cfg.path);

    let addr = SocketAddr::new(cfg.bind, cfg.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        "hostpulse agent serving http://{}{}",
        listener.local_addr()?,
        cfg.path
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("http server")?;
    Ok(())
}
