// Flic 2 daemon: keeps configured and stored buttons connected through a link bridge.

mod config;
mod firmware;
mod logging;
mod manager;
mod store;
mod transport;

use anyhow::Context;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("flic2-linux {}", VERSION);
            return Ok(());
        }
    }

    let cfg = config::load();
    logging::init(&cfg.log_level);
    log::info!("flic2-linux {VERSION}, bridge {}", cfg.bridge);

    let store = store::JsonStore::open(&cfg.store_path)
        .with_context(|| format!("opening {}", cfg.store_path.display()))?;

    let manager = manager::Manager::new(cfg, store)?;
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        tokio::select! {
            r = manager.run() => r,
            r = shutdown_signal() => {
                log::info!("shutting down");
                r
            }
        }
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix). Dropping the runtime closes every bridge link.
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
