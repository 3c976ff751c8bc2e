mod config;
mod console;
mod context;
mod controller;
mod dispatch;
mod job;
mod presenter;
mod protocol;
mod session;
mod sync;
mod transport;
mod validate;

use anyhow::Result;
use std::{env, sync::Arc};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use console::ConsolePresenter;
use controller::Controller;
use sync::SyncEngine;
use transport::{Transport, WsConnector};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "controller.toml".to_string());
    let cfg = config::load(&config_path)?;
    tracing::info!(url = %cfg.url(), "controller starting");

    // ── Transport ───────────────────────────────────────────────────
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (transport, handle) = Transport::new(
        cfg.url(),
        cfg.policy(),
        WsConnector,
        controller::dispatcher(events_tx.clone()),
    );
    let transport_task = tokio::spawn(transport.run());
    tokio::spawn(controller::forward_connection_state(
        handle.subscribe(),
        events_tx.clone(),
    ));

    // ── Controller + console ────────────────────────────────────────
    let form: console::FormBuffer = Arc::default();
    let controller = Controller::new(
        SyncEngine::new(handle.clone(), cfg.pacing()),
        ConsolePresenter::new(Arc::clone(&form)),
        events_tx.clone(),
        cfg.scheduler.default_plant_count,
    );
    let controller_task = tokio::spawn(controller.run(events_rx));

    let lines = console::stdin_lines()?;
    tokio::select! {
        res = console::run(lines, form, events_tx) => {
            if let Err(e) = res {
                tracing::error!("console failed: {e:#}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted");
        }
    }

    handle.close();
    if let Err(e) = transport_task.await {
        tracing::warn!("transport task ended abnormally: {e}");
    }
    controller_task.abort();
    tracing::info!("controller stopped");
    Ok(())
}
