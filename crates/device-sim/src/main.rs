//! Stand-in for the irrigation device's WebSocket endpoint, for running the
//! controller without hardware.

mod store;

use anyhow::{Context, Result};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use std::{env, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use store::{DeviceStore, Outcome};

struct AppState {
    store: Mutex<DeviceStore>,
    /// Frames every connected client receives.
    broadcaster: broadcast::Sender<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port: u16 = env_or("SIM_PORT", 8081);
    let plant_count = env_or::<u8>("SIM_PLANT_COUNT", 3).clamp(1, 8);

    let (broadcaster, _) = broadcast::channel(16);
    let state = Arc::new(AppState {
        store: Mutex::new(DeviceStore::new(plant_count)),
        broadcaster,
    });
    let router = Router::new().route("/ws", get(ws_handler)).with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, plant_count, "device simulator listening on ws://{addr}/ws");

    axum::serve(listener, router).await.context("server error")
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| run_connection(socket, state))
}

async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    info!("client connected");
    let (mut tx, mut rx) = socket.split();
    let mut announcements = state.broadcaster.subscribe();

    loop {
        tokio::select! {
            msg = rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let outcome = state.store.lock().await.handle(text.as_str());
                    match outcome {
                        Outcome::Reply(frame) => {
                            if tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        Outcome::Broadcast(frame) => {
                            // Reaches this client too, through its own subscription.
                            let _ = state.broadcaster.send(frame.to_string());
                        }
                        Outcome::Nothing => {}
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("receive failed: {e}");
                    break;
                }
            },
            frame = announcements.recv() => match frame {
                Ok(frame) => {
                    if tx.send(Message::Text(frame.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => warn!(skipped = n, "client lagging"),
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    info!("client disconnected");
}
