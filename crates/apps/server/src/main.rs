//! Simulated track feed.
//!
//! Serves a stream-service compatible WebSocket at `/`: clients send the
//! handshake, get a reply, then receive `featureResult` frames for a set of
//! deterministic moving tracks.

mod simulation;
mod ws_feed;

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::Method;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::broadcast;
use tokio::time::{Instant, MissedTickBehavior};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::simulation::{SimConfig, Simulation};
use crate::ws_feed::{FeedState, handle_feed_socket};

const FRAME_BACKLOG: usize = 64;

#[derive(Clone)]
struct AppState {
    feed: Arc<FeedState>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr: SocketAddr = match env::var("FEED_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8000".to_string())
        .parse()
    {
        Ok(addr) => addr,
        Err(e) => {
            error!("invalid FEED_ADDR: {e}");
            std::process::exit(1);
        }
    };

    let defaults = SimConfig::default();
    let sim = Simulation::new(SimConfig {
        tracks: env_var_usize("FEED_TRACKS", defaults.tracks),
        types: env_var_u32("FEED_TYPES", defaults.types),
        batch: env_var_usize("FEED_BATCH", defaults.batch),
        ..defaults
    });
    let wkid = env_var_i64("FEED_WKID", 102100);
    let rate_hz = env_var_f64("FEED_RATE_HZ", 1.0);

    let (frames, _) = broadcast::channel(FRAME_BACKLOG);
    let state = AppState {
        feed: Arc::new(FeedState {
            frames: frames.clone(),
            wkid,
        }),
    };
    tokio::spawn(run_simulation(sim, rate_hz, frames));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!("feed server listening on ws://{addr} (wkid {wkid}, {rate_hz} Hz)");
    if let Err(e) = axum::serve(listener, app(state)).await {
        error!("server error: {e}");
    }
}

fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods([Method::GET, Method::OPTIONS]);

    Router::new()
        .route("/", get(feed_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn feed_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_feed_socket(socket, state.feed))
}

/// Broadcast the simulation state at `rate_hz` until every sender is gone.
async fn run_simulation(sim: Simulation, rate_hz: f64, frames: broadcast::Sender<Arc<str>>) {
    let period = Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|p| !p.is_zero())
        .unwrap_or(Duration::from_secs(1));
    let start = Instant::now();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let t = start.elapsed().as_secs_f64();
        let batch = match sim.frames_at(t) {
            Ok(batch) => batch,
            Err(e) => {
                error!("failed to encode simulation frame: {e}");
                continue;
            }
        };
        for frame in batch {
            // No subscribers is fine; the frame is simply dropped.
            let _ = frames.send(Arc::from(frame));
        }
        debug!(
            "t={t:.1}s: {} tracks to {} sessions",
            sim.config().tracks,
            frames.receiver_count()
        );
    }
}

fn env_var_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v: &f64| v.is_finite() && *v > 0.0)
        .unwrap_or(default)
}
