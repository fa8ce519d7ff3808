//! RECAP Gateway: the served variant.
//!
//! Serves the browser client and hosts one independent conversation per WebSocket connection.
//! Backends are warmed up before the listener binds; a warm-up failure stops the process.

mod ws;

use axum::http::Method;
use axum::routing::get;
use axum::Router;
use recap_core::{bootstrap, env_bool, RecapConfig, Resources, TurnCoordinator};
use recap_voice::{AudioPlayer, DevicePlayer, SttBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared, read-only state. Per-connection state lives in [`ws::ConnectionSession`].
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RecapConfig>,
    pub resources: Arc<Resources>,
    pub coordinator: Arc<TurnCoordinator>,
    pub stt: Arc<dyn SttBackend>,
    pub player: Option<Arc<dyn AudioPlayer>>,
}

/// stdout always; a daily rolling file too when `RECAP_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    match std::env::var("RECAP_LOG_DIR") {
        Ok(dir) if !dir.trim().is_empty() => {
            if let Err(e) = std::fs::create_dir_all(&dir) {
                eprintln!("[recap-gateway] cannot create log dir {}: {}", dir, e);
            }
            let file_appender = tracing_appender::rolling::daily(&dir, "recap-gateway");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
            Some(guard)
        }
        _ => {
            registry.init();
            None
        }
    }
}

fn build_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    let static_dir = state.config.static_dir.clone();
    let index = ServeFile::new(static_dir.join("index.html"));

    Router::new()
        .route_service("/", index)
        .nest_service("/static", ServeDir::new(static_dir))
        .route("/ws/chat", get(ws::chat_ws))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[recap-gateway] .env not loaded: {} (using system environment)", e);
    }
    let _log_guard = init_tracing();

    let mut config = match RecapConfig::load() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("❌ configuration: {}", e);
            std::process::exit(1);
        }
    };
    let resources = match Resources::load(&config) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("❌ {}", e);
            std::process::exit(1);
        }
    };

    // Replies are spoken on the server's output device; RECAP_SERVER_PLAYBACK overrides the file.
    let server_playback = env_bool("RECAP_SERVER_PLAYBACK", config.session.server_playback);
    let player: Option<Arc<dyn AudioPlayer>> = if server_playback {
        match DevicePlayer::open() {
            Ok(p) => Some(Arc::new(p)),
            Err(e) => {
                tracing::warn!(target: "recap::voice", "no output device, speech disabled: {}", e);
                None
            }
        }
    } else {
        None
    };
    config.session.server_playback = player.is_some();

    let stt = match bootstrap::build_stt(&config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("❌ speech recognition: {}", e);
            std::process::exit(1);
        }
    };
    let coordinator = match bootstrap::build_coordinator(&config, &resources, player.clone()).await {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("❌ backends: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = bootstrap::warm_up(&config, &coordinator).await {
        tracing::error!("❌ {}", e);
        std::process::exit(1);
    }

    let addr: SocketAddr = match format!("{}:{}", config.bind_addr, config.port).parse() {
        Ok(a) => a,
        Err(e) => {
            tracing::error!("❌ invalid bind address {}:{}: {}", config.bind_addr, config.port, e);
            std::process::exit(1);
        }
    };
    let app_name = config.app_name.clone();
    let state = AppState {
        config: Arc::new(config),
        resources: Arc::new(resources),
        coordinator: Arc::new(coordinator),
        stt,
        player,
    };
    let app = build_app(state);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("❌ cannot bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    tracing::info!("{} listening on http://{}", app_name, addr);
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("Server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown requested (Ctrl+C)");
        }
    }
}
