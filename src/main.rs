//! # Voice Agent Client - Main Application Entry Point
//!
//! A headless client for a realtime voice-agent backend. It holds one voice
//! session (microphone in, agent speech out, live transcript) and exposes a
//! small local HTTP control API to drive it.
//!
//! ## Application Architecture:
//! - **config**: Configuration (TOML file + environment variables)
//! - **session**: The call state machine and the task that runs it
//! - **transport**: The Socket.IO channel to the voice backend
//! - **audio**: PCM codec, capture framing, playback queue, devices
//! - **transcript**: Folding streamed transcript events into turns
//! - **state / health / handlers / middleware**: The control API
//! - **error**: Error types and HTTP error responses

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod session;
mod state;
mod transcript;
mod transport;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::state::{AppState, SharedMetrics};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ## What this function does:
/// 1. Loads `.env`, sets up logging, loads and validates configuration
/// 2. Spawns the voice session (and starts a call if `session.auto_start`)
/// 3. Serves the control API until SIGINT/SIGTERM
/// 4. Ends any live call before exiting
#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-agent-client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        backend = %config.backend.url,
        input = %config.audio.input,
        output = %config.audio.output,
        "Configuration loaded"
    );

    let metrics = SharedMetrics::default();
    let (session, session_task) = session::spawn_session(config.clone(), Arc::clone(&metrics));

    if config.session.auto_start {
        match session.start_call().await {
            Ok(snapshot) => info!(status = snapshot.status.as_str(), "Call started automatically"),
            Err(e) => warn!(error = %e, "Automatic call start failed"),
        }
    }

    let app_state = AppState::new(config.clone(), session.clone(), metrics);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting control API on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .configure(handlers::configure)
    })
    .disable_signals()
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = wait_for_shutdown() => {
            info!("Received {}, stopping...", signal);
            server_handle.stop(true).await;
        }
    }

    session.shutdown();
    if tokio::time::timeout(Duration::from_secs(5), session_task).await.is_err() {
        warn!("Session did not stop within 5s");
    }

    info!("Stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls what gets logged; defaults to
/// `voice_agent_client=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_agent_client=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        },
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to install signal handlers ({}), falling back to Ctrl+C", e);
            wait_for_ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> &'static str {
    wait_for_ctrl_c().await
}

async fn wait_for_ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
