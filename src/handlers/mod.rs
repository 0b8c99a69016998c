pub mod config;
pub mod session;

pub use config::*;
pub use session::*;

use crate::health;
use actix_web::web;

/// All control API routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(get_config))
            .route("/config", web::put().to(update_config))
            .service(
                web::scope("/session")
                    .route("", web::get().to(get_session))
                    .route("/transcript", web::get().to(get_transcript))
                    .route("/events", web::get().to(events))
                    .route("/start", web::post().to(start_call))
                    .route("/end", web::post().to(end_call))
                    .route("/mute", web::post().to(toggle_mute))
                    .route("/language", web::put().to(set_language))
                    .route("/reconnect", web::post().to(reconnect)),
            ),
    )
    .route("/health", web::get().to(health::health_check));
}
