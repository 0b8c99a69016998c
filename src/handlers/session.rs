//! Voice session endpoints.
//!
//! Every handler goes through [`SessionHandle`](crate::session::SessionHandle);
//! commands return the snapshot taken right after they were applied.

use crate::{error::ApiResult, state::AppState};
use actix_web::{http::header, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::{wrappers::WatchStream, StreamExt};

#[derive(Debug, Deserialize)]
pub struct LanguageRequest {
    pub language: String,
}

pub async fn get_session(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.session.snapshot())
}

pub async fn get_transcript(state: web::Data<AppState>) -> HttpResponse {
    let snapshot = state.session.snapshot();

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "conversation_id": snapshot.conversation_id,
        "transcript": snapshot.transcript
    }))
}

pub async fn start_call(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let snapshot = state.session.start_call().await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "session": snapshot
    })))
}

pub async fn end_call(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let transcript = state.session.end_call().await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "transcript": transcript
    })))
}

pub async fn toggle_mute(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let muted = state.session.toggle_mute().await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "muted": muted
    })))
}

pub async fn set_language(
    state: web::Data<AppState>,
    body: web::Json<LanguageRequest>,
) -> ApiResult<HttpResponse> {
    let snapshot = state.session.set_language(body.into_inner().language).await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "session": snapshot
    })))
}

pub async fn reconnect(state: web::Data<AppState>) -> ApiResult<HttpResponse> {
    let snapshot = state.session.reconnect().await?;

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "session": snapshot
    })))
}

/// Server-Sent Events: the current snapshot, then one per change.
pub async fn events(state: web::Data<AppState>) -> HttpResponse {
    let stream = WatchStream::new(state.session.subscribe()).map(|snapshot| {
        let body = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok::<_, Infallible>(web::Bytes::from(format!("data: {}\n\n", body)))
    });

    HttpResponse::Ok()
        .insert_header((header::CONTENT_TYPE, "text/event-stream"))
        .insert_header((header::CACHE_CONTROL, "no-cache"))
        .streaming(stream)
}
