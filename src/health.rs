use crate::session::{ConnectionStatus, SessionSnapshot};
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::process;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let session = state.session.snapshot();
    let requests = state.request_metrics();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": "voice-agent-client",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "backend": {
            "url": config.backend.url,
            "namespace": config.backend.namespace
        },
        "audio": {
            "input": config.audio.input,
            "output": config.audio.output,
            "sample_rate": config.audio.sample_rate
        },
        "requests": {
            "total_requests": requests.request_count,
            "rejected": requests.rejected_count,
            "failed": requests.failed_count,
            "error_rate": requests.error_rate()
        },
        "memory": get_memory_info(),
        "session": get_session_status(&session)
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let voice = state.voice_metrics();
    let requests = state.request_metrics();
    let uptime_seconds = state.get_uptime_seconds();

    let mut operation_stats = Vec::new();
    for (operation, metric) in requests.operations.iter() {
        operation_stats.push(json!({
            "operation": operation,
            "request_count": metric.request_count,
            "rejected_count": metric.rejected_count,
            "failed_count": metric.failed_count,
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "voice": voice,
        "requests": {
            "total_requests": requests.request_count,
            "rejected": requests.rejected_count,
            "failed": requests.failed_count,
            "error_rate": requests.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                requests.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "operations": operation_stats,
        "memory": get_memory_info()
    }))
}

fn get_memory_info() -> serde_json::Value {
    #[cfg(target_os = "linux")]
    {
        let pid = process::id();
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) {
            let mut vm_rss = 0;
            let mut vm_size = 0;

            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_rss = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                } else if line.starts_with("VmSize:") {
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        vm_size = kb_str.parse::<u64>().unwrap_or(0) * 1024;
                    }
                }
            }

            return json!({
                "resident_memory_bytes": vm_rss,
                "virtual_memory_bytes": vm_size,
                "available": true
            });
        }
    }

    json!({
        "resident_memory_bytes": 0,
        "virtual_memory_bytes": 0,
        "available": false,
        "note": format!("Memory info not available for pid {}", process::id())
    })
}

fn get_session_status(session: &SessionSnapshot) -> serde_json::Value {
    let warnings: Vec<&str> = match session.status {
        ConnectionStatus::Error => vec!["Voice backend unreachable - retry with POST /api/v1/session/reconnect"],
        ConnectionStatus::Disconnected => vec!["Voice backend closed the channel"],
        ConnectionStatus::Reconnecting => vec!["Voice channel lost - reconnecting"],
        _ => vec![],
    };

    json!({
        "status": session.status,
        "phase": session.phase,
        "language": session.language,
        "is_muted": session.is_muted,
        "connection_error": session.connection_error,
        "warnings": warnings
    })
}
