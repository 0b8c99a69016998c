//! # Application State Management
//!
//! Shared state handed to every control API handler.
//!
//! ## What lives here:
//! - **config**: the current configuration, updatable at runtime
//! - **session**: the handle to the session runner (the only way to touch the
//!   voice session from a handler)
//! - **metrics**: voice counters written by the session controller
//! - **requests**: control API request counters written by the metrics middleware
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: every actix worker holds a reference to the same data
//! - **RwLock**: many readers or one writer (`parking_lot`, which does not
//!   poison)
//! - Snapshots are cloned out so that no lock is held while a response is
//!   serialised

use actix_web::http::StatusCode;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::session::SessionHandle;

/// Counters for the voice session.
#[derive(Debug, Default, Clone, Serialize)]
pub struct VoiceMetrics {
    pub calls_started: u64,
    pub calls_ended: u64,
    /// Microphone blocks emitted as `audio_data`.
    pub frames_sent: u64,
    /// Microphone blocks dropped by the mute gate.
    pub frames_muted: u64,
    /// Microphone blocks dropped while the channel was down.
    pub frames_dropped_offline: u64,
    pub chunks_received: u64,
    pub chunks_played: u64,
    /// Agent audio dropped by interruptions and channel loss.
    pub chunks_discarded: u64,
    pub interruptions: u64,
    pub protocol_errors: u64,
    pub backend_errors: u64,
    pub reconnects: u64,
}

pub type SharedMetrics = Arc<RwLock<VoiceMetrics>>;

/// Control API request counters.
#[derive(Debug, Default, Clone)]
pub struct RequestMetrics {
    pub request_count: u64,
    pub rejected_count: u64,
    pub failed_count: u64,
    /// Key: operation label, see [`crate::middleware::metrics::operation_for`]
    pub operations: HashMap<&'static str, OperationMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct OperationMetric {
    pub request_count: u64,
    pub rejected_count: u64,
    pub failed_count: u64,
    pub total_duration_ms: u64,
}

/// How a control request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    Success,
    /// 4xx: the session refused the command.
    Rejected,
    /// 5xx: the command was accepted but could not be carried out.
    Failed,
}

impl RequestOutcome {
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            RequestOutcome::Failed
        } else if status.is_client_error() {
            RequestOutcome::Rejected
        } else {
            RequestOutcome::Success
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<RwLock<AppConfig>>,
    pub session: SessionHandle,
    pub metrics: SharedMetrics,
    pub requests: Arc<RwLock<RequestMetrics>>,
    pub start_time: Instant,
}

impl AppState {
    /// `metrics` must be the same counters the session was spawned with.
    pub fn new(config: AppConfig, session: SessionHandle, metrics: SharedMetrics) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            session,
            metrics,
            requests: Arc::new(RwLock::new(RequestMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn get_config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Validate and store a new configuration, then pass it on to the session.
    ///
    /// The stored copy is only replaced when validation passes.
    pub fn update_config(&self, new_config: AppConfig) -> Result<(), String> {
        new_config.validate().map_err(|e| e.to_string())?;
        *self.config.write() = new_config.clone();
        self.session.reconfigure(new_config).map_err(|e| e.to_string())
    }

    pub fn voice_metrics(&self) -> VoiceMetrics {
        self.metrics.read().clone()
    }

    pub fn request_metrics(&self) -> RequestMetrics {
        self.requests.read().clone()
    }

    /// Called by the metrics middleware once per finished request.
    pub fn record_request(&self, operation: &'static str, duration_ms: u64, outcome: RequestOutcome) {
        let mut requests = self.requests.write();
        requests.request_count += 1;
        match outcome {
            RequestOutcome::Rejected => requests.rejected_count += 1,
            RequestOutcome::Failed => requests.failed_count += 1,
            RequestOutcome::Success => {}
        }

        let metric = requests.operations.entry(operation).or_default();
        metric.request_count += 1;
        metric.total_duration_ms += duration_ms;
        match outcome {
            RequestOutcome::Rejected => metric.rejected_count += 1,
            RequestOutcome::Failed => metric.failed_count += 1,
            RequestOutcome::Success => {}
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl RequestMetrics {
    /// Fraction of requests that were rejected or failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            (self.rejected_count + self.failed_count) as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl OperationMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
