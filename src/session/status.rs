//! Observable session state.

use serde::Serialize;

use crate::transcript::TranscriptTurn;

/// Where the call is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPhase {
    /// No call. A new one may be started.
    Idle,
    /// Channel being set up, or waiting for the backend to (re)start the
    /// conversation.
    Connecting,
    /// The backend confirmed the conversation; audio flows both ways.
    Active,
    /// The backend ended the conversation. A new one may be started.
    Ended,
}

impl CallPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPhase::Idle => "idle",
            CallPhase::Connecting => "connecting",
            CallPhase::Active => "active",
            CallPhase::Ended => "ended",
        }
    }

    /// Phases from which `start_call` is accepted.
    pub fn can_start(&self) -> bool {
        matches!(self, CallPhase::Idle | CallPhase::Ended)
    }
}

/// State of the duplex channel, as a UI would show it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    /// Gave up; needs an explicit retry.
    Error,
    /// The backend closed the channel.
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }

    /// Whether the user can retry from here.
    pub fn can_retry(&self) -> bool {
        matches!(self, ConnectionStatus::Error | ConnectionStatus::Disconnected)
    }
}

/// Everything a UI needs to render the session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    pub phase: CallPhase,
    pub is_connected: bool,
    pub is_call_active: bool,
    pub is_muted: bool,
    pub is_speaking: bool,
    pub is_listening: bool,
    pub agent_name: String,
    pub language: String,
    pub conversation_id: Option<String>,
    pub connection_error: Option<String>,
    pub backend_error: Option<String>,
    pub queued_chunks: usize,
    pub transcript: Vec<TranscriptTurn>,
}
