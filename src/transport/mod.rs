//! # Channel Transport
//!
//! The duplex message channel between this client and the voice backend.
//!
//! ## Layers:
//! - [`protocol`]: the typed voice events (`start_conversation`, `audio_delta`, ...)
//! - [`packet`]: Engine.IO / Socket.IO text framing
//! - [`socketio`]: the WebSocket client with its writer task, heartbeat and
//!   reconnection loop
//!
//! The session only ever sees the [`ChannelTransport`] trait, created through a
//! [`TransportFactory`], so tests can swap in an in-memory channel.

pub mod packet;
pub mod protocol;
pub mod socketio;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::BackendConfig;
use crate::error::VoiceResult;
use crate::session::CallEvents;

pub use protocol::{InboundEvent, OutboundMessage};
pub use socketio::SocketIoTransport;

/// Why a channel went away.
///
/// ## Classification:
/// - **ClientDisconnect**: we closed it ourselves. Benign.
/// - **ServerDisconnect**: the backend closed the namespace. Definitive, the
///   transport does not come back on its own.
/// - **TransportClose / TransportError / PingTimeout**: the connection was
///   lost. Transient, the transport reconnects with backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    ClientDisconnect,
    ServerDisconnect,
    TransportClose,
    TransportError,
    PingTimeout,
}

impl DisconnectReason {
    /// The reason string the backend's realtime library uses.
    pub fn as_str(&self) -> &'static str {
        match self {
            DisconnectReason::ClientDisconnect => "io client disconnect",
            DisconnectReason::ServerDisconnect => "io server disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::PingTimeout => "ping timeout",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DisconnectReason::TransportClose | DisconnectReason::TransportError | DisconnectReason::PingTimeout
        )
    }
}

/// What a live transport reports back to the session.
#[derive(Debug)]
pub enum TransportEvent {
    /// A voice event from the backend.
    Message(InboundEvent),
    /// An inbound packet that could not be understood.
    Malformed(String),
    Disconnected(DisconnectReason),
    /// About to retry after a transient drop.
    Reconnecting { attempt: u32 },
    /// Back online after a transient drop.
    Reconnected,
    /// Retries exhausted; the transport has stopped.
    ReconnectFailed(String),
}

/// A duplex named-event channel.
#[async_trait]
pub trait ChannelTransport: Send {
    /// Connect and wait for the backend to acknowledge the namespace.
    /// Everything that happens afterwards is reported through `events`.
    async fn connect(&mut self, events: CallEvents) -> VoiceResult<()>;

    /// Queue a message. Messages leave in the order they were emitted.
    fn emit(&mut self, message: &OutboundMessage) -> VoiceResult<()>;

    /// Flush what was emitted, leave the namespace and close. Idempotent.
    fn disconnect(&mut self);

    /// Wait (bounded) until a `disconnect` has finished flushing.
    async fn closed(&mut self) {}
}

pub trait TransportFactory: Send {
    fn create(&self, backend: &BackendConfig) -> Box<dyn ChannelTransport>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SocketIoConnector;

impl TransportFactory for SocketIoConnector {
    fn create(&self, backend: &BackendConfig) -> Box<dyn ChannelTransport> {
        Box::new(SocketIoTransport::new(backend.clone()))
    }
}
