//! Inputs of the session runner.
//!
//! Everything that can change the session arrives as one [`SessionEvent`] on
//! a single ordered queue: user commands from the control API, and per-call
//! events produced by the transport, the capture device and the playback
//! device. Per-call events carry the generation of the call that produced
//! them so that stragglers from a torn-down call are recognised and dropped.

use tokio::sync::{mpsc, oneshot};

use crate::config::AppConfig;
use crate::error::VoiceResult;
use crate::session::SessionSnapshot;
use crate::transcript::TranscriptTurn;
use crate::transport::TransportEvent;

pub type SessionInbox = mpsc::UnboundedSender<SessionEvent>;

#[derive(Debug)]
pub enum SessionEvent {
    Command(SessionCommand),
    Call { generation: u64, event: CallEvent },
}

/// User commands. Each carries the channel its answer goes back on.
#[derive(Debug)]
pub enum SessionCommand {
    StartCall(oneshot::Sender<VoiceResult<SessionSnapshot>>),
    EndCall(oneshot::Sender<Vec<TranscriptTurn>>),
    ToggleMute(oneshot::Sender<bool>),
    SetLanguage(String, oneshot::Sender<VoiceResult<SessionSnapshot>>),
    Reconnect(oneshot::Sender<VoiceResult<SessionSnapshot>>),
    Reconfigure(Box<AppConfig>),
    Shutdown,
}

#[derive(Debug)]
pub enum CallEvent {
    Transport(TransportEvent),
    /// A run of mono samples at the session rate, of any length.
    Captured(Vec<f32>),
    PlaybackFinished(u64),
}

/// Sender handed to the devices and the transport of one call.
///
/// Cloneable and `Send`, so it can be moved into audio callbacks running on
/// foreign threads. Every `send` returns `false` once the runner is gone,
/// which producers treat as a signal to stop.
#[derive(Debug, Clone)]
pub struct CallEvents {
    generation: u64,
    inbox: SessionInbox,
}

impl CallEvents {
    pub fn new(generation: u64, inbox: SessionInbox) -> Self {
        Self { generation, inbox }
    }

    pub fn transport(&self, event: TransportEvent) -> bool {
        self.send(CallEvent::Transport(event))
    }

    pub fn captured(&self, samples: Vec<f32>) -> bool {
        self.send(CallEvent::Captured(samples))
    }

    pub fn playback_finished(&self, chunk_id: u64) -> bool {
        self.send(CallEvent::PlaybackFinished(chunk_id))
    }

    fn send(&self, event: CallEvent) -> bool {
        self.inbox
            .send(SessionEvent::Call {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}
