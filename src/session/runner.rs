//! # Session Runner
//!
//! Owns the [`SessionController`] on one tokio task and feeds it every
//! [`SessionEvent`] in arrival order. The rest of the process talks to it
//! through a cloneable [`SessionHandle`].
//!
//! ## Two directions:
//! - **In**: commands go onto the session queue with a oneshot for the reply,
//!   so callers get the result of exactly their command
//! - **Out**: after every input the runner publishes a fresh
//!   [`SessionSnapshot`] on a `watch` channel, but only if something changed

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::device::{ConfiguredDevices, DeviceFactory};
use crate::config::AppConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::session::{SessionCommand, SessionController, SessionEvent, SessionInbox, SessionSnapshot};
use crate::state::SharedMetrics;
use crate::transcript::TranscriptTurn;
use crate::transport::{SocketIoConnector, TransportFactory};

#[derive(Debug, Clone)]
pub struct SessionHandle {
    inbox: SessionInbox,
    snapshots: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub async fn start_call(&self) -> VoiceResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::StartCall(tx))?;
        rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    /// Ends the call and returns its transcript.
    pub async fn end_call(&self) -> VoiceResult<Vec<TranscriptTurn>> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::EndCall(tx))?;
        rx.await.map_err(|_| VoiceError::SessionClosed)
    }

    /// Returns the new mute state.
    pub async fn toggle_mute(&self) -> VoiceResult<bool> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::ToggleMute(tx))?;
        rx.await.map_err(|_| VoiceError::SessionClosed)
    }

    pub async fn set_language(&self, language: impl Into<String>) -> VoiceResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::SetLanguage(language.into(), tx))?;
        rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    pub async fn reconnect(&self) -> VoiceResult<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Reconnect(tx))?;
        rx.await.map_err(|_| VoiceError::SessionClosed)?
    }

    /// Hand a new configuration to the session; used from the next call on.
    pub fn reconfigure(&self, config: AppConfig) -> VoiceResult<()> {
        self.send(SessionCommand::Reconfigure(Box::new(config)))
    }

    /// End any live call and stop the runner.
    pub fn shutdown(&self) {
        if self.send(SessionCommand::Shutdown).is_err() {
            debug!("Session runner already stopped");
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshots.clone()
    }

    fn send(&self, command: SessionCommand) -> VoiceResult<()> {
        self.inbox
            .send(SessionEvent::Command(command))
            .map_err(|_| VoiceError::SessionClosed)
    }
}

/// Spawn a session using the configured audio devices and the Socket.IO channel.
pub fn spawn_session(config: AppConfig, metrics: SharedMetrics) -> (SessionHandle, JoinHandle<()>) {
    spawn_with(
        config,
        Box::new(SocketIoConnector),
        Box::new(ConfiguredDevices),
        metrics,
    )
}

pub fn spawn_with(
    config: AppConfig,
    transports: Box<dyn TransportFactory>,
    devices: Box<dyn DeviceFactory>,
    metrics: SharedMetrics,
) -> (SessionHandle, JoinHandle<()>) {
    let (inbox, queue) = mpsc::unbounded_channel();
    let controller = SessionController::new(config, transports, devices, inbox.clone(), metrics);
    let (publisher, snapshots) = watch::channel(controller.snapshot());

    let task = tokio::spawn(run(controller, queue, publisher));
    (SessionHandle { inbox, snapshots }, task)
}

async fn run(
    mut controller: SessionController,
    mut queue: mpsc::UnboundedReceiver<SessionEvent>,
    publisher: watch::Sender<SessionSnapshot>,
) {
    info!("Session runner started");

    while let Some(event) = queue.recv().await {
        let shutdown = matches!(event, SessionEvent::Command(SessionCommand::Shutdown));

        match event {
            SessionEvent::Command(command) => controller.handle_command(command).await,
            SessionEvent::Call { generation, event } => controller.handle_event(generation, event),
        }

        let snapshot = controller.snapshot();
        publisher.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });

        if shutdown {
            break;
        }
    }

    info!("Session runner stopped");
}
