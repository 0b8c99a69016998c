//! # Session Controller
//!
//! The state machine behind a voice call. It exclusively owns the per-call
//! resources (microphone pipeline, playback queue, duplex channel) and the
//! transcript, and is only ever touched from the session runner, one input at
//! a time. No locks are needed inside.
//!
//! ## Call Setup Order:
//! 1. Claim the microphone (bounded by `audio.capture_timeout_ms`)
//! 2. Open the audio output
//! 3. Create and connect the channel (bounded by `backend.connect_timeout_ms`)
//! 4. Emit `start_conversation` and let captured audio flow
//!
//! Any failure releases whatever was acquired so far. There is never a
//! half-initialised call left behind, and never more than one channel.
//!
//! ## Interruption (barge-in):
//! When the backend detects the user speaking while agent audio is playing,
//! the controller emits `interrupt`, stops playback, drops the queue, and
//! discards the rest of the interrupted response until the user stops.

use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::audio::capture::CapturePipeline;
use crate::audio::codec::decode_inbound;
use crate::audio::device::DeviceFactory;
use crate::audio::playback::{OutputQueue, PlaybackTransition};
use crate::config::AppConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::session::events::{CallEvent, CallEvents, SessionCommand, SessionInbox};
use crate::session::status::{CallPhase, ConnectionStatus, SessionSnapshot};
use crate::state::SharedMetrics;
use crate::transcript::{Role, TranscriptReducer, TranscriptTurn};
use crate::transport::{
    ChannelTransport, DisconnectReason, InboundEvent, OutboundMessage, TransportEvent, TransportFactory,
};

pub struct SessionController {
    config: AppConfig,
    transports: Box<dyn TransportFactory>,
    devices: Box<dyn DeviceFactory>,
    inbox: SessionInbox,
    metrics: SharedMetrics,

    phase: CallPhase,
    status: ConnectionStatus,
    /// Incremented per call; events from older calls are dropped.
    generation: u64,
    channel: Option<Box<dyn ChannelTransport>>,
    /// The last released channel, kept until it has flushed or the next one
    /// is released.
    closing: Option<Box<dyn ChannelTransport>>,
    capture: Option<CapturePipeline>,
    output: Option<OutputQueue>,
    transcript: TranscriptReducer,

    muted: bool,
    speaking: bool,
    listening: bool,
    /// Set by an interruption, cleared when the user stops speaking.
    discarding_response: bool,
    agent_name: String,
    language: String,
    conversation_id: Option<String>,
    connection_error: Option<String>,
    backend_error: Option<String>,
}

impl SessionController {
    pub fn new(
        config: AppConfig,
        transports: Box<dyn TransportFactory>,
        devices: Box<dyn DeviceFactory>,
        inbox: SessionInbox,
        metrics: SharedMetrics,
    ) -> Self {
        let language = config.session.default_language.clone();
        Self {
            config,
            transports,
            devices,
            inbox,
            metrics,
            phase: CallPhase::Idle,
            status: ConnectionStatus::Idle,
            generation: 0,
            channel: None,
            closing: None,
            capture: None,
            output: None,
            transcript: TranscriptReducer::new(),
            muted: false,
            speaking: false,
            listening: false,
            discarding_response: false,
            agent_name: String::new(),
            language,
            conversation_id: None,
            connection_error: None,
            backend_error: None,
        }
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    #[cfg(test)]
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    #[cfg(test)]
    pub fn transcript(&self) -> &[TranscriptTurn] {
        self.transcript.turns()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            phase: self.phase,
            is_connected: self.status == ConnectionStatus::Connected,
            is_call_active: self.phase == CallPhase::Active,
            is_muted: self.muted,
            is_speaking: self.speaking,
            is_listening: self.listening,
            agent_name: self.agent_name.clone(),
            language: self.language.clone(),
            conversation_id: self.conversation_id.clone(),
            connection_error: self.connection_error.clone(),
            backend_error: self.backend_error.clone(),
            queued_chunks: self.output.as_ref().map_or(0, |output| output.len()),
            transcript: self.transcript.turns().to_vec(),
        }
    }

    pub async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::StartCall(reply) => {
                let result = self.start_call().await.map(|()| self.snapshot());
                let _ = reply.send(result);
            }
            SessionCommand::EndCall(reply) => {
                let _ = reply.send(self.end_call());
            }
            SessionCommand::ToggleMute(reply) => {
                let _ = reply.send(self.toggle_mute());
            }
            SessionCommand::SetLanguage(language, reply) => {
                let result = self.set_language(&language).map(|()| self.snapshot());
                let _ = reply.send(result);
            }
            SessionCommand::Reconnect(reply) => {
                let result = self.reconnect().await.map(|()| self.snapshot());
                let _ = reply.send(result);
            }
            SessionCommand::Reconfigure(config) => self.apply_config(*config),
            SessionCommand::Shutdown => {
                self.end_call();
                if let Some(mut channel) = self.closing.take() {
                    channel.closed().await;
                }
            }
        }
    }

    pub fn handle_event(&mut self, generation: u64, event: CallEvent) {
        if generation != self.generation {
            trace!(generation, current = self.generation, "Dropping event from a previous call");
            return;
        }

        match event {
            CallEvent::Transport(event) => self.on_transport(event),
            CallEvent::Captured(samples) => self.on_captured(&samples),
            CallEvent::PlaybackFinished(chunk_id) => self.on_playback_finished(chunk_id),
        }
    }

    /// Start a call. A no-op while a call is already set up or running.
    pub async fn start_call(&mut self) -> VoiceResult<()> {
        if !self.phase.can_start() || self.channel.is_some() {
            debug!(phase = self.phase.as_str(), "start_call ignored, a call is already in progress");
            return Ok(());
        }

        self.generation += 1;
        let events = CallEvents::new(self.generation, self.inbox.clone());
        self.phase = CallPhase::Connecting;
        self.status = ConnectionStatus::Connecting;
        self.connection_error = None;
        self.backend_error = None;
        self.conversation_id = None;
        self.transcript.reset();

        info!(generation = self.generation, language = %self.language, "Starting call");

        match self.acquire(events).await {
            Ok(()) => {
                self.metrics.write().calls_started += 1;
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Call setup failed");
                self.release_all();
                self.phase = CallPhase::Idle;
                self.status = ConnectionStatus::Error;
                self.connection_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    async fn acquire(&mut self, events: CallEvents) -> VoiceResult<()> {
        let audio = self.config.audio.clone();
        let backend = self.config.backend.clone();

        let source = self.devices.source(&audio)?;
        let mut capture = CapturePipeline::new(source, audio.block_size);
        let opened = timeout(audio.capture_timeout(), capture.open(&audio.constraints())).await;
        self.capture = Some(capture);
        match opened {
            Ok(result) => result?,
            Err(_) => {
                return Err(VoiceError::Capture(format!(
                    "timed out after {} ms waiting for the microphone",
                    audio.capture_timeout_ms
                )))
            }
        }

        let mut sink = self.devices.sink(&audio)?;
        sink.open(audio.sample_rate, events.clone())?;
        self.output = Some(OutputQueue::new(sink, audio.sample_rate));

        let mut channel = self.transports.create(&backend);
        let connected = timeout(backend.connect_timeout(), channel.connect(events.clone())).await;
        self.channel = Some(channel);
        match connected {
            Ok(result) => result?,
            Err(_) => {
                return Err(VoiceError::Transport(format!(
                    "timed out after {} ms waiting for the backend",
                    backend.connect_timeout_ms
                )))
            }
        }
        self.status = ConnectionStatus::Connected;

        self.emit(OutboundMessage::StartConversation {
            language: self.language.clone(),
        });

        if let Some(capture) = self.capture.as_mut() {
            capture.start(events)?;
        }
        Ok(())
    }

    /// End the call and hand back its transcript.
    ///
    /// Every resource is released independently; failures are logged and do
    /// not stop the others from being released.
    pub fn end_call(&mut self) -> Vec<TranscriptTurn> {
        let live = self.channel.is_some() || self.capture.is_some() || self.output.is_some();
        if live {
            info!(conversation_id = ?self.conversation_id, "Ending call");
            self.emit(OutboundMessage::EndConversation);
            self.release_all();
            self.metrics.write().calls_ended += 1;
        } else {
            debug!("end_call with no live call");
        }

        self.phase = CallPhase::Idle;
        self.status = ConnectionStatus::Idle;
        self.connection_error = None;
        self.conversation_id = None;
        self.transcript.take()
    }

    pub fn toggle_mute(&mut self) -> bool {
        self.muted = !self.muted;
        info!(muted = self.muted, "Microphone mute toggled");
        self.muted
    }

    /// Select the conversation language; tells the backend if a call is live.
    pub fn set_language(&mut self, language: &str) -> VoiceResult<()> {
        if !self.config.session.is_supported(language) {
            return Err(VoiceError::InvalidLanguage(language.to_string()));
        }

        self.language = language.to_string();
        info!(language, "Language selected");

        if self.status == ConnectionStatus::Connected
            && matches!(self.phase, CallPhase::Connecting | CallPhase::Active)
        {
            self.emit(OutboundMessage::UpdateLanguage {
                language: language.to_string(),
            });
        }
        Ok(())
    }

    /// Manual retry after the channel gave up or was closed by the backend.
    pub async fn reconnect(&mut self) -> VoiceResult<()> {
        if !self.status.can_retry() && !self.phase.can_start() {
            debug!(status = self.status.as_str(), "reconnect ignored, channel is still live");
            return Ok(());
        }
        info!(status = self.status.as_str(), "Manual reconnect requested");
        self.start_call().await
    }

    /// Takes effect for the next call.
    pub fn apply_config(&mut self, config: AppConfig) {
        if !config.session.is_supported(&self.language) {
            self.language = config.session.default_language.clone();
        }
        self.config = config;
        info!(backend = %self.config.backend.url, "Session configuration updated");
    }

    fn emit(&mut self, message: OutboundMessage) -> bool {
        let Some(channel) = self.channel.as_mut() else {
            debug!(event = message.event_name(), "No channel, dropping outbound message");
            return false;
        };

        match channel.emit(&message) {
            Ok(()) => true,
            Err(e) => {
                warn!(event = message.event_name(), error = %e, "Failed to emit");
                false
            }
        }
    }

    fn release_all(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            if let Err(e) = capture.stop() {
                warn!(error = %e, "Failed to stop microphone");
            }
        }
        if let Some(output) = self.output.take() {
            if let Err(e) = output.close() {
                warn!(error = %e, "Failed to close audio output");
            }
        }
        if let Some(mut channel) = self.channel.take() {
            channel.disconnect();
            self.closing = Some(channel);
        }

        self.speaking = false;
        self.listening = false;
        self.discarding_response = false;
    }

    fn stop_playback(&mut self) {
        if let Some(output) = self.output.as_mut() {
            let discarded = output.clear();
            if discarded > 0 {
                self.metrics.write().chunks_discarded += discarded as u64;
            }
        }
        self.speaking = false;
    }

    fn on_captured(&mut self, samples: &[f32]) {
        let Some(capture) = self.capture.as_mut() else {
            return;
        };
        let output = capture.process(samples, self.muted);

        if output.muted_blocks > 0 {
            self.metrics.write().frames_muted += output.muted_blocks as u64;
        }
        if output.frames.is_empty() {
            return;
        }

        let online = self.status == ConnectionStatus::Connected
            && matches!(self.phase, CallPhase::Connecting | CallPhase::Active);
        if !online {
            trace!(frames = output.frames.len(), status = self.status.as_str(), "Channel offline, dropping audio");
            self.metrics.write().frames_dropped_offline += output.frames.len() as u64;
            return;
        }

        let mut sent = 0;
        for frame in output.frames {
            if self.emit(frame) {
                sent += 1;
            }
        }
        self.metrics.write().frames_sent += sent;
    }

    fn on_playback_finished(&mut self, chunk_id: u64) {
        let Some(output) = self.output.as_mut() else {
            return;
        };
        match output.on_finished(chunk_id) {
            PlaybackTransition::Advanced => {
                self.metrics.write().chunks_played += 1;
            }
            PlaybackTransition::Drained => {
                self.metrics.write().chunks_played += 1;
                self.speaking = false;
            }
            _ => {}
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        if self.channel.is_none() {
            trace!("Channel already released, ignoring transport event");
            return;
        }

        match event {
            TransportEvent::Message(inbound) => self.on_inbound(inbound),
            TransportEvent::Malformed(reason) => {
                self.metrics.write().protocol_errors += 1;
                warn!(%reason, "Ignoring malformed inbound packet");
            }
            TransportEvent::Disconnected(reason) => self.on_disconnect(reason),
            TransportEvent::Reconnecting { attempt } => {
                self.status = ConnectionStatus::Reconnecting;
                info!(attempt, "Reconnecting to voice backend");
            }
            TransportEvent::Reconnected => {
                self.status = ConnectionStatus::Connected;
                self.connection_error = None;
                self.metrics.write().reconnects += 1;
                if self.phase == CallPhase::Connecting {
                    info!(language = %self.language, "Resuming conversation");
                    self.emit(OutboundMessage::StartConversation {
                        language: self.language.clone(),
                    });
                }
            }
            TransportEvent::ReconnectFailed(message) => {
                error!(%message, "Giving up on voice backend");
                self.release_all();
                self.phase = CallPhase::Idle;
                self.status = ConnectionStatus::Error;
                self.connection_error = Some(message);
            }
        }
    }

    fn on_disconnect(&mut self, reason: DisconnectReason) {
        match reason {
            DisconnectReason::ClientDisconnect => {
                debug!("Voice channel closed by client");
            }
            DisconnectReason::ServerDisconnect => {
                warn!("Backend closed the voice channel");
                self.release_all();
                self.phase = CallPhase::Idle;
                self.status = ConnectionStatus::Disconnected;
                self.connection_error = Some(reason.as_str().to_string());
            }
            _ => {
                warn!(reason = reason.as_str(), "Voice channel lost, waiting for reconnection");
                if self.phase == CallPhase::Active {
                    self.phase = CallPhase::Connecting;
                }
                self.status = ConnectionStatus::Reconnecting;
                self.stop_playback();
                self.listening = false;
                self.discarding_response = false;
            }
        }
    }

    fn on_inbound(&mut self, event: InboundEvent) {
        if let InboundEvent::AudioDelta { audio } = &event {
            self.on_audio_delta(audio);
            return;
        }
        debug!(event = event.name(), "Inbound event");

        match event {
            InboundEvent::ConversationStarted {
                conversation_id,
                agent_name,
                language,
            } => {
                info!(%conversation_id, %agent_name, %language, "Conversation started");
                self.phase = CallPhase::Active;
                self.conversation_id = Some(conversation_id);
                self.agent_name = agent_name;
                if !language.is_empty() {
                    self.language = language;
                }
            }
            InboundEvent::ConversationEnded => {
                info!(conversation_id = ?self.conversation_id, "Backend ended the conversation");
                self.release_all();
                self.phase = CallPhase::Ended;
                self.status = ConnectionStatus::Idle;
                self.metrics.write().calls_ended += 1;
            }
            InboundEvent::AudioDone => {
                self.speaking = false;
            }
            InboundEvent::TranscriptDelta { role, delta } => {
                if role == Role::Assistant {
                    self.speaking = true;
                }
                self.transcript.on_delta(role, &delta);
            }
            InboundEvent::TranscriptDone { role, transcript } => {
                self.transcript.on_done(role, &transcript);
            }
            InboundEvent::UserTranscript { transcript } => {
                self.transcript.on_final(Role::User, &transcript);
            }
            InboundEvent::SpeechStarted => self.on_speech_started(),
            InboundEvent::SpeechStopped => {
                self.listening = false;
                self.discarding_response = false;
            }
            InboundEvent::LanguageUpdated { language, agent_name } => {
                info!(%language, %agent_name, "Backend switched language");
                self.language = language;
                if !agent_name.is_empty() {
                    self.agent_name = agent_name;
                }
            }
            InboundEvent::Error { message } => {
                self.metrics.write().backend_errors += 1;
                warn!(error = %VoiceError::Backend(message.clone()), "Backend reported an error");
                self.backend_error = Some(message);
            }
            InboundEvent::AudioDelta { .. } => {}
        }
    }

    fn on_audio_delta(&mut self, audio: &str) {
        if self.discarding_response {
            trace!("Discarding audio of an interrupted response");
            self.metrics.write().chunks_discarded += 1;
            return;
        }
        let Some(output) = self.output.as_mut() else {
            debug!("No audio output, dropping agent audio");
            return;
        };

        match decode_inbound(audio) {
            Ok(samples) => {
                output.enqueue(samples);
                self.speaking = true;
                self.metrics.write().chunks_received += 1;
            }
            Err(e) => {
                self.metrics.write().protocol_errors += 1;
                warn!(error = %e, "Dropping undecodable audio chunk");
            }
        }
    }

    fn on_speech_started(&mut self) {
        self.listening = true;

        let playing = self.output.as_ref().is_some_and(|output| output.is_playing());
        if !playing {
            return;
        }

        info!("User started speaking, interrupting agent");
        self.emit(OutboundMessage::Interrupt);
        self.stop_playback();
        self.discarding_response = true;
        self.metrics.write().interruptions += 1;
    }
}
