//! In-memory doubles for the session's devices and channel.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::capture::{AudioSource, CaptureConstraints};
use crate::audio::device::DeviceFactory;
use crate::audio::playback::{AudioChunk, AudioSink};
use crate::config::{AppConfig, AudioConfig, BackendConfig};
use crate::error::{VoiceError, VoiceResult};
use crate::session::events::{CallEvent, CallEvents, SessionEvent};
use crate::session::SessionController;
use crate::state::SharedMetrics;
use crate::transport::{ChannelTransport, InboundEvent, OutboundMessage, TransportEvent, TransportFactory};

#[derive(Debug, Default)]
pub struct TransportLog {
    pub created: usize,
    pub connects: usize,
    pub disconnects: usize,
    pub closed: usize,
    pub emitted: Vec<OutboundMessage>,
    pub fail_connect: Option<String>,
    pub hang_connect: bool,
}

pub type SharedTransportLog = Arc<Mutex<TransportLog>>;

pub struct MockTransport {
    log: SharedTransportLog,
    connected: bool,
}

#[async_trait]
impl ChannelTransport for MockTransport {
    async fn connect(&mut self, _events: CallEvents) -> VoiceResult<()> {
        let (fail, hang) = {
            let log = self.log.lock();
            (log.fail_connect.clone(), log.hang_connect)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(message) = fail {
            return Err(VoiceError::Transport(message));
        }
        self.log.lock().connects += 1;
        self.connected = true;
        Ok(())
    }

    fn emit(&mut self, message: &OutboundMessage) -> VoiceResult<()> {
        if !self.connected {
            return Err(VoiceError::Transport("not connected".to_string()));
        }
        self.log.lock().emitted.push(message.clone());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.log.lock().disconnects += 1;
        self.connected = false;
    }

    async fn closed(&mut self) {
        self.log.lock().closed += 1;
    }
}

#[derive(Default, Clone)]
pub struct MockTransportFactory {
    pub log: SharedTransportLog,
}

impl TransportFactory for MockTransportFactory {
    fn create(&self, _backend: &BackendConfig) -> Box<dyn ChannelTransport> {
        self.log.lock().created += 1;
        Box::new(MockTransport {
            log: Arc::clone(&self.log),
            connected: false,
        })
    }
}

#[derive(Debug, Default)]
pub struct SourceLog {
    pub opened: usize,
    pub started: usize,
    pub stopped: usize,
    pub fail_open: Option<String>,
    pub hang_open: bool,
}

pub type SharedSourceLog = Arc<Mutex<SourceLog>>;

#[derive(Default)]
pub struct MockSource {
    log: SharedSourceLog,
}

impl MockSource {
    pub fn log(&self) -> SharedSourceLog {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl AudioSource for MockSource {
    async fn open(&mut self, _constraints: &CaptureConstraints) -> VoiceResult<()> {
        let (fail, hang) = {
            let log = self.log.lock();
            (log.fail_open.clone(), log.hang_open)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(message) = fail {
            return Err(VoiceError::Capture(message));
        }
        self.log.lock().opened += 1;
        Ok(())
    }

    fn start(&mut self, _events: CallEvents) -> VoiceResult<()> {
        self.log.lock().started += 1;
        Ok(())
    }

    fn stop(&mut self) -> VoiceResult<()> {
        self.log.lock().stopped += 1;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct SinkLog {
    pub opened: usize,
    pub played: Vec<u64>,
    pub stopped: usize,
    pub closed: usize,
    pub fail_open: Option<String>,
    pub fail_play: Option<u64>,
    pub fail_close: bool,
}

pub type SharedSinkLog = Arc<Mutex<SinkLog>>;

#[derive(Default)]
pub struct MockSink {
    log: SharedSinkLog,
}

impl MockSink {
    pub fn log(&self) -> SharedSinkLog {
        Arc::clone(&self.log)
    }
}

impl AudioSink for MockSink {
    fn open(&mut self, _sample_rate: u32, _events: CallEvents) -> VoiceResult<()> {
        let mut log = self.log.lock();
        if let Some(message) = log.fail_open.clone() {
            return Err(VoiceError::Playback(message));
        }
        log.opened += 1;
        Ok(())
    }

    fn play(&mut self, chunk: AudioChunk) -> VoiceResult<()> {
        let mut log = self.log.lock();
        if log.fail_play == Some(chunk.id) {
            return Err(VoiceError::Playback("device refused chunk".to_string()));
        }
        log.played.push(chunk.id);
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().stopped += 1;
    }

    fn close(&mut self) -> VoiceResult<()> {
        let mut log = self.log.lock();
        log.closed += 1;
        if log.fail_close {
            return Err(VoiceError::Playback("device busy".to_string()));
        }
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct MockDevices {
    pub source: SharedSourceLog,
    pub sink: SharedSinkLog,
}

impl DeviceFactory for MockDevices {
    fn source(&self, _audio: &AudioConfig) -> VoiceResult<Box<dyn AudioSource>> {
        Ok(Box::new(MockSource {
            log: Arc::clone(&self.source),
        }))
    }

    fn sink(&self, _audio: &AudioConfig) -> VoiceResult<Box<dyn AudioSink>> {
        Ok(Box::new(MockSink {
            log: Arc::clone(&self.sink),
        }))
    }
}

/// Small blocks and short timeouts.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.audio.block_size = 4;
    config.audio.capture_timeout_ms = 200;
    config.backend.connect_timeout_ms = 200;
    config
}

/// A controller wired to mocks, driven by hand.
pub struct Harness {
    pub controller: SessionController,
    pub inbox: mpsc::UnboundedReceiver<SessionEvent>,
    pub transports: MockTransportFactory,
    pub devices: MockDevices,
    pub metrics: SharedMetrics,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let (tx, inbox) = mpsc::unbounded_channel();
        let transports = MockTransportFactory::default();
        let devices = MockDevices::default();
        let metrics = SharedMetrics::default();
        let controller = SessionController::new(
            config,
            Box::new(transports.clone()),
            Box::new(devices.clone()),
            tx,
            Arc::clone(&metrics),
        );
        Self {
            controller,
            inbox,
            transports,
            devices,
            metrics,
        }
    }

    pub fn emitted(&self) -> Vec<OutboundMessage> {
        self.transports.log.lock().emitted.clone()
    }

    pub fn emitted_names(&self) -> Vec<&'static str> {
        self.emitted().iter().map(|m| m.event_name()).collect()
    }

    pub fn count_emitted(&self, name: &str) -> usize {
        self.emitted_names().iter().filter(|n| **n == name).count()
    }

    pub fn transport(&mut self, event: TransportEvent) {
        let generation = self.controller.generation();
        self.controller.handle_event(generation, CallEvent::Transport(event));
    }

    pub fn inbound(&mut self, event: InboundEvent) {
        self.transport(TransportEvent::Message(event));
    }

    pub fn captured(&mut self, samples: Vec<f32>) {
        let generation = self.controller.generation();
        self.controller.handle_event(generation, CallEvent::Captured(samples));
    }

    pub fn playback_finished(&mut self, chunk_id: u64) {
        let generation = self.controller.generation();
        self.controller.handle_event(generation, CallEvent::PlaybackFinished(chunk_id));
    }

    /// Start a call and have the backend confirm it.
    pub async fn active_call(&mut self) {
        self.controller.start_call().await.expect("call should start");
        self.inbound(InboundEvent::ConversationStarted {
            conversation_id: "conv-1".to_string(),
            agent_name: "Ada".to_string(),
            language: "en".to_string(),
        });
    }
}
