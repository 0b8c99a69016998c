//! # Audio Capture Pipeline
//!
//! Turns the raw sample runs a microphone delivers into fixed-size, encoded
//! `audio_data` frames.
//!
//! ## Pipeline:
//! ```text
//! AudioSource --runs of any length--> framing (block_size) --> mute gate --> encode
//! ```
//!
//! Sources already deliver mono f32 at the session rate; format adaptation
//! (down-mixing, resampling) happens in the device layer where the native
//! format is known.
//!
//! Mute is a sender-side gate only. A muted block is dropped before encoding
//! and the backend is never told about it.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::audio::codec::encode_outbound;
use crate::error::VoiceResult;
use crate::session::CallEvents;
use crate::transport::OutboundMessage;

/// What call setup asks of the microphone.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

/// A microphone.
///
/// Acquisition is split in two steps so that the device can be claimed (and
/// fail) early during call setup, while samples only start flowing once the
/// conversation has been requested.
#[async_trait]
pub trait AudioSource: Send {
    /// Claim the device. Failures are [`VoiceError::Capture`](crate::error::VoiceError::Capture).
    async fn open(&mut self, constraints: &CaptureConstraints) -> VoiceResult<()>;

    /// Begin delivering sample runs through `events.captured`.
    fn start(&mut self, events: CallEvents) -> VoiceResult<()>;

    /// Stop delivering samples and release the device. Must be idempotent.
    fn stop(&mut self) -> VoiceResult<()>;
}

/// Result of feeding one sample run through the pipeline.
#[derive(Debug, Default)]
pub struct CaptureOutput {
    pub frames: Vec<OutboundMessage>,
    pub muted_blocks: usize,
}

pub struct CapturePipeline {
    source: Box<dyn AudioSource>,
    block_size: usize,
    pending: Vec<f32>,
    running: bool,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn AudioSource>, block_size: usize) -> Self {
        Self {
            source,
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size),
            running: false,
        }
    }

    pub async fn open(&mut self, constraints: &CaptureConstraints) -> VoiceResult<()> {
        self.source.open(constraints).await?;
        info!(
            sample_rate = constraints.sample_rate,
            block_size = self.block_size,
            "Microphone acquired"
        );
        Ok(())
    }

    pub fn start(&mut self, events: CallEvents) -> VoiceResult<()> {
        if self.running {
            return Ok(());
        }
        self.source.start(events)?;
        self.running = true;
        Ok(())
    }

    /// Frame a sample run into blocks, gate and encode each complete block.
    ///
    /// `muted` is read once per call; every block completed by this run is
    /// gated with it.
    pub fn process(&mut self, samples: &[f32], muted: bool) -> CaptureOutput {
        let mut output = CaptureOutput::default();
        if !self.running {
            return output;
        }

        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.block_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.block_size {
                if muted {
                    output.muted_blocks += 1;
                } else {
                    output.frames.push(OutboundMessage::AudioData {
                        audio: encode_outbound(&self.pending),
                    });
                }
                self.pending.clear();
            }
        }

        output
    }

    /// Stop the device and drop the partial block. Safe to call repeatedly.
    pub fn stop(&mut self) -> VoiceResult<()> {
        self.pending.clear();
        if !self.running {
            debug!("Capture already stopped");
        }
        self.running = false;
        self.source.stop()
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running
    }
}
