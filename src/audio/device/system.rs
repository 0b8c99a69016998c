//! System microphone and speakers through cpal.
//!
//! cpal streams run their callbacks on an internal audio thread. Both devices
//! talk to the session only through [`CallEvents`], which is `Send`, and keep
//! their shared state behind a `parking_lot::Mutex` that the callback holds
//! for a few microseconds per buffer.
//!
//! Devices are opened in their default format. `f32`, `i16` and `u16` are
//! converted at the callback boundary; the session only ever sees `f32`.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};

use super::{downmix, resample_linear, PcmSample, StreamResampler};
use crate::audio::capture::{AudioSource, CaptureConstraints};
use crate::audio::playback::{AudioChunk, AudioSink};
use crate::error::{VoiceError, VoiceResult};
use crate::session::CallEvents;

/// Keeps a cpal stream alive inside `Send` types.
#[allow(dead_code)]
struct SendStream(cpal::Stream);

// SAFETY: the stream is only stored to keep it alive and dropped from the
// owning thread. cpal manages its own callback thread.
unsafe impl Send for SendStream {}

#[derive(Default)]
pub struct SystemSource {
    stream: Option<SendStream>,
    /// `None` until `start`; samples captured before that are dropped.
    events: Arc<Mutex<Option<CallEvents>>>,
}

#[async_trait]
impl AudioSource for SystemSource {
    async fn open(&mut self, constraints: &CaptureConstraints) -> VoiceResult<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| VoiceError::Capture("no input device available".to_string()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| VoiceError::Capture(format!("input device unusable: {}", e)))?;

        let native_rate = supported.sample_rate().0;
        let channels = supported.channels();
        let target_rate = constraints.sample_rate;
        let format = supported.sample_format();
        let config: cpal::StreamConfig = supported.config();

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            native_rate,
            channels,
            target_rate,
            ?format,
            "Opening system microphone"
        );

        let resampler = StreamResampler::new(native_rate, target_rate);
        let stream = match format {
            cpal::SampleFormat::F32 => build_input::<f32>(&device, &config, channels, resampler, &self.events),
            cpal::SampleFormat::I16 => build_input::<i16>(&device, &config, channels, resampler, &self.events),
            cpal::SampleFormat::U16 => build_input::<u16>(&device, &config, channels, resampler, &self.events),
            other => {
                return Err(VoiceError::Capture(format!(
                    "unsupported input sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| VoiceError::Capture(format!("cannot open input stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| VoiceError::Capture(format!("cannot start input stream: {}", e)))?;

        self.stream = Some(SendStream(stream));
        Ok(())
    }

    fn start(&mut self, events: CallEvents) -> VoiceResult<()> {
        if self.stream.is_none() {
            return Err(VoiceError::Capture("input started before it was opened".to_string()));
        }
        *self.events.lock() = Some(events);
        Ok(())
    }

    fn stop(&mut self) -> VoiceResult<()> {
        self.events.lock().take();
        self.stream.take();
        Ok(())
    }
}

#[derive(Default)]
struct OutputState {
    samples: VecDeque<f32>,
    current: Option<u64>,
    events: Option<CallEvents>,
}

#[derive(Default)]
pub struct SystemSink {
    stream: Option<SendStream>,
    state: Arc<Mutex<OutputState>>,
    device_rate: u32,
}

impl AudioSink for SystemSink {
    fn open(&mut self, _sample_rate: u32, events: CallEvents) -> VoiceResult<()> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| VoiceError::Playback("no output device available".to_string()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| VoiceError::Playback(format!("output device unusable: {}", e)))?;

        let channels = supported.channels() as usize;
        let format = supported.sample_format();
        self.device_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.config();

        self.state.lock().events = Some(events);

        let stream = match format {
            cpal::SampleFormat::F32 => build_output::<f32>(&device, &config, channels, &self.state),
            cpal::SampleFormat::I16 => build_output::<i16>(&device, &config, channels, &self.state),
            cpal::SampleFormat::U16 => build_output::<u16>(&device, &config, channels, &self.state),
            other => {
                return Err(VoiceError::Playback(format!(
                    "unsupported output sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| VoiceError::Playback(format!("cannot open output stream: {}", e)))?;

        stream
            .play()
            .map_err(|e| VoiceError::Playback(format!("cannot start output stream: {}", e)))?;

        self.stream = Some(SendStream(stream));
        Ok(())
    }

    fn play(&mut self, chunk: AudioChunk) -> VoiceResult<()> {
        if self.stream.is_none() {
            return Err(VoiceError::Playback("output is not open".to_string()));
        }
        let samples = resample_linear(&chunk.samples, chunk.sample_rate, self.device_rate);

        let mut state = self.state.lock();
        state.samples.clear();
        state.samples.extend(samples);
        state.current = Some(chunk.id);
        Ok(())
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.samples.clear();
        state.current = None;
    }

    fn close(&mut self) -> VoiceResult<()> {
        {
            let mut state = self.state.lock();
            state.samples.clear();
            state.current = None;
            state.events = None;
        }
        self.stream.take();
        Ok(())
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: u16,
    mut resampler: StreamResampler,
    slot: &Arc<Mutex<Option<CallEvents>>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: PcmSample + cpal::SizedSample,
{
    let slot = Arc::clone(slot);
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let guard = slot.lock();
            if let Some(events) = guard.as_ref() {
                let samples: Vec<f32> = data.iter().map(|&s| s.to_f32()).collect();
                events.captured(resampler.process(&downmix(&samples, channels)));
            }
        },
        |err| warn!(error = %err, "Input stream error"),
        None,
    )
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    channels: usize,
    state: &Arc<Mutex<OutputState>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: PcmSample + cpal::SizedSample,
{
    let state = Arc::clone(state);
    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut state = state.lock();
            for frame in data.chunks_mut(channels) {
                let sample = T::from_f32(state.samples.pop_front().unwrap_or(0.0));
                frame.fill(sample);
            }
            if state.samples.is_empty() {
                if let Some(id) = state.current.take() {
                    if let Some(events) = state.events.as_ref() {
                        events.playback_finished(id);
                    }
                }
            }
        },
        |err| warn!(error = %err, "Output stream error"),
        None,
    )
}
