//! # Audio Devices
//!
//! Concrete [`AudioSource`]s and [`AudioSink`]s, selected by the `audio.input`
//! and `audio.output` configuration strings:
//!
//! | string       | input                              | output                           |
//! |--------------|------------------------------------|----------------------------------|
//! | `wav:<path>` | stream the file as the microphone  | record agent speech to the file  |
//! | `silence`    | an always-silent microphone        |                                  |
//! | `null`       |                                    | discard agent speech (timed)     |
//! | `cpal`       | system microphone                  | system speakers                  |
//!
//! File and null devices are paced in real time so that the session sees the
//! same timing it would with a sound card.

pub mod file;

#[cfg(feature = "cpal")]
pub mod system;

use crate::audio::capture::AudioSource;
use crate::audio::playback::AudioSink;
use crate::config::AudioConfig;
use crate::error::{VoiceError, VoiceResult};

pub use file::{FileSink, FileSource};

/// Creates the devices for a call. The session asks for a fresh pair on every
/// call start.
pub trait DeviceFactory: Send {
    fn source(&self, audio: &AudioConfig) -> VoiceResult<Box<dyn AudioSource>>;
    fn sink(&self, audio: &AudioConfig) -> VoiceResult<Box<dyn AudioSink>>;
}

/// Builds devices from the `audio.input` / `audio.output` strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfiguredDevices;

impl DeviceFactory for ConfiguredDevices {
    fn source(&self, audio: &AudioConfig) -> VoiceResult<Box<dyn AudioSource>> {
        match DeviceSpec::parse(&audio.input) {
            Some(DeviceSpec::Wav(path)) => Ok(Box::new(FileSource::wav(path))),
            Some(DeviceSpec::Silence) => Ok(Box::new(FileSource::silence())),
            Some(DeviceSpec::System) => system_source(),
            _ => Err(VoiceError::Capture(format!(
                "unknown audio input '{}'",
                audio.input
            ))),
        }
    }

    fn sink(&self, audio: &AudioConfig) -> VoiceResult<Box<dyn AudioSink>> {
        match DeviceSpec::parse(&audio.output) {
            Some(DeviceSpec::Wav(path)) => Ok(Box::new(FileSink::wav(path))),
            Some(DeviceSpec::Null) => Ok(Box::new(FileSink::null())),
            Some(DeviceSpec::System) => system_sink(),
            _ => Err(VoiceError::Playback(format!(
                "unknown audio output '{}'",
                audio.output
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DeviceSpec {
    Wav(String),
    Silence,
    Null,
    System,
}

impl DeviceSpec {
    fn parse(spec: &str) -> Option<Self> {
        let spec = spec.trim();
        if let Some(path) = spec.strip_prefix("wav:") {
            return (!path.is_empty()).then(|| DeviceSpec::Wav(path.to_string()));
        }
        match spec {
            "silence" => Some(DeviceSpec::Silence),
            "null" => Some(DeviceSpec::Null),
            "cpal" => Some(DeviceSpec::System),
            _ => None,
        }
    }
}

#[cfg(feature = "cpal")]
fn system_source() -> VoiceResult<Box<dyn AudioSource>> {
    Ok(Box::new(system::SystemSource::default()))
}

#[cfg(not(feature = "cpal"))]
fn system_source() -> VoiceResult<Box<dyn AudioSource>> {
    Err(VoiceError::Capture(
        "system microphone requested but the client was built without the `cpal` feature".to_string(),
    ))
}

#[cfg(feature = "cpal")]
fn system_sink() -> VoiceResult<Box<dyn AudioSink>> {
    Ok(Box::new(system::SystemSink::default()))
}

#[cfg(not(feature = "cpal"))]
fn system_sink() -> VoiceResult<Box<dyn AudioSink>> {
    Err(VoiceError::Playback(
        "system speakers requested but the client was built without the `cpal` feature".to_string(),
    ))
}

/// Average interleaved frames down to one channel.
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// A sample type a sound card may hand over or ask for.
#[cfg_attr(not(feature = "cpal"), allow(dead_code))]
pub trait PcmSample: Copy {
    fn to_f32(self) -> f32;
    fn from_f32(sample: f32) -> Self;
}

impl PcmSample for f32 {
    fn to_f32(self) -> f32 {
        self
    }

    fn from_f32(sample: f32) -> Self {
        sample
    }
}

impl PcmSample for i16 {
    fn to_f32(self) -> f32 {
        self as f32 / 32768.0
    }

    fn from_f32(sample: f32) -> Self {
        let clamped = sample.clamp(-1.0, 1.0);
        if clamped < 0.0 {
            (clamped * 32768.0) as i16
        } else {
            (clamped * 32767.0) as i16
        }
    }
}

impl PcmSample for u16 {
    fn to_f32(self) -> f32 {
        (self as f32 - 32768.0) / 32768.0
    }

    fn from_f32(sample: f32) -> Self {
        (i16::from_f32(sample) as i32 + 32768) as u16
    }
}

/// Linear resampler for a continuous stream fed in buffers of any size.
///
/// The read position and the last input sample carry over from one buffer
/// to the next, so buffer boundaries do not shift or click the output.
#[cfg_attr(not(feature = "cpal"), allow(dead_code))]
#[derive(Debug, Clone)]
pub struct StreamResampler {
    step: f64,
    /// Source position of the next output sample, relative to the start of
    /// the next buffer. `-1.0..0.0` reads between `previous` and its first
    /// sample.
    position: f64,
    previous: Option<f32>,
}

#[cfg_attr(not(feature = "cpal"), allow(dead_code))]
impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let step = if from_rate == 0 || to_rate == 0 {
            1.0
        } else {
            from_rate as f64 / to_rate as f64
        };
        Self {
            step,
            position: 0.0,
            previous: None,
        }
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }
        if self.step == 1.0 {
            return input.to_vec();
        }

        let len = input.len() as isize;
        let mut output = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        loop {
            let idx0 = self.position.floor() as isize;
            if idx0 + 1 >= len {
                break;
            }
            let s0 = if idx0 < 0 {
                self.previous.unwrap_or(input[0])
            } else {
                input[idx0 as usize]
            };
            let s1 = input[(idx0 + 1) as usize];
            let frac = (self.position - idx0 as f64) as f32;
            output.push(s0 + frac * (s1 - s0));
            self.position += self.step;
        }

        self.position -= input.len() as f64;
        self.previous = input.last().copied();
        output
    }
}

/// Linear-interpolation resampler for a whole buffer. Good enough for speech.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}
