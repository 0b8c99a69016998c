//! WAV-file and virtual devices.
//!
//! [`FileSource`] plays a WAV file into the session as if it were a
//! microphone and keeps delivering silence once the file runs out, like an
//! idle microphone would. [`FileSink`] accepts agent speech with real-time
//! timing and optionally records it to a WAV file on close.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{downmix, resample_linear};
use crate::audio::capture::{AudioSource, CaptureConstraints};
use crate::audio::codec::float_to_pcm16;
use crate::audio::playback::{AudioChunk, AudioSink};
use crate::error::{VoiceError, VoiceResult};
use crate::session::CallEvents;

/// Samples per delivered run, roughly what a sound card callback hands over.
const RUN_LENGTH: usize = 1024;

pub struct FileSource {
    path: Option<PathBuf>,
    samples: Vec<f32>,
    sample_rate: u32,
    task: Option<JoinHandle<()>>,
}

impl FileSource {
    pub fn wav(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            samples: Vec::new(),
            sample_rate: 0,
            task: None,
        }
    }

    pub fn silence() -> Self {
        Self {
            path: None,
            samples: Vec::new(),
            sample_rate: 0,
            task: None,
        }
    }
}

#[async_trait]
impl AudioSource for FileSource {
    async fn open(&mut self, constraints: &CaptureConstraints) -> VoiceResult<()> {
        self.sample_rate = constraints.sample_rate;

        if let Some(path) = self.path.clone() {
            let rate = constraints.sample_rate;
            let samples = tokio::task::spawn_blocking(move || read_wav(&path, rate))
                .await
                .map_err(|e| VoiceError::Capture(format!("WAV reader task failed: {}", e)))??;
            info!(samples = samples.len(), "Loaded WAV input");
            self.samples = samples;
        }

        Ok(())
    }

    fn start(&mut self, events: CallEvents) -> VoiceResult<()> {
        if self.task.is_some() {
            return Ok(());
        }
        if self.sample_rate == 0 {
            return Err(VoiceError::Capture("input started before it was opened".to_string()));
        }

        let samples = std::mem::take(&mut self.samples);
        self.task = Some(tokio::spawn(stream_samples(samples, self.sample_rate, events)));
        Ok(())
    }

    fn stop(&mut self) -> VoiceResult<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn stream_samples(samples: Vec<f32>, sample_rate: u32, events: CallEvents) {
    let period = Duration::from_secs_f64(RUN_LENGTH as f64 / sample_rate as f64);
    let mut ticker = tokio::time::interval(period);
    let mut cursor = 0;

    loop {
        ticker.tick().await;

        let run = if cursor < samples.len() {
            let end = (cursor + RUN_LENGTH).min(samples.len());
            let run = samples[cursor..end].to_vec();
            cursor = end;
            if cursor == samples.len() {
                debug!("WAV input exhausted, continuing with silence");
            }
            run
        } else {
            vec![0.0; RUN_LENGTH]
        };

        if !events.captured(run) {
            break;
        }
    }
}

/// Decode a WAV file to mono f32 at `target_rate`.
pub fn read_wav(path: &Path, target_rate: u32) -> VoiceResult<Vec<f32>> {
    let unreadable = |e: hound::Error| VoiceError::Capture(format!("cannot read {}: {}", path.display(), e));

    let mut reader = hound::WavReader::open(path).map_err(unreadable)?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>().map_err(unreadable)?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|sample| sample.map(|s| s as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(unreadable)?
        }
    };

    let mono = downmix(&interleaved, spec.channels);
    Ok(resample_linear(&mono, spec.sample_rate, target_rate))
}

/// Write mono 16-bit PCM, the same quantization the wire uses.
pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> VoiceResult<()> {
    let unwritable = |e: hound::Error| VoiceError::Playback(format!("cannot write {}: {}", path.display(), e));
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec).map_err(unwritable)?;
    for sample in float_to_pcm16(samples) {
        writer.write_sample(sample).map_err(unwritable)?;
    }
    writer.finalize().map_err(unwritable)
}

pub struct FileSink {
    path: Option<PathBuf>,
    sample_rate: u32,
    events: Option<CallEvents>,
    timer: Option<JoinHandle<()>>,
    recorded: Vec<f32>,
    current: Option<(Vec<f32>, Instant)>,
}

impl FileSink {
    pub fn wav(path: impl Into<PathBuf>) -> Self {
        Self::with_path(Some(path.into()))
    }

    pub fn null() -> Self {
        Self::with_path(None)
    }

    fn with_path(path: Option<PathBuf>) -> Self {
        Self {
            path,
            sample_rate: 0,
            events: None,
            timer: None,
            recorded: Vec::new(),
            current: None,
        }
    }

    /// Record whatever part of the current chunk has been "heard".
    fn commit_current(&mut self) {
        if let Some((samples, started)) = self.current.take() {
            let heard = (started.elapsed().as_secs_f64() * self.sample_rate as f64) as usize;
            self.recorded.extend_from_slice(&samples[..heard.min(samples.len())]);
        }
    }
}

impl AudioSink for FileSink {
    fn open(&mut self, sample_rate: u32, events: CallEvents) -> VoiceResult<()> {
        self.sample_rate = sample_rate;
        self.events = Some(events);
        self.recorded.clear();
        Ok(())
    }

    fn play(&mut self, chunk: AudioChunk) -> VoiceResult<()> {
        let events = self
            .events
            .clone()
            .ok_or_else(|| VoiceError::Playback("output is not open".to_string()))?;

        self.commit_current();
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }

        let id = chunk.id;
        let duration = chunk.duration();
        if self.path.is_some() {
            self.current = Some((chunk.samples, Instant::now()));
        }

        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            events.playback_finished(id);
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.commit_current();
    }

    fn close(&mut self) -> VoiceResult<()> {
        self.stop();
        self.events = None;

        if let Some(path) = &self.path {
            write_wav(path, &self.recorded, self.sample_rate)?;
            info!(path = %path.display(), samples = self.recorded.len(), "Wrote agent speech");
        }
        self.recorded.clear();
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if self.events.is_some() {
            warn!("Audio output dropped without being closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::events::{CallEvent, SessionEvent};
    use tokio::sync::mpsc;

    fn temp_wav(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}.wav", name, uuid::Uuid::new_v4()))
    }

    fn constraints(sample_rate: u32) -> CaptureConstraints {
        CaptureConstraints {
            sample_rate,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }

    #[test]
    fn test_wav_round_trip_resamples_and_downmixes() {
        let path = temp_wav("stereo");
        // write_wav only writes mono, so build the stereo file directly.
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 48_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4800 {
            writer.write_sample(8192i16).unwrap();
            writer.write_sample(-8192i16).unwrap();
        }
        writer.finalize().unwrap();

        let samples = read_wav(&path, 24_000).unwrap();
        assert_eq!(samples.len(), 2400);
        assert!(samples.iter().all(|s| s.abs() < 1e-6));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_float_and_24_bit_wavs_are_scaled_to_unit_range() {
        let float_path = temp_wav("float");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24_000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(&float_path, spec).unwrap();
        for sample in [0.5f32, -0.25] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        assert_eq!(read_wav(&float_path, 24_000).unwrap(), vec![0.5, -0.25]);

        let int_path = temp_wav("int24");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 24_000,
            bits_per_sample: 24,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&int_path, spec).unwrap();
        for sample in [4_194_304i32, -8_388_608] {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        assert_eq!(read_wav(&int_path, 24_000).unwrap(), vec![0.5, -1.0]);

        std::fs::remove_file(&float_path).ok();
        std::fs::remove_file(&int_path).ok();
    }

    #[test]
    fn test_missing_wav_is_capture_error() {
        let err = read_wav(Path::new("/definitely/not/here.wav"), 24_000).unwrap_err();
        assert!(matches!(err, VoiceError::Capture(_)));
    }

    #[tokio::test]
    async fn test_source_streams_file_then_silence() {
        let path = temp_wav("input");
        write_wav(&path, &vec![0.25; 1500], 24_000).unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut source = FileSource::wav(&path);
        source.open(&constraints(24_000)).await.unwrap();
        source.start(CallEvents::new(3, tx)).unwrap();

        let mut lengths = Vec::new();
        while lengths.len() < 3 {
            match rx.recv().await {
                Some(SessionEvent::Call { generation: 3, event: CallEvent::Captured(run) }) => {
                    lengths.push(run.len())
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(lengths, vec![1024, 476, 1024]);

        source.stop().unwrap();
        source.stop().unwrap();
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_sink_reports_completion() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = FileSink::null();
        sink.open(24_000, CallEvents::new(1, tx)).unwrap();
        sink.play(AudioChunk { id: 7, samples: vec![0.0; 240], sample_rate: 24_000 }).unwrap();

        match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await {
            Ok(Some(SessionEvent::Call { event: CallEvent::PlaybackFinished(7), .. })) => {}
            other => panic!("unexpected {:?}", other),
        }
        sink.close().unwrap();
    }

    #[tokio::test]
    async fn test_stopped_chunk_is_truncated_and_never_completes() {
        let path = temp_wav("output");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sink = FileSink::wav(&path);
        sink.open(24_000, CallEvents::new(1, tx)).unwrap();
        sink.play(AudioChunk { id: 0, samples: vec![0.5; 48_000], sample_rate: 24_000 }).unwrap();
        sink.stop();
        sink.close().unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        let recorded = read_wav(&path, 24_000).unwrap();
        assert!(recorded.len() < 48_000);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_play_before_open_fails() {
        let mut sink = FileSink::null();
        let chunk = AudioChunk { id: 0, samples: vec![0.0; 10], sample_rate: 24_000 };
        assert!(matches!(sink.play(chunk), Err(VoiceError::Playback(_))));
    }
}
