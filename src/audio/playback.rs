//! # Agent Speech Playback
//!
//! An ordered queue of decoded agent audio in front of an [`AudioSink`].
//!
//! ## Key Features:
//! - **Sequential**: exactly one chunk is handed to the sink at a time; the
//!   next one starts only when the sink reports the previous one finished
//! - **Self-draining**: every enqueue and every completion pulls the next
//!   chunk, so playback runs without anyone polling it
//! - **Interruptible**: `clear()` drops everything pending and stops the chunk
//!   in progress; a late completion for that chunk is recognised by its id and
//!   ignored, so nothing queued before the clear can ever start
//!
//! The sink reports completions through the session queue
//! ([`CallEvents::playback_finished`]), which is how they get back to
//! [`OutputQueue::on_finished`] on the session thread.

use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::VoiceResult;
use crate::session::CallEvents;

/// One decoded block of agent speech.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub id: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Where agent speech goes.
///
/// ## Contract:
/// - `play` starts one chunk; when it has been fully rendered the sink calls
///   `events.playback_finished(chunk.id)` exactly once
/// - `stop` silences the chunk in progress immediately and must not report it
///   as finished afterwards (a stale report is tolerated, but not required)
/// - `close` releases the device; the sink may be dropped afterwards
pub trait AudioSink: Send {
    fn open(&mut self, sample_rate: u32, events: CallEvents) -> VoiceResult<()>;
    fn play(&mut self, chunk: AudioChunk) -> VoiceResult<()>;
    fn stop(&mut self);
    fn close(&mut self) -> VoiceResult<()>;
}

/// What a call into the queue changed about the "agent is speaking" state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackTransition {
    /// Nothing observable changed.
    Unchanged,
    /// Playback began from idle.
    Started,
    /// A chunk finished and the next one took over.
    Advanced,
    /// The last chunk finished and the queue is empty.
    Drained,
    /// The completion did not belong to the chunk in progress.
    Stale,
}

pub struct OutputQueue {
    sink: Box<dyn AudioSink>,
    sample_rate: u32,
    pending: VecDeque<AudioChunk>,
    playing: Option<u64>,
    next_id: u64,
}

impl OutputQueue {
    /// Wrap an already opened sink.
    pub fn new(sink: Box<dyn AudioSink>, sample_rate: u32) -> Self {
        Self {
            sink,
            sample_rate,
            pending: VecDeque::new(),
            playing: None,
            next_id: 0,
        }
    }

    /// Append decoded samples; starts playback if nothing is playing.
    pub fn enqueue(&mut self, samples: Vec<f32>) -> PlaybackTransition {
        let chunk = AudioChunk {
            id: self.next_id,
            samples,
            sample_rate: self.sample_rate,
        };
        self.next_id += 1;
        self.pending.push_back(chunk);
        self.drain()
    }

    /// Hand the head chunk to the sink unless one is already playing.
    pub fn drain(&mut self) -> PlaybackTransition {
        if self.playing.is_some() {
            return PlaybackTransition::Unchanged;
        }

        while let Some(chunk) = self.pending.pop_front() {
            let id = chunk.id;
            match self.sink.play(chunk) {
                Ok(()) => {
                    self.playing = Some(id);
                    return PlaybackTransition::Started;
                }
                Err(e) => {
                    // A chunk the device refuses is skipped rather than
                    // stalling the rest of the response.
                    warn!(chunk_id = id, error = %e, "Failed to play audio chunk, skipping");
                }
            }
        }

        PlaybackTransition::Unchanged
    }

    /// The sink reports that chunk `id` has finished.
    pub fn on_finished(&mut self, id: u64) -> PlaybackTransition {
        if self.playing != Some(id) {
            debug!(chunk_id = id, playing = ?self.playing, "Ignoring stale playback completion");
            return PlaybackTransition::Stale;
        }

        self.playing = None;
        match self.drain() {
            PlaybackTransition::Started => PlaybackTransition::Advanced,
            _ => PlaybackTransition::Drained,
        }
    }

    /// Drop everything queued and stop the chunk in progress.
    ///
    /// Returns how many chunks were discarded, including the one cut short.
    pub fn clear(&mut self) -> usize {
        let mut discarded = self.pending.len();
        self.pending.clear();
        if self.playing.take().is_some() {
            self.sink.stop();
            discarded += 1;
        }
        discarded
    }

    pub fn is_playing(&self) -> bool {
        self.playing.is_some()
    }

    /// Chunks waiting behind the one in progress.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.playing.is_none()
    }

    /// Clear and release the output device.
    pub fn close(mut self) -> VoiceResult<()> {
        self.clear();
        self.sink.close()
    }
}
