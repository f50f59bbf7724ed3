//! Audio output backends.
//!
//! A backend is built and used on the output writer thread only: rodio's
//! output stream cannot move between threads, so backends are chosen by
//! name there, in the configured priority order.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};

use crate::error::ServerError;

use super::types::SoundParams;

pub trait AudioSink {
    fn name(&self) -> &'static str;

    /// Prepare for samples in `params`. Called with nothing buffered.
    fn open(&mut self, params: SoundParams) -> Result<(), ServerError>;

    fn close(&mut self);

    /// Hand samples to the device. Returns how many were taken; zero when
    /// the device queue is full.
    fn play(&mut self, samples: &[f32]) -> usize;

    /// Samples taken but not yet heard.
    fn buffered(&self) -> usize;

    /// Drop everything buffered.
    fn reset(&mut self);

    /// The rate the device really runs at.
    fn actual_rate(&self) -> u32;

    fn pause(&mut self);

    fn unpause(&mut self);

    /// Volume, 0-100.
    fn read_mixer(&self) -> i32;

    fn set_mixer(&mut self, level: i32);

    fn mixer_channel_name(&self) -> String;

    fn toggle_mixer_channel(&mut self);
}

/// Open the first backend in `names` that works.
pub fn open_first(names: &[String]) -> Result<Box<dyn AudioSink>, ServerError> {
    for name in names {
        match open_backend(name) {
            Ok(sink) => {
                log::info!("audio backend: {}", sink.name());
                return Ok(sink);
            }
            Err(e) => log::warn!("audio backend `{name}` unavailable: {e}"),
        }
    }
    Err(ServerError::NoAudioBackend(names.join(", ")))
}

fn open_backend(name: &str) -> Result<Box<dyn AudioSink>, ServerError> {
    match name {
        "rodio" => Ok(Box::new(RodioSink::open_default()?)),
        "null" => Ok(Box::new(NullSink::new())),
        other => Err(ServerError::AudioBackend {
            backend: other.to_string(),
            reason: "unknown backend".to_string(),
        }),
    }
}

/// Chunks queued in rodio before `play` reports the device full.
const RODIO_MAX_QUEUED: usize = 4;

/// The default system output through rodio.
pub struct RodioSink {
    /// Dropping the stream silences the sink.
    _stream: OutputStream,
    sink: Sink,
    params: SoundParams,
    /// Sizes of the chunks appended, oldest first.
    queued: VecDeque<usize>,
    paused: bool,
}

impl RodioSink {
    pub fn open_default() -> Result<Self, ServerError> {
        let mut stream =
            OutputStreamBuilder::open_default_stream().map_err(|e| ServerError::AudioBackend {
                backend: "rodio".to_string(),
                reason: e.to_string(),
            })?;
        // rodio logs to stderr when the stream is dropped.
        stream.log_on_drop(false);
        let sink = Sink::connect_new(stream.mixer());
        Ok(Self {
            _stream: stream,
            sink,
            params: SoundParams::default(),
            queued: VecDeque::new(),
            paused: false,
        })
    }

    fn prune(&mut self) {
        while self.queued.len() > self.sink.len() {
            self.queued.pop_front();
        }
    }
}

impl AudioSink for RodioSink {
    fn name(&self) -> &'static str {
        "rodio"
    }

    fn open(&mut self, params: SoundParams) -> Result<(), ServerError> {
        if !params.is_known() {
            return Err(ServerError::AudioBackend {
                backend: "rodio".to_string(),
                reason: format!("unusable format {params:?}"),
            });
        }
        self.params = params;
        Ok(())
    }

    fn close(&mut self) {
        self.reset();
    }

    fn play(&mut self, samples: &[f32]) -> usize {
        self.prune();
        if self.queued.len() >= RODIO_MAX_QUEUED || !self.params.is_known() {
            return 0;
        }
        self.sink.append(SamplesBuffer::new(
            self.params.channels,
            self.params.rate,
            samples.to_vec(),
        ));
        self.queued.push_back(samples.len());
        samples.len()
    }

    fn buffered(&self) -> usize {
        self.queued.iter().rev().take(self.sink.len()).sum()
    }

    fn reset(&mut self) {
        // `clear` also pauses the sink.
        self.sink.clear();
        self.queued.clear();
        if !self.paused {
            self.sink.play();
        }
    }

    fn actual_rate(&self) -> u32 {
        // rodio resamples to the device on its own mixer thread.
        self.params.rate
    }

    fn pause(&mut self) {
        self.paused = true;
        self.sink.pause();
    }

    fn unpause(&mut self) {
        self.paused = false;
        self.sink.play();
    }

    fn read_mixer(&self) -> i32 {
        (self.sink.volume() * 100.0).round() as i32
    }

    fn set_mixer(&mut self, level: i32) {
        self.sink.set_volume(level.clamp(0, 100) as f32 / 100.0);
    }

    fn mixer_channel_name(&self) -> String {
        "Sink".to_string()
    }

    fn toggle_mixer_channel(&mut self) {
        log::debug!("rodio exposes a single mixer channel");
    }
}

/// Audio may run this far ahead of the wall clock in the null sink.
const NULL_LEAD: Duration = Duration::from_millis(100);

/// Discards audio at real-time pace. Used when no device is available and
/// in tests.
#[derive(Debug)]
pub struct NullSink {
    params: SoundParams,
    started: Option<Instant>,
    paused_at: Option<Instant>,
    taken: usize,
    levels: [i32; 2],
    channel: usize,
}

impl NullSink {
    pub fn new() -> Self {
        Self {
            params: SoundParams::default(),
            started: None,
            paused_at: None,
            taken: 0,
            levels: [100, 100],
            channel: 0,
        }
    }

    fn played(&self) -> usize {
        let Some(started) = self.started else {
            return 0;
        };
        let now = self.paused_at.unwrap_or_else(Instant::now);
        let secs = now.saturating_duration_since(started).as_secs_f64();
        (secs * self.params.samples_per_sec() as f64) as usize
    }
}

impl Default for NullSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSink for NullSink {
    fn name(&self) -> &'static str {
        "null"
    }

    fn open(&mut self, params: SoundParams) -> Result<(), ServerError> {
        self.params = params;
        self.reset();
        Ok(())
    }

    fn close(&mut self) {
        self.reset();
    }

    fn play(&mut self, samples: &[f32]) -> usize {
        if self.paused_at.is_some() {
            return 0;
        }
        if !self.params.is_known() {
            return samples.len();
        }
        let channels = self.params.channels.max(1) as usize;
        let lead = self.params.samples_for_ms(NULL_LEAD.as_millis() as u32);
        let room = (self.played() + lead).saturating_sub(self.taken);
        let n = samples.len().min(room);
        let n = n - n % channels;
        if n > 0 && self.started.is_none() {
            self.started = Some(Instant::now());
        }
        self.taken += n;
        n
    }

    fn buffered(&self) -> usize {
        self.taken.saturating_sub(self.played())
    }

    fn reset(&mut self) {
        self.started = None;
        self.taken = 0;
        if self.paused_at.is_some() {
            self.paused_at = Some(Instant::now());
        }
    }

    fn actual_rate(&self) -> u32 {
        self.params.rate
    }

    fn pause(&mut self) {
        if self.paused_at.is_none() {
            self.paused_at = Some(Instant::now());
        }
    }

    fn unpause(&mut self) {
        if let Some(at) = self.paused_at.take()
            && let Some(started) = self.started.as_mut()
        {
            *started += at.elapsed();
        }
    }

    fn read_mixer(&self) -> i32 {
        self.levels[self.channel]
    }

    fn set_mixer(&mut self, level: i32) {
        self.levels[self.channel] = level.clamp(0, 100);
    }

    fn mixer_channel_name(&self) -> String {
        ["Master", "PCM"][self.channel].to_string()
    }

    fn toggle_mixer_channel(&mut self) {
        self.channel = 1 - self.channel;
    }
}
