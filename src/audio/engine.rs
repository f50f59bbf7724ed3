//! Playback state machine.
//!
//! The engine is driven from the dispatch loop (and the MPRIS bridge). It
//! owns the output buffer for the life of the process and runs at most one
//! player thread at a time; every transport change first halts that thread,
//! then consults the navigator, then starts a fresh one.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::Settings;
use crate::decoder::{DecoderRegistry, is_url};
use crate::error::ServerError;
use crate::playlist::Navigator;
use crate::protocol::{Event, EventSink};
use crate::tags::TagCache;

use super::dsp::{Dsp, Equalizer, SoftMixer};
use super::outbuf::{OutputBuffer, SinkFactory};
use super::player;
use super::precache::Precache;
use super::sink::open_first;
use super::types::{PlayState, Request, SoundParams};

pub(super) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The single pending request for the player thread.
///
/// A stop is never replaced by a seek; a newer seek replaces an older one.
#[derive(Default)]
pub(super) struct RequestSlot {
    slot: Mutex<Option<Request>>,
    cond: Condvar,
}

impl RequestSlot {
    pub(super) fn post(&self, req: Request) {
        let mut slot = lock(&self.slot);
        if *slot != Some(Request::Stop) {
            *slot = Some(req);
        }
        self.cond.notify_all();
    }

    pub(super) fn take(&self) -> Option<Request> {
        lock(&self.slot).take()
    }

    pub(super) fn clear(&self) {
        *lock(&self.slot) = None;
    }

    /// Run `f` with the slot locked, unless a stop is pending.
    ///
    /// A stop posted concurrently lands either before `f` (which then does
    /// not run) or after it has returned, never in between.
    pub(super) fn unless_stopped<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let slot = lock(&self.slot);
        if *slot == Some(Request::Stop) {
            return None;
        }
        let out = f();
        drop(slot);
        Some(out)
    }

    /// Sleep until a request arrives, `ready` holds, or `timeout` passes.
    pub(super) fn wait(&self, ready: impl Fn() -> bool, timeout: Duration) {
        let slot = lock(&self.slot);
        if slot.is_some() || ready() {
            return;
        }
        drop(self.cond.wait_timeout(slot, timeout));
    }

    /// Wake the player so it re-checks its condition.
    pub(super) fn notify(&self) {
        let _slot = lock(&self.slot);
        self.cond.notify_all();
    }
}

/// What the engine reports about the current song.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Status {
    pub state: PlayState,
    pub file: Option<String>,
    pub time: Duration,
    pub duration: Option<Duration>,
    pub params: SoundParams,
    pub bitrate: i32,
    pub avg_bitrate: i32,
}

/// Engine knobs taken from the configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub output_buffer_ms: u32,
    pub precache: bool,
    pub dsp: Dsp,
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            output_buffer_ms: settings.audio.output_buffer_ms,
            precache: settings.playback.precache,
            dsp: Dsp {
                equalizer: Equalizer::new(
                    settings.equalizer.enabled,
                    settings.equalizer.presets.clone(),
                ),
                softmixer: SoftMixer::new(settings.audio.softmixer, settings.audio.softmixer_level),
            },
        }
    }
}

/// Builds the configured backend list on the output thread.
pub fn backend_factory(names: Vec<String>) -> SinkFactory {
    Box::new(move || open_first(&names))
}

/// State shared between the engine handle and the player thread.
pub(super) struct EngineShared {
    pub(super) nav: Arc<Mutex<Navigator>>,
    pub(super) decoders: Arc<DecoderRegistry>,
    pub(super) tags: Arc<TagCache>,
    pub(super) events: Arc<dyn EventSink>,
    pub(super) out: OutputBuffer,
    pub(super) requests: Arc<RequestSlot>,
    pub(super) dsp: Mutex<Dsp>,
    pub(super) precache: Precache,
    status: Mutex<Status>,
    precache_enabled: bool,
    buffer_ms: u32,
}

impl EngineShared {
    fn set_state(&self, state: PlayState) {
        {
            let mut status = lock(&self.status);
            if status.state == state {
                return;
            }
            status.state = state;
        }
        self.events.broadcast(&Event::State(state));
    }

    pub(super) fn set_stopped(&self) {
        let had_file = {
            let mut status = lock(&self.status);
            let had = status.file.take().is_some();
            status.bitrate = 0;
            status.avg_bitrate = 0;
            status.duration = None;
            had
        };
        self.set_state(PlayState::Stopped);
        if had_file {
            self.events.broadcast(&Event::Song(None));
        }
    }

    pub(super) fn track_started(&self, path: &str, duration: Option<Duration>, bitrate: Option<i32>) {
        let duration = duration.or_else(|| self.tags.get_immediate(path).duration());
        let bitrate = bitrate.unwrap_or(0);
        {
            let mut status = lock(&self.status);
            status.file = Some(path.to_string());
            status.duration = duration;
            status.bitrate = bitrate;
            status.avg_bitrate = 0;
        }
        log::info!("playing {path}");
        self.events.broadcast(&Event::Song(Some(path.to_string())));
        self.events.broadcast(&Event::Bitrate(bitrate));
        self.set_state(PlayState::Playing);
    }

    pub(super) fn params_changed(&self, params: SoundParams) {
        lock(&self.status).params = params;
        self.events.broadcast(&Event::Rate(params.rate as i32));
        self.events.broadcast(&Event::Channels(params.channels as i32));
    }

    pub(super) fn bitrate_changed(&self, kbps: i32) {
        lock(&self.status).bitrate = kbps;
        self.events.broadcast(&Event::Bitrate(kbps));
    }

    pub(super) fn avg_bitrate_changed(&self, kbps: i32) {
        {
            let mut status = lock(&self.status);
            if status.avg_bitrate == kbps {
                return;
            }
            status.avg_bitrate = kbps;
        }
        self.events.broadcast(&Event::AvgBitrate(kbps));
    }

    /// Start decoding whatever comes after `current`, if anything.
    pub(super) fn precache_next(&self, current: &str) {
        if !self.precache_enabled {
            return;
        }
        let next = lock(&self.nav).peek_next();
        match next {
            Some(next) if next != current && !is_url(&next) => {
                self.precache
                    .start(next, self.decoders.clone(), self.buffer_ms);
            }
            _ => {}
        }
    }

    fn status(&self) -> Status {
        let mut status = lock(&self.status).clone();
        if status.state != PlayState::Stopped {
            status.time = self.out.time();
        }
        status
    }
}

pub struct Engine {
    shared: Arc<EngineShared>,
    player: Mutex<Option<JoinHandle<()>>>,
    /// Serializes transport operations from different callers.
    control: Mutex<()>,
    /// Stream paused by stopping it; resumed by playing it again.
    paused_url: Mutex<Option<String>>,
}

impl Engine {
    pub fn start(
        opts: EngineOptions,
        sink: SinkFactory,
        nav: Arc<Mutex<Navigator>>,
        decoders: Arc<DecoderRegistry>,
        tags: Arc<TagCache>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ServerError> {
        let requests = Arc::new(RequestSlot::default());
        let space = requests.clone();
        let clock = events.clone();
        let out = OutputBuffer::start(
            sink,
            opts.output_buffer_ms,
            Arc::new(move || space.notify()),
            Box::new(move |at: Duration| clock.broadcast(&Event::Ctime(at.as_secs() as i32))),
        )?;

        Ok(Self {
            shared: Arc::new(EngineShared {
                nav,
                decoders,
                tags,
                events,
                out,
                requests,
                dsp: Mutex::new(opts.dsp),
                precache: Precache::default(),
                status: Mutex::new(Status::default()),
                precache_enabled: opts.precache,
                buffer_ms: opts.output_buffer_ms,
            }),
            player: Mutex::new(None),
            control: Mutex::new(()),
            paused_url: Mutex::new(None),
        })
    }

    /// Play `path`, or stop when there is nothing to play.
    pub fn play(&self, path: Option<String>) {
        let _control = lock(&self.control);
        self.halt_player();
        self.start_or_stop(path);
    }

    pub fn stop(&self) {
        let _control = lock(&self.control);
        self.halt_player();
        *lock(&self.paused_url) = None;
        self.shared.out.unpause();
        self.shared.set_stopped();
    }

    pub fn next(&self) {
        let _control = lock(&self.control);
        self.halt_player();
        let next = lock(&self.shared.nav).next(true);
        self.start_or_stop(next);
    }

    pub fn prev(&self) {
        let _control = lock(&self.control);
        self.halt_player();
        let prev = lock(&self.shared.nav).prev();
        self.start_or_stop(prev);
    }

    pub fn pause(&self) {
        let _control = lock(&self.control);
        let status = self.shared.status();
        if status.state != PlayState::Playing {
            return;
        }
        match status.file.filter(|f| is_url(f)) {
            Some(url) => {
                self.halt_player();
                *lock(&self.paused_url) = Some(url);
            }
            None => self.shared.out.pause(),
        }
        self.shared.set_state(PlayState::Paused);
    }

    pub fn unpause(&self) {
        let _control = lock(&self.control);
        if self.shared.status().state != PlayState::Paused {
            return;
        }
        let url = lock(&self.paused_url).take();
        match url {
            Some(url) => self.spawn_player(url),
            None => {
                self.shared.out.unpause();
                self.shared.set_state(PlayState::Playing);
            }
        }
    }

    /// Move `delta` seconds from the current position.
    pub fn seek(&self, delta: i32) {
        if self.state() == PlayState::Stopped {
            return;
        }
        let now = self.shared.out.time().as_secs() as i64;
        let to = (now + delta as i64).max(0) as u64;
        self.shared.requests.post(Request::Seek(Duration::from_secs(to)));
    }

    pub fn jump_to(&self, secs: i32) {
        if self.state() == PlayState::Stopped {
            return;
        }
        let to = Duration::from_secs(secs.max(0) as u64);
        self.shared.requests.post(Request::Seek(to));
    }

    pub fn jump_to_percent(&self, percent: i32) {
        let Some(duration) = self.shared.status().duration else {
            log::debug!("cannot jump to {percent}%: duration unknown");
            return;
        };
        let to = duration.mul_f64(percent.clamp(0, 100) as f64 / 100.0);
        self.jump_to(to.as_secs() as i32);
    }

    pub fn status(&self) -> Status {
        self.shared.status()
    }

    pub fn state(&self) -> PlayState {
        lock(&self.shared.status).state
    }

    pub fn current_file(&self) -> Option<String> {
        lock(&self.shared.status).file.clone()
    }

    pub fn ctime(&self) -> i32 {
        self.shared.status().time.as_secs() as i32
    }

    pub fn bitrate(&self) -> i32 {
        lock(&self.shared.status).bitrate
    }

    pub fn avg_bitrate(&self) -> i32 {
        lock(&self.shared.status).avg_bitrate
    }

    pub fn rate(&self) -> i32 {
        lock(&self.shared.status).params.rate as i32
    }

    pub fn channels(&self) -> i32 {
        lock(&self.shared.status).params.channels as i32
    }

    /// Volume of whichever mixer is in charge.
    pub fn mixer(&self) -> i32 {
        let dsp = lock(&self.shared.dsp);
        if dsp.softmixer.active {
            dsp.softmixer.level()
        } else {
            self.shared.out.read_mixer()
        }
    }

    /// Returns the level actually set.
    pub fn set_mixer(&self, level: i32) -> i32 {
        let level = level.clamp(0, 100);
        let mut dsp = lock(&self.shared.dsp);
        if dsp.softmixer.active {
            dsp.softmixer.set_level(level);
        } else {
            self.shared.out.set_mixer(level);
        }
        level
    }

    pub fn toggle_mixer_channel(&self) -> i32 {
        if !lock(&self.shared.dsp).softmixer.active {
            self.shared.out.toggle_mixer_channel();
        }
        self.mixer()
    }

    /// Returns the new soft mixer state.
    pub fn toggle_softmixer(&self) -> bool {
        let mut dsp = lock(&self.shared.dsp);
        dsp.softmixer.active = !dsp.softmixer.active;
        log::debug!("soft mixer {}", if dsp.softmixer.active { "on" } else { "off" });
        dsp.softmixer.active
    }

    pub fn mixer_channel_name(&self) -> String {
        if lock(&self.shared.dsp).softmixer.active {
            "Soft".to_string()
        } else {
            self.shared.out.mixer_channel_name()
        }
    }

    pub fn toggle_equalizer(&self) -> String {
        let mut dsp = lock(&self.shared.dsp);
        dsp.equalizer.active = !dsp.equalizer.active;
        dsp.equalizer.describe()
    }

    pub fn equalizer_next(&self) -> String {
        let mut dsp = lock(&self.shared.dsp);
        dsp.equalizer.next_preset();
        dsp.equalizer.describe()
    }

    pub fn equalizer_prev(&self) -> String {
        let mut dsp = lock(&self.shared.dsp);
        dsp.equalizer.prev_preset();
        dsp.equalizer.describe()
    }

    /// Stop playback and release the audio device.
    pub fn shutdown(&self) {
        let _control = lock(&self.control);
        self.halt_player();
        self.shared.precache.discard();
        self.shared.set_stopped();
        self.shared.out.shutdown();
    }

    fn start_or_stop(&self, path: Option<String>) {
        *lock(&self.paused_url) = None;
        match path {
            Some(path) => self.spawn_player(path),
            None => self.shared.set_stopped(),
        }
    }

    fn spawn_player(&self, path: String) {
        self.shared.requests.clear();
        self.shared.out.unpause();
        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("player".into())
            .spawn(move || player::run(shared, path));
        match spawned {
            Ok(handle) => *lock(&self.player) = Some(handle),
            Err(e) => {
                log::error!("cannot start player thread: {e}");
                self.shared
                    .events
                    .broadcast(&Event::SrvError(format!("cannot start playback: {e}")));
                self.shared.set_stopped();
            }
        }
    }

    /// Stop the player thread and wait for it.
    fn halt_player(&self) {
        let handle = lock(&self.player).take();
        if let Some(handle) = handle {
            self.shared.requests.post(Request::Stop);
            self.shared.out.reset();
            if handle.join().is_err() {
                log::error!("player thread panicked");
            }
        }
        self.shared.requests.clear();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.halt_player();
        self.shared.precache.discard();
    }
}
