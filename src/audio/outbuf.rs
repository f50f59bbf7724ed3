//! Bounded sample buffer between the player thread and the audio device.
//!
//! A writer thread owns the backend for the life of the process and feeds
//! it from the buffer. Everything else (pausing, resets, mixer changes) is
//! posted to the writer through the shared state and applied on its next
//! pass.

use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::ServerError;

use super::sink::AudioSink;
use super::types::SoundParams;

/// Builds the backend on the writer thread.
pub type SinkFactory = Box<dyn FnOnce() -> Result<Box<dyn AudioSink>, ServerError> + Send>;
/// Called, without locks held, whenever buffer space frees up.
pub type SpaceNotify = Arc<dyn Fn() + Send + Sync>;
/// Called with the playback position whenever it crosses a whole second.
pub type TimeCallback = Box<dyn Fn(Duration) + Send>;

const WRITE_CHUNK_MS: u32 = 50;
const IDLE_TICK: Duration = Duration::from_millis(50);
const FULL_RETRY: Duration = Duration::from_millis(10);
const APPLY_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Default)]
struct MixerCache {
    level: i32,
    pending_level: Option<i32>,
    toggle_pending: bool,
    channel_name: String,
}

#[derive(Debug, Default)]
struct State {
    samples: VecDeque<f32>,
    capacity_ms: u32,
    params: SoundParams,
    params_changed: bool,
    paused: bool,
    pause_changed: bool,
    reset_pending: bool,
    exit: bool,
    /// Position of the first sample handed to the device since `written`
    /// was last zeroed.
    time_base: Duration,
    written: usize,
    device_buffered: usize,
    mixer: MixerCache,
}

impl State {
    fn capacity(&self) -> usize {
        self.params
            .samples_for_ms(self.capacity_ms)
            .max(self.params.channels as usize)
    }

    fn time(&self) -> Duration {
        let heard = self.written.saturating_sub(self.device_buffered);
        self.time_base + self.params.duration_of(heard)
    }

    fn controls_pending(&self) -> bool {
        self.reset_pending
            || self.params_changed
            || self.pause_changed
            || self.exit
            || self.mixer.pending_level.is_some()
            || self.mixer.toggle_pending
    }
}

struct Shared {
    state: Mutex<State>,
    cond: Condvar,
    on_space: SpaceNotify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_timeout<'a>(&self, guard: MutexGuard<'a, State>, timeout: Duration) -> MutexGuard<'a, State> {
        match self.cond.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }
}

pub struct OutputBuffer {
    shared: Arc<Shared>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl OutputBuffer {
    /// Spawn the writer thread and build the backend on it. Fails when the
    /// backend cannot be opened.
    pub fn start(
        factory: SinkFactory,
        capacity_ms: u32,
        on_space: SpaceNotify,
        on_time: TimeCallback,
    ) -> Result<Self, ServerError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                capacity_ms,
                ..State::default()
            }),
            cond: Condvar::new(),
            on_space,
        });

        let (ready_tx, ready_rx) = mpsc::channel();
        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("output".into())
            .spawn(move || {
                let sink = match factory() {
                    Ok(sink) => sink,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                {
                    let mut st = thread_shared.lock();
                    st.mixer.level = sink.read_mixer();
                    st.mixer.channel_name = sink.mixer_channel_name();
                }
                let _ = ready_tx.send(Ok(()));
                writer_loop(&thread_shared, sink, on_time);
            })
            .map_err(|source| ServerError::Spawn {
                what: "output",
                source,
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shared,
                writer: Mutex::new(Some(handle)),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(ServerError::NoAudioBackend("output thread exited".into()))
            }
        }
    }

    /// Append as many samples as fit. Returns how many were taken.
    pub fn put(&self, samples: &[f32]) -> usize {
        let mut st = self.shared.lock();
        let free = st.capacity().saturating_sub(st.samples.len());
        let n = free.min(samples.len());
        if n > 0 {
            st.samples.extend(&samples[..n]);
            self.shared.cond.notify_all();
        }
        n
    }

    pub fn free_space(&self) -> usize {
        let st = self.shared.lock();
        st.capacity().saturating_sub(st.samples.len())
    }

    /// Nothing left in the buffer or the device.
    pub fn is_drained(&self) -> bool {
        let st = self.shared.lock();
        st.samples.is_empty() && st.device_buffered == 0
    }

    pub fn params(&self) -> SoundParams {
        self.shared.lock().params
    }

    /// Switch format. Callers drain the buffer first.
    pub fn set_params(&self, params: SoundParams) {
        let mut st = self.shared.lock();
        st.params = params;
        st.params_changed = true;
        self.shared.cond.notify_all();
    }

    pub fn pause(&self) {
        self.set_paused(true);
    }

    pub fn unpause(&self) {
        self.set_paused(false);
    }

    fn set_paused(&self, paused: bool) {
        let mut st = self.shared.lock();
        if st.paused != paused {
            st.paused = paused;
            st.pause_changed = true;
            self.shared.cond.notify_all();
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Throw away everything buffered, here and in the device, and wake
    /// anyone waiting for space.
    pub fn reset(&self) {
        {
            let mut st = self.shared.lock();
            st.samples.clear();
            st.reset_pending = true;
            st.written = 0;
            st.device_buffered = 0;
            self.shared.cond.notify_all();
        }
        (self.shared.on_space)();
    }

    /// Restart the position clock at `at`.
    pub fn set_time(&self, at: Duration) {
        let mut st = self.shared.lock();
        st.time_base = at;
        st.written = st.device_buffered;
    }

    pub fn time(&self) -> Duration {
        self.shared.lock().time()
    }

    pub fn read_mixer(&self) -> i32 {
        self.shared.lock().mixer.level
    }

    pub fn set_mixer(&self, level: i32) {
        let level = level.clamp(0, 100);
        let mut st = self.shared.lock();
        st.mixer.level = level;
        st.mixer.pending_level = Some(level);
        self.shared.cond.notify_all();
    }

    /// Switch the device mixer channel; returns once the writer applied it.
    pub fn toggle_mixer_channel(&self) {
        let mut st = self.shared.lock();
        st.mixer.toggle_pending = true;
        self.shared.cond.notify_all();

        let deadline = Instant::now() + APPLY_TIMEOUT;
        while st.mixer.toggle_pending {
            let now = Instant::now();
            if now >= deadline {
                log::warn!("output thread did not switch mixer channel in time");
                break;
            }
            st = self.shared.wait_timeout(st, deadline - now);
        }
    }

    pub fn mixer_channel_name(&self) -> String {
        self.shared.lock().mixer.channel_name.clone()
    }

    /// Stop the writer thread and close the backend.
    pub fn shutdown(&self) {
        {
            let mut st = self.shared.lock();
            st.exit = true;
            self.shared.cond.notify_all();
        }
        let handle = self
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            log::error!("output thread panicked");
        }
    }
}

impl Drop for OutputBuffer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn apply_controls(st: &mut State, sink: &mut dyn AudioSink) {
    if st.reset_pending {
        sink.reset();
        st.reset_pending = false;
    }
    if st.params_changed {
        st.params_changed = false;
        if let Err(e) = sink.open(st.params) {
            log::error!("cannot open output for {:?}: {e}", st.params);
        } else if sink.actual_rate() != st.params.rate {
            log::debug!(
                "output runs at {} Hz for {} Hz audio",
                sink.actual_rate(),
                st.params.rate
            );
        }
    }
    if st.pause_changed {
        st.pause_changed = false;
        if st.paused {
            sink.pause();
        } else {
            sink.unpause();
        }
    }
    if let Some(level) = st.mixer.pending_level.take() {
        sink.set_mixer(level);
    }
    if st.mixer.toggle_pending {
        sink.toggle_mixer_channel();
        st.mixer.toggle_pending = false;
        st.mixer.channel_name = sink.mixer_channel_name();
        st.mixer.level = sink.read_mixer();
    }
    st.device_buffered = sink.buffered();
}

fn writer_loop(shared: &Shared, mut sink: Box<dyn AudioSink>, on_time: TimeCallback) {
    let mut last_second = None;
    let mut chunk: Vec<f32> = Vec::new();

    loop {
        let (time, exit, idle) = {
            let mut st = shared.lock();
            let had_controls = st.controls_pending();
            apply_controls(&mut st, sink.as_mut());
            if had_controls {
                shared.cond.notify_all();
            }

            let idle = st.paused || st.samples.is_empty();
            if !idle {
                let per_write = st
                    .params
                    .samples_for_ms(WRITE_CHUNK_MS)
                    .max(st.params.channels.max(1) as usize);
                let n = st.samples.len().min(per_write);
                chunk.clear();
                chunk.extend(st.samples.range(..n));
            }
            (st.time(), st.exit, idle)
        };

        let second = time.as_secs();
        if last_second != Some(second) {
            last_second = Some(second);
            on_time(time);
        }
        (shared.on_space)();

        if exit {
            break;
        }

        if idle {
            let st = shared.lock();
            if !st.controls_pending() && (st.paused || st.samples.is_empty()) {
                drop(shared.wait_timeout(st, IDLE_TICK));
            }
            continue;
        }

        let taken = sink.play(&chunk);
        let mut st = shared.lock();
        if !st.reset_pending {
            let taken = taken.min(st.samples.len());
            st.samples.drain(..taken);
            st.written += taken;
            st.device_buffered = sink.buffered();
        }
        if taken == 0 && !st.controls_pending() {
            drop(shared.wait_timeout(st, FULL_RETRY));
        }
    }

    sink.close();
}
