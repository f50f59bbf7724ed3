//! The player thread: one per playback session, walking from song to song
//! until the list runs out or it is told to stop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::decoder::{Decoder, DecoderError};
use crate::protocol::Event;

use super::engine::{EngineShared, lock};
use super::types::{Request, SoundParams};

/// Samples decoded per step.
pub(super) const DECODE_CHUNK: usize = 8192;
const WAIT_TICK: Duration = Duration::from_millis(50);

enum TrackEnd {
    Finished,
    Stopped,
    /// Nothing was played before the error.
    Failed(DecoderError),
}

/// Average bitrate weighted by how much audio each chunk held.
#[derive(Debug, Default)]
struct BitrateMeter {
    weighted: f64,
    seconds: f64,
}

impl BitrateMeter {
    fn add(&mut self, kbps: i32, audio: Duration) {
        let secs = audio.as_secs_f64();
        self.weighted += kbps as f64 * secs;
        self.seconds += secs;
    }

    fn average(&self) -> i32 {
        if self.seconds > 0.0 {
            (self.weighted / self.seconds).round() as i32
        } else {
            0
        }
    }
}

pub(super) fn run(engine: Arc<EngineShared>, first: String) {
    let mut path = first;
    loop {
        // Advance under the request lock; a stop lands before or after it.
        let next = match play_track(&engine, &path) {
            TrackEnd::Stopped => return,
            TrackEnd::Finished => engine
                .requests
                .unless_stopped(|| lock(&engine.nav).next(false)),
            TrackEnd::Failed(err) => {
                log::warn!("cannot play {path}: {err}");
                engine.events.broadcast(&Event::SrvError(err.to_string()));
                engine.requests.unless_stopped(|| {
                    let mut nav = lock(&engine.nav);
                    nav.invalidate(&path);
                    nav.next(false)
                })
            }
        };
        let Some(next) = next else {
            return;
        };

        match next {
            Some(p) => path = p,
            None => {
                log::debug!("nothing left to play");
                engine.set_stopped();
                return;
            }
        }
    }
}

fn open(engine: &EngineShared, path: &str) -> Result<(Box<dyn Decoder>, Vec<f32>, SoundParams), DecoderError> {
    if let Some(pre) = engine.precache.take(path) {
        log::debug!("using precached start of {path}");
        let mut samples = pre.samples;
        lock(&engine.dsp).process(&mut samples, pre.params);
        return Ok((pre.decoder, samples, pre.params));
    }
    let decoder = engine.decoders.open(Path::new(path))?;
    Ok((decoder, Vec::new(), SoundParams::default()))
}

fn play_track(engine: &EngineShared, path: &str) -> TrackEnd {
    let (mut decoder, mut holding, mut params) = match open(engine, path) {
        Ok(opened) => opened,
        Err(e) => return TrackEnd::Failed(e),
    };

    let duration = decoder.duration();
    engine.track_started(path, duration, decoder.bitrate());
    engine.out.set_time(Duration::ZERO);

    let mut chunk = vec![0.0f32; DECODE_CHUNK];
    let mut produced = holding.len();
    let mut eof = false;
    let mut precache_started = false;
    let mut meter = BitrateMeter::default();
    let mut last_bitrate = decoder.bitrate();

    loop {
        // Decode one chunk into the holding buffer.
        if holding.is_empty() && !eof {
            let mut chunk_params = params;
            match decoder.decode(&mut chunk, &mut chunk_params) {
                Ok(0) => eof = true,
                Ok(n) => {
                    lock(&engine.dsp).process(&mut chunk[..n], chunk_params);
                    holding.extend_from_slice(&chunk[..n]);
                    params = chunk_params;
                    produced += n;

                    let bitrate = decoder.bitrate();
                    if let Some(kbps) = bitrate {
                        meter.add(kbps, params.duration_of(n));
                    }
                    if bitrate != last_bitrate {
                        last_bitrate = bitrate;
                        engine.bitrate_changed(bitrate.unwrap_or(0));
                    }
                    engine.avg_bitrate_changed(meter.average());
                }
                Err(e) if produced == 0 => return TrackEnd::Failed(e),
                Err(e) => {
                    log::warn!("{path}: {e}; ending the song early");
                    eof = true;
                }
            }
        }

        // Service a pending request.
        if let Some(req) = engine.requests.take() {
            match req {
                Request::Stop => {
                    engine.out.reset();
                    return TrackEnd::Stopped;
                }
                Request::Seek(to) => match decoder.seek(to) {
                    Ok(reached) => {
                        holding.clear();
                        eof = false;
                        engine.out.reset();
                        engine.out.set_time(reached);
                        engine.events.broadcast(&Event::Ctime(reached.as_secs() as i32));
                    }
                    Err(_) if duration.is_some_and(|d| to >= d) => {
                        engine.out.reset();
                        return TrackEnd::Finished;
                    }
                    Err(e) => {
                        log::warn!("{path}: {e}");
                        engine.events.broadcast(&Event::StatusMsg(e.to_string()));
                    }
                },
            }
            continue;
        }

        // Move decoded audio into the output buffer.
        if !holding.is_empty() {
            if !params.is_known() {
                log::warn!("{path}: decoder produced audio without a format");
                holding.clear();
                continue;
            }
            if engine.out.params() != params {
                if engine.out.is_drained() {
                    engine.out.set_params(params);
                    engine.params_changed(params);
                } else {
                    engine.requests.wait(|| engine.out.is_drained(), WAIT_TICK);
                }
                continue;
            }

            let taken = engine.out.put(&holding);
            holding.drain(..taken);
            if taken == 0 {
                engine.requests.wait(|| engine.out.free_space() > 0, WAIT_TICK);
            }
            continue;
        }

        if eof {
            if !precache_started {
                precache_started = true;
                engine.precache_next(path);
            }
            if engine.out.is_drained() {
                return TrackEnd::Finished;
            }
            engine.requests.wait(|| engine.out.is_drained(), WAIT_TICK);
        }
    }
}
