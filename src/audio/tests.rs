use super::engine::RequestSlot;
use super::types::Request;
use super::*;

use crate::config::EqualizerPreset;
use crate::decoder::{Decoder, DecoderError, DecoderPlugin, DecoderRegistry};
use crate::playlist::{Navigator, Options};
use crate::protocol::{Event, EventSink};
use crate::tags::{FileTags, TagCache};

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::{TempDir, tempdir};

// --- stubs -----------------------------------------------------------------

/// Silence of a given length. Files hold `rate channels millis`, or `fail`.
struct ToneDecoder {
    params: SoundParams,
    pos: usize,
    frames: usize,
}

impl Decoder for ToneDecoder {
    fn decode(&mut self, buf: &mut [f32], params: &mut SoundParams) -> Result<usize, DecoderError> {
        let ch = self.params.channels as usize;
        let frames = (buf.len() / ch).min(self.frames - self.pos);
        buf[..frames * ch].fill(0.25);
        self.pos += frames;
        *params = self.params;
        Ok(frames * ch)
    }

    fn seek(&mut self, to: Duration) -> Result<Duration, DecoderError> {
        let frame = (to.as_secs_f64() * self.params.rate as f64) as usize;
        if frame >= self.frames {
            return Err(DecoderError::Seek {
                to,
                reason: "past the end".into(),
            });
        }
        self.pos = frame;
        Ok(to)
    }

    fn duration(&self) -> Option<Duration> {
        Some(Duration::from_secs_f64(
            self.frames as f64 / self.params.rate as f64,
        ))
    }

    fn bitrate(&self) -> Option<i32> {
        Some(128)
    }
}

#[derive(Default)]
struct TonePlugin {
    opens: AtomicUsize,
}

impl DecoderPlugin for Arc<TonePlugin> {
    fn name(&self) -> &'static str {
        "tone"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == "tone")
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Decoder>, DecoderError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let open_err = |reason: &str| DecoderError::Open {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };
        let spec = fs::read_to_string(path).map_err(|e| open_err(&e.to_string()))?;
        let nums: Vec<u32> = spec
            .split_whitespace()
            .map(|n| n.parse().map_err(|_| open_err("not a tone")))
            .collect::<Result<_, _>>()?;
        let [rate, channels, millis] = nums[..] else {
            return Err(open_err("not a tone"));
        };
        Ok(Box::new(ToneDecoder {
            params: SoundParams {
                channels: channels as u16,
                rate,
            },
            pos: 0,
            frames: (rate as u64 * millis as u64 / 1000) as usize,
        }))
    }

    fn read_tags(&self, _path: &Path) -> Result<FileTags, DecoderError> {
        Ok(FileTags::default())
    }
}

fn null_factory() -> SinkFactory {
    Box::new(|| -> Result<Box<dyn AudioSink>, crate::ServerError> { Ok(Box::new(NullSink::new())) })
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl EventSink for Recorder {
    fn broadcast(&self, event: &Event) {
        if !matches!(event, Event::Ctime(_)) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    fn send_to(&self, _client: usize, event: &Event) {
        self.broadcast(event);
    }
}

impl Recorder {
    fn snapshot(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn wait_for(&self, what: &Event) -> bool {
        wait_until(|| self.snapshot().contains(what))
    }
}

fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

struct Rig {
    _dir: TempDir,
    songs: Vec<String>,
    plugin: Arc<TonePlugin>,
    nav: Arc<Mutex<Navigator>>,
    events: Arc<Recorder>,
    engine: Engine,
}

/// An engine on the null sink playing `songs` (file contents) in order.
fn rig(songs: &[&str], precache: bool) -> Rig {
    let dir = tempdir().unwrap();
    let paths: Vec<String> = songs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            let path = dir.path().join(format!("{i}.tone"));
            fs::write(&path, spec).unwrap();
            path.to_string_lossy().into_owned()
        })
        .collect();

    let plugin = Arc::new(TonePlugin::default());
    let mut reg = DecoderRegistry::new();
    reg.register(plugin.clone());
    let decoders = Arc::new(reg);

    let events = Arc::new(Recorder::default());
    let tags = Arc::new(TagCache::start(None, decoders.clone(), events.clone()).unwrap());
    let nav = Arc::new(Mutex::new(Navigator::with_seed(Options::default(), 7)));

    let opts = EngineOptions {
        output_buffer_ms: 100,
        precache,
        dsp: Dsp {
            equalizer: Equalizer::new(false, vec![EqualizerPreset::new("flat", 0.0)]),
            softmixer: SoftMixer::new(false, 100),
        },
    };
    let engine = Engine::start(
        opts,
        null_factory(),
        nav.clone(),
        decoders,
        tags,
        events.clone(),
    )
    .unwrap();

    Rig {
        _dir: dir,
        songs: paths,
        plugin,
        nav,
        events,
        engine,
    }
}

impl Rig {
    fn play_all(&self) {
        let first = self.nav.lock().unwrap().play_list(self.songs.clone(), Some(0));
        self.engine.play(first);
    }

    fn song(&self, i: usize) -> Event {
        Event::Song(Some(self.songs[i].clone()))
    }
}

// --- dsp -------------------------------------------------------------------

#[test]
fn softmixer_scales_samples() {
    let mut buf = [1.0f32, -0.5];
    SoftMixer::new(true, 50).process(&mut buf, SoundParams::default());
    assert_eq!(buf, [0.5, -0.25]);
}

#[test]
fn dsp_skips_inactive_stages() {
    let dsp = Dsp {
        equalizer: Equalizer::new(false, vec![EqualizerPreset::new("loud", 6.0)]),
        softmixer: SoftMixer::new(false, 10),
    };
    let mut buf = [0.5f32; 4];
    dsp.process(&mut buf, SoundParams::default());
    assert_eq!(buf, [0.5; 4]);
}

#[test]
fn equalizer_cycles_presets_and_clamps() {
    let mut eq = Equalizer::new(
        true,
        vec![
            EqualizerPreset::new("flat", 0.0),
            EqualizerPreset::new("loud", 20.0),
        ],
    );
    assert_eq!(eq.describe(), "Equalizer: flat (+0.0 dB)");
    eq.next_preset();
    assert_eq!(eq.describe(), "Equalizer: loud (+20.0 dB)");
    let mut buf = [0.5f32, -0.5];
    eq.process(&mut buf, SoundParams::default());
    assert_eq!(buf, [1.0, -1.0]);
    eq.prev_preset();
    eq.prev_preset();
    assert_eq!(eq.preset().map(|p| p.name.as_str()), Some("loud"));
    eq.active = false;
    assert_eq!(eq.describe(), "Equalizer off");
}

// --- sinks -----------------------------------------------------------------

#[test]
fn null_sink_paces_known_formats() {
    let mut sink = NullSink::new();
    assert_eq!(sink.play(&[0.0; 10_000]), 10_000);

    sink.open(SoundParams { channels: 2, rate: 1000 }).unwrap();
    // 100 ms of lead at 2 x 1000 samples per second.
    let taken = sink.play(&[0.0; 10_000]);
    assert_eq!(taken, 200);
    assert!(sink.buffered() > 150);

    sink.pause();
    assert_eq!(sink.play(&[0.0; 10]), 0);
    sink.unpause();
    sink.reset();
    assert_eq!(sink.buffered(), 0);
}

#[test]
fn null_sink_has_two_mixer_channels() {
    let mut sink = NullSink::new();
    assert_eq!(sink.mixer_channel_name(), "Master");
    sink.set_mixer(40);
    sink.toggle_mixer_channel();
    assert_eq!(sink.mixer_channel_name(), "PCM");
    assert_eq!(sink.read_mixer(), 100);
    sink.set_mixer(150);
    assert_eq!(sink.read_mixer(), 100);
    sink.toggle_mixer_channel();
    assert_eq!(sink.read_mixer(), 40);
}

#[test]
fn unknown_backends_are_skipped() {
    let sink = open_first(&["nonsense".to_string(), "null".to_string()]).unwrap();
    assert_eq!(sink.name(), "null");
    assert!(open_first(&["nonsense".to_string()]).is_err());
}

// --- output buffer ---------------------------------------------------------

fn null_output(capacity_ms: u32) -> OutputBuffer {
    OutputBuffer::start(
        null_factory(),
        capacity_ms,
        Arc::new(|| {}),
        Box::new(|_: Duration| {}),
    )
    .unwrap()
}

#[test]
fn output_buffer_is_bounded() {
    let out = null_output(100);
    out.pause();
    out.set_params(SoundParams { channels: 1, rate: 1000 });
    assert_eq!(out.put(&[0.0; 500]), 100);
    assert_eq!(out.free_space(), 0);
    assert_eq!(out.put(&[0.0; 5]), 0);

    out.reset();
    assert_eq!(out.free_space(), 100);
    assert!(out.is_drained());
}

#[test]
fn output_buffer_plays_out_and_keeps_time() {
    let out = null_output(200);
    out.set_params(SoundParams { channels: 1, rate: 1000 });
    out.set_time(Duration::from_secs(30));
    let mut left = 300;
    while left > 0 {
        left -= out.put(&vec![0.0; left]);
        thread::sleep(Duration::from_millis(5));
    }
    assert!(wait_until(|| out.is_drained()));
    let t = out.time();
    assert!(t >= Duration::from_millis(30_250), "time {t:?}");
}

#[test]
fn output_buffer_forwards_mixer_changes() {
    let out = null_output(100);
    assert_eq!(out.mixer_channel_name(), "Master");
    out.set_mixer(30);
    assert_eq!(out.read_mixer(), 30);
    out.toggle_mixer_channel();
    assert_eq!(out.mixer_channel_name(), "PCM");
    assert_eq!(out.read_mixer(), 100);
}

#[test]
fn failing_backend_fails_start() {
    let res = OutputBuffer::start(
        Box::new(|| -> Result<Box<dyn AudioSink>, crate::ServerError> {
            Err(crate::ServerError::NoAudioBackend("none".into()))
        }),
        100,
        Arc::new(|| {}),
        Box::new(|_: Duration| {}),
    );
    assert!(res.is_err());
}

// --- requests --------------------------------------------------------------

#[test]
fn stop_is_never_replaced_by_seek() {
    let slot = RequestSlot::default();
    slot.post(Request::Seek(Duration::from_secs(1)));
    slot.post(Request::Seek(Duration::from_secs(2)));
    assert_eq!(slot.take(), Some(Request::Seek(Duration::from_secs(2))));

    slot.post(Request::Stop);
    slot.post(Request::Seek(Duration::from_secs(3)));
    assert_eq!(slot.unless_stopped(|| ()), None);
    assert_eq!(slot.take(), Some(Request::Stop));
    assert_eq!(slot.take(), None);
    assert_eq!(slot.unless_stopped(|| 7), Some(7));
}

#[test]
fn stop_cannot_land_inside_an_advance() {
    let slot = Arc::new(RequestSlot::default());
    let advanced = Arc::new(AtomicUsize::new(0));
    let (entered_tx, entered_rx) = std::sync::mpsc::channel();

    let worker = {
        let slot = Arc::clone(&slot);
        let advanced = Arc::clone(&advanced);
        thread::spawn(move || {
            slot.unless_stopped(|| {
                entered_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
                advanced.store(1, Ordering::SeqCst);
            })
        })
    };
    entered_rx.recv().unwrap();

    // Waits for the advance to finish before it is recorded.
    slot.post(Request::Stop);
    assert_eq!(advanced.load(Ordering::SeqCst), 1);
    assert_eq!(worker.join().unwrap(), Some(()));
    assert_eq!(slot.unless_stopped(|| ()), None);
}

#[test]
fn request_wait_returns_when_ready() {
    let slot = RequestSlot::default();
    let start = Instant::now();
    slot.wait(|| true, Duration::from_secs(5));
    slot.post(Request::Stop);
    slot.wait(|| false, Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(1));
}

// --- engine ----------------------------------------------------------------

#[test]
fn plays_the_list_to_the_end_then_stops() {
    let r = rig(&["1000 1 150", "1000 2 150"], true);
    r.play_all();

    assert!(r.events.wait_for(&r.song(1)));
    assert!(r.events.wait_for(&Event::Song(None)));
    assert_eq!(r.engine.state(), PlayState::Stopped);

    let events = r.events.snapshot();
    let first = events.iter().position(|e| *e == r.song(0)).unwrap();
    let second = events.iter().position(|e| *e == r.song(1)).unwrap();
    assert!(first < second);
    assert!(events.contains(&Event::State(PlayState::Playing)));
    assert!(events.contains(&Event::Channels(2)));
    assert_eq!(events.last(), Some(&Event::Song(None)));
    assert_eq!(r.nav.lock().unwrap().current(), None);
}

#[test]
fn precached_song_is_adopted() {
    let r = rig(&["1000 1 150", "1000 1 150"], true);
    r.play_all();
    assert!(r.events.wait_for(&Event::Song(None)));
    // One open per song: the second comes from the precache.
    assert_eq!(r.plugin.opens.load(Ordering::SeqCst), 2);
}

#[test]
fn unplayable_songs_are_invalidated_and_skipped() {
    let r = rig(&["fail", "1000 1 100"], false);
    r.play_all();

    assert!(r.events.wait_for(&r.song(1)));
    assert!(
        r.events
            .snapshot()
            .iter()
            .any(|e| matches!(e, Event::SrvError(_)))
    );
    let nav = r.nav.lock().unwrap();
    assert!(!nav.playlist().is_valid(0));
    assert!(nav.playlist().is_valid(1));
}

#[test]
fn pause_unpause_and_stop() {
    let r = rig(&["1000 1 5000"], false);
    r.play_all();
    assert!(r.events.wait_for(&Event::State(PlayState::Playing)));

    r.engine.pause();
    assert_eq!(r.engine.state(), PlayState::Paused);
    let at = r.engine.ctime();
    thread::sleep(Duration::from_millis(100));
    assert_eq!(r.engine.ctime(), at);

    r.engine.unpause();
    assert_eq!(r.engine.state(), PlayState::Playing);

    r.engine.stop();
    assert_eq!(r.engine.state(), PlayState::Stopped);
    assert_eq!(r.engine.current_file(), None);
    assert_eq!(r.events.snapshot().last(), Some(&Event::Song(None)));
}

#[test]
fn seeking_past_the_end_finishes_the_song() {
    let r = rig(&["1000 1 5000"], false);
    let start = Instant::now();
    r.play_all();
    assert!(r.events.wait_for(&Event::State(PlayState::Playing)));

    r.engine.jump_to(60);
    assert!(r.events.wait_for(&Event::Song(None)));
    assert!(start.elapsed() < Duration::from_secs(4));
}

#[test]
fn next_and_prev_move_through_the_list() {
    let r = rig(&["1000 1 5000", "1000 1 5000"], false);
    r.play_all();
    assert!(r.events.wait_for(&r.song(0)));

    r.engine.next();
    assert!(r.events.wait_for(&r.song(1)));
    assert_eq!(r.engine.current_file().as_deref(), Some(r.songs[1].as_str()));

    r.engine.prev();
    assert!(wait_until(|| r.engine.current_file().as_deref() == Some(r.songs[0].as_str())));
    r.engine.shutdown();
    assert_eq!(r.engine.state(), PlayState::Stopped);
}

#[test]
fn softmixer_takes_over_volume() {
    let r = rig(&[], false);
    r.engine.set_mixer(70);
    assert_eq!(r.engine.mixer(), 70);
    assert_eq!(r.engine.mixer_channel_name(), "Master");

    assert!(r.engine.toggle_softmixer());
    assert_eq!(r.engine.mixer_channel_name(), "Soft");
    assert_eq!(r.engine.mixer(), 100);
    r.engine.set_mixer(20);
    assert_eq!(r.engine.mixer(), 20);

    assert!(!r.engine.toggle_softmixer());
    assert_eq!(r.engine.mixer(), 70);
}

#[test]
fn equalizer_commands_describe_the_preset() {
    let r = rig(&[], false);
    assert_eq!(r.engine.toggle_equalizer(), "Equalizer: flat (+0.0 dB)");
    assert_eq!(r.engine.equalizer_next(), "Equalizer: flat (+0.0 dB)");
    assert_eq!(r.engine.toggle_equalizer(), "Equalizer off");
}
