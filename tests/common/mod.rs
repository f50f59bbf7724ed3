#![allow(dead_code)]
//! Harness for end-to-end tests: a real server on a temporary socket, a
//! null audio sink and a stub decoder that plays silence.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Duration;

use prestod::ServerError;
use prestod::audio::{AudioSink, NullSink, SinkFactory, SoundParams};
use prestod::client::Connection;
use prestod::config::Settings;
use prestod::decoder::{Decoder, DecoderError, DecoderPlugin, DecoderRegistry};
use prestod::protocol::{Command, Event};
use prestod::server::Server;
use prestod::tags::FileTags;
use tempfile::TempDir;

/// Silence of a fixed length. File contents: `rate channels millis`.
pub struct SilencePlugin;

struct Silence {
    params: SoundParams,
    left: usize,
    total: usize,
}

impl Decoder for Silence {
    fn decode(&mut self, buf: &mut [f32], params: &mut SoundParams) -> Result<usize, DecoderError> {
        *params = self.params;
        let n = buf.len().min(self.left);
        buf[..n].fill(0.0);
        self.left -= n;
        Ok(n)
    }

    fn seek(&mut self, to: Duration) -> Result<Duration, DecoderError> {
        let at = self.params.samples_for_ms(to.as_millis() as u32).min(self.total);
        self.left = self.total - at;
        Ok(to)
    }

    fn duration(&self) -> Option<Duration> {
        Some(self.params.duration_of(self.total))
    }

    fn bitrate(&self) -> Option<i32> {
        Some(1411)
    }
}

impl DecoderPlugin for SilencePlugin {
    fn name(&self) -> &'static str {
        "silence"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().is_some_and(|e| e == "silence")
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Decoder>, DecoderError> {
        let bad = || DecoderError::Open {
            path: path.display().to_string(),
            reason: "not a silence file".to_string(),
        };
        let spec = fs::read_to_string(path).map_err(|_| bad())?;
        let nums: Vec<u32> = spec
            .split_whitespace()
            .filter_map(|n| n.parse().ok())
            .collect();
        let [rate, channels, millis] = nums[..] else {
            return Err(bad());
        };
        let params = SoundParams {
            channels: channels as u16,
            rate,
        };
        let total = params.samples_for_ms(millis);
        Ok(Box::new(Silence {
            params,
            left: total,
            total,
        }))
    }

    fn read_tags(&self, path: &Path) -> Result<FileTags, DecoderError> {
        Ok(FileTags {
            title: path.file_stem().map(|s| s.to_string_lossy().into_owned()),
            ..FileTags::default()
        })
    }
}

pub struct TestServer {
    pub dir: TempDir,
    pub socket: PathBuf,
    handle: Option<JoinHandle<Result<(), ServerError>>>,
}

impl TestServer {
    pub fn start() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.server.socket_path = dir.path().join("prestod.sock");
        settings.server.mpris = false;
        settings.cache.dir = dir.path().join("cache");
        settings.audio.output_buffer_ms = 100;
        settings.library.extensions.push("silence".to_string());

        let mut decoders = DecoderRegistry::new();
        decoders.register(SilencePlugin);
        let sink: SinkFactory = Box::new(|| -> Result<Box<dyn AudioSink>, ServerError> {
            Ok(Box::new(NullSink::new()))
        });

        let mut server = Server::start(&settings, decoders, sink).unwrap();
        let socket = server.socket_path().to_path_buf();
        let handle = std::thread::spawn(move || server.run());
        Self {
            dir,
            socket,
            handle: Some(handle),
        }
    }

    pub fn connect(&self) -> Connection {
        let mut conn = Connection::connect(&self.socket).unwrap();
        conn.ping().unwrap();
        conn
    }

    /// Write a silent song of `millis` and return its path.
    pub fn song(&self, name: &str, millis: u32) -> String {
        let path = self.dir.path().join(format!("{name}.silence"));
        fs::write(&path, format!("8000 2 {millis}")).unwrap();
        path.to_string_lossy().into_owned()
    }

    /// Ask the server to quit and wait for it.
    pub fn quit(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // Slots freed by dropped clients come back asynchronously.
        for _ in 0..200 {
            if handle.is_finished() {
                break;
            }
            match Connection::connect(&self.socket) {
                Ok(mut conn) => {
                    if conn.ping().is_ok() {
                        let _ = conn.send(&Command::Quit);
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => break,
            }
        }
        handle.join().unwrap().unwrap();
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            self.stop();
        }
    }
}

/// Read events until `pred` matches one; returns everything seen.
pub fn events_until(conn: &mut Connection, pred: impl Fn(&Event) -> bool) -> Vec<Event> {
    let mut seen = Vec::new();
    loop {
        let ev = conn.next_event().unwrap();
        let done = pred(&ev);
        seen.push(ev);
        if done {
            return seen;
        }
    }
}
