//! Command handlers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::audio::{Engine, PlayState};
use crate::config::LibrarySettings;
use crate::decoder::is_url;
use crate::library;
use crate::playlist::{ListKind, Navigator, SongRef};
use crate::protocol::{Command, Event, EventSink, Reply};
use crate::tags::TagCache;

use super::registry::ClientRegistry;

/// What the loop should do with the client after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Disconnect,
    Quit,
}

/// Transport controls from outside the socket (the MPRIS bridge).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCmd {
    Quit,
    Play,
    Pause,
    PlayPause,
    Stop,
    Next,
    Prev,
}

/// The current song as the MPRIS bridge describes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NowPlaying {
    pub file: String,
    /// Tag title, else the file name.
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
    /// Position in the list it plays from.
    pub index: Option<usize>,
}

/// Everything a handler can touch.
pub struct Core {
    pub registry: Arc<ClientRegistry>,
    pub nav: Arc<Mutex<Navigator>>,
    pub engine: Engine,
    pub tags: Arc<TagCache>,
    pub library: LibrarySettings,
    quit: AtomicBool,
}

fn to_index(i: i32) -> Option<usize> {
    usize::try_from(i).ok()
}

impl Core {
    pub fn new(
        registry: Arc<ClientRegistry>,
        nav: Arc<Mutex<Navigator>>,
        engine: Engine,
        tags: Arc<TagCache>,
        library: LibrarySettings,
    ) -> Self {
        Self {
            registry,
            nav,
            engine,
            tags,
            library,
            quit: AtomicBool::new(false),
        }
    }

    fn nav(&self) -> MutexGuard<'_, Navigator> {
        self.nav.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reply(&self, client: usize, event: Event) {
        self.registry.send_to(client, &event);
    }

    fn data(&self, client: usize, reply: Reply) {
        self.reply(client, Event::Data(reply));
    }

    fn broadcast(&self, event: Event) {
        self.registry.broadcast(&event);
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub fn dispatch(&self, client: usize, cmd: Command) -> Flow {
        log::debug!("client {client}: {:#05x}", cmd.opcode());
        match cmd {
            Command::Ping => self.reply(client, Event::Pong),
            Command::Disconnect => return Flow::Disconnect,
            Command::Quit => return Flow::Quit,

            Command::PlayPath(path) => self.play_path(&path),
            Command::PlayIndex(index) => self.play_index(index),
            Command::PlayList { items, index } => {
                let first = self.nav().play_list(items, to_index(index));
                self.engine.play(first);
            }
            Command::Stop => self.engine.stop(),
            Command::Pause => self.engine.pause(),
            Command::Unpause => self.engine.unpause(),
            Command::Next => self.engine.next(),
            Command::Prev => self.engine.prev(),
            Command::Seek(delta) => self.engine.seek(delta),
            Command::JumpTo(secs) => self.engine.jump_to(secs),
            Command::JumpToPercent(pct) => self.engine.jump_to_percent(pct),

            Command::GetState => self.data(client, Reply::Int(self.engine.state().to_wire())),
            Command::GetCtime => self.data(client, Reply::Int(self.engine.ctime())),
            Command::GetCurrent => {
                let file = self.engine.current_file().unwrap_or_default();
                self.data(client, Reply::Str(file));
            }
            Command::GetBitrate => self.data(client, Reply::Int(self.engine.bitrate())),
            Command::GetAvgBitrate => self.data(client, Reply::Int(self.engine.avg_bitrate())),
            Command::GetRate => self.data(client, Reply::Int(self.engine.rate())),
            Command::GetChannels => self.data(client, Reply::Int(self.engine.channels())),
            Command::GetStatus => self.data(client, Reply::Map(self.status_map())),

            Command::PlistAdd { items, index } => {
                let added = self.nav().add(&items, to_index(index));
                if let Some((items, at)) = added {
                    self.broadcast(Event::PlistAdd {
                        items,
                        index: at as i32,
                    });
                }
            }
            Command::PlistDel(index) => {
                let removed = to_index(index).and_then(|i| self.nav().del(i));
                if removed.is_some() {
                    self.broadcast(Event::PlistDel(index));
                }
            }
            Command::PlistMove { from, to } => {
                let moved = match (to_index(from), to_index(to)) {
                    (Some(f), Some(t)) => self.nav().move_entry(f, t),
                    _ => false,
                };
                if moved {
                    self.broadcast(Event::PlistMove { from, to });
                }
            }
            Command::PlistClear => {
                self.nav().clear();
                self.broadcast(Event::PlistClear);
            }
            Command::PlistGet => {
                let paths = self.nav().playlist().paths();
                self.data(client, Reply::StrSet(paths));
            }

            Command::GetFileTags(path) => self.tags.add_request(&path, client, None),
            Command::SetFileTags { path, edit } => {
                self.tags.add_request(&path, client, Some(edit));
            }
            Command::SetRating { path, rating } => match self.tags.set_rating(&path, rating) {
                Ok(()) => self.broadcast(Event::FileRating { path, rating }),
                Err(e) => {
                    log::warn!("cannot rate {path}: {e}");
                    self.reply(client, Event::StatusMsg(format!("Cannot save rating: {e}")));
                }
            },
            Command::AbortTagsRequests => self.tags.clear_queue(client),

            Command::GetMixer => self.data(client, Reply::Int(self.engine.mixer())),
            Command::SetMixer(level) => {
                let level = self.engine.set_mixer(level);
                self.broadcast(Event::MixerChange(level));
            }
            Command::ToggleMixerChannel => {
                let level = self.engine.toggle_mixer_channel();
                self.broadcast(Event::MixerChange(level));
            }
            Command::ToggleSoftmixer => {
                self.engine.toggle_softmixer();
                self.broadcast(Event::MixerChange(self.engine.mixer()));
            }
            Command::GetMixerChannelName => {
                self.data(client, Reply::Str(self.engine.mixer_channel_name()));
            }
            Command::ToggleEqualizer => self.broadcast(Event::StatusMsg(self.engine.toggle_equalizer())),
            Command::EqualizerNext => self.broadcast(Event::StatusMsg(self.engine.equalizer_next())),
            Command::EqualizerPrev => self.broadcast(Event::StatusMsg(self.engine.equalizer_prev())),

            Command::GetOptions => {
                let options = self.nav().options();
                self.reply(client, Event::Options(options));
            }
            Command::ToggleShuffle => {
                let options = self.nav().toggle_shuffle();
                self.broadcast(Event::Options(options));
            }
            Command::ToggleRepeat => {
                let options = self.nav().toggle_repeat();
                self.broadcast(Event::Options(options));
            }
            Command::ToggleAutonext => {
                let options = self.nav().toggle_autonext();
                self.broadcast(Event::Options(options));
            }
        }
        Flow::Continue
    }

    fn play_path(&self, path: &str) {
        let listing = if is_url(path) {
            vec![path.to_string()]
        } else {
            library::listing_for(path, &self.library)
        };
        let first = self.nav().play_path(path, listing);
        if first.is_none() {
            log::warn!("cannot play {path}");
        }
        self.engine.play(first);
    }

    /// A negative index starts from the top of the playlist.
    fn play_index(&self, index: i32) {
        let first = {
            let mut nav = self.nav();
            let index = to_index(index).or_else(|| nav.playlist().first_valid());
            index.and_then(|index| {
                nav.play_song(SongRef {
                    list: ListKind::Playlist,
                    index,
                })
            })
        };
        self.engine.play(first);
    }

    pub fn status_map(&self) -> BTreeMap<String, String> {
        let status = self.engine.status();
        let mut map = BTreeMap::new();
        map.insert("state".to_string(), status.state.as_str().to_string());
        map.insert("time".to_string(), status.time.as_secs().to_string());
        map.insert("bitrate".to_string(), status.bitrate.to_string());
        if let Some(duration) = status.duration {
            map.insert("duration".to_string(), duration.as_secs().to_string());
        }
        if let Some(file) = status.file {
            let tags = self.tags.get_immediate(&file);
            let fields = [
                ("title", tags.title),
                ("artist", tags.artist),
                ("album", tags.album),
            ];
            for (key, value) in fields {
                if let Some(value) = value {
                    map.insert(key.to_string(), value);
                }
            }
            map.insert("file".to_string(), file);
        }
        map
    }

    /// Apply a transport control from outside the socket.
    pub fn control(&self, cmd: ControlCmd) {
        log::debug!("control: {cmd:?}");
        match cmd {
            ControlCmd::Quit => {
                self.quit.store(true, Ordering::SeqCst);
                self.registry.wake();
            }
            ControlCmd::Play => self.resume_or_start(),
            ControlCmd::Pause => self.engine.pause(),
            ControlCmd::PlayPause => match self.engine.state() {
                PlayState::Playing => self.engine.pause(),
                _ => self.resume_or_start(),
            },
            ControlCmd::Stop => self.engine.stop(),
            ControlCmd::Next => self.engine.next(),
            ControlCmd::Prev => self.engine.prev(),
        }
    }

    fn resume_or_start(&self) {
        match self.engine.state() {
            PlayState::Paused => self.engine.unpause(),
            PlayState::Playing => {}
            PlayState::Stopped => {
                let current = self.nav().current();
                match current {
                    Some(path) => self.engine.play(Some(path)),
                    None => self.play_index(-1),
                }
            }
        }
    }

    /// What is playing, for outside observers.
    pub fn now_playing(&self) -> Option<NowPlaying> {
        let status = self.engine.status();
        let file = status.file?;
        let tags = self.tags.get_immediate(&file);
        let title = tags
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .or_else(|| {
                Path::new(&file)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| file.clone());
        let index = self.nav().current_ref().map(|r| r.index);
        Some(NowPlaying {
            title,
            artist: tags.artist.clone(),
            album: tags.album.clone(),
            duration: status.duration.or_else(|| tags.duration()),
            index,
            file,
        })
    }
}
