//! Optional MPRIS service on the session bus.
//!
//! Desktop media keys and tools like `playerctl` drive the server through
//! this bridge. Commands go straight to [`Core::control`]; properties are
//! read from the engine each time they are asked for.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_io::{Timer, block_on};
use zbus::{Connection, interface};
use zvariant::{ObjectPath, OwnedValue, Value};

use crate::audio::PlayState;
use crate::decoder::is_url;
use crate::error::ServerError;
use crate::server::{ControlCmd, Core, NowPlaying};

const OBJECT_PATH: &str = "/org/mpris/MediaPlayer2";
const BUS_NAME: &str = "org.mpris.MediaPlayer2.prestod";
const NO_TRACK: &str = "/org/mpris/MediaPlayer2/TrackList/NoTrack";

fn status_name(state: PlayState) -> &'static str {
    match state {
        PlayState::Stopped => "Stopped",
        PlayState::Playing => "Playing",
        PlayState::Paused => "Paused",
    }
}

fn track_url(file: &str) -> String {
    if is_url(file) {
        file.to_string()
    } else {
        format!("file://{file}")
    }
}

fn track_id(index: Option<usize>) -> ObjectPath<'static> {
    let path = match index {
        Some(i) => format!("{OBJECT_PATH}/track/{i}"),
        None => NO_TRACK.to_string(),
    };
    ObjectPath::try_from(path)
        .unwrap_or_else(|_| ObjectPath::from_static_str_unchecked(NO_TRACK))
}

fn insert(map: &mut HashMap<String, OwnedValue>, key: &str, value: Value<'_>) {
    match OwnedValue::try_from(value) {
        Ok(v) => {
            map.insert(key.to_string(), v);
        }
        Err(e) => log::debug!("mpris: cannot encode {key}: {e}"),
    }
}

/// The `Metadata` property for `now`. Empty when nothing plays.
fn track_metadata(now: Option<&NowPlaying>) -> HashMap<String, OwnedValue> {
    let mut map = HashMap::new();
    let Some(now) = now else {
        insert(&mut map, "mpris:trackid", Value::from(track_id(None)));
        return map;
    };

    insert(&mut map, "mpris:trackid", Value::from(track_id(now.index)));
    insert(&mut map, "xesam:title", Value::from(now.title.clone()));
    insert(&mut map, "xesam:url", Value::from(track_url(&now.file)));
    if let Some(artist) = &now.artist {
        insert(&mut map, "xesam:artist", Value::from(vec![artist.clone()]));
    }
    if let Some(album) = &now.album {
        insert(&mut map, "xesam:album", Value::from(album.clone()));
    }
    if let Some(length) = now.duration {
        let micros = i64::try_from(length.as_micros()).unwrap_or(i64::MAX);
        insert(&mut map, "mpris:length", Value::from(micros));
    }
    map
}

struct RootIface {
    core: Arc<Core>,
}

#[interface(name = "org.mpris.MediaPlayer2")]
impl RootIface {
    fn raise(&self) {
        // Nothing to raise: the server has no window.
    }

    fn quit(&self) {
        self.core.control(ControlCmd::Quit);
    }

    #[zbus(property)]
    fn can_quit(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_raise(&self) -> bool {
        false
    }

    #[zbus(property)]
    fn has_track_list(&self) -> bool {
        false
    }

    #[zbus(property)]
    fn identity(&self) -> &str {
        "prestod"
    }

    #[zbus(property)]
    fn supported_uri_schemes(&self) -> Vec<String> {
        vec!["file".to_string(), "http".to_string(), "https".to_string()]
    }

    #[zbus(property)]
    fn supported_mime_types(&self) -> Vec<String> {
        vec![]
    }
}

struct PlayerIface {
    core: Arc<Core>,
}

#[interface(name = "org.mpris.MediaPlayer2.Player")]
impl PlayerIface {
    fn next(&self) {
        self.core.control(ControlCmd::Next);
    }

    fn previous(&self) {
        self.core.control(ControlCmd::Prev);
    }

    fn play(&self) {
        self.core.control(ControlCmd::Play);
    }

    fn pause(&self) {
        self.core.control(ControlCmd::Pause);
    }

    fn play_pause(&self) {
        self.core.control(ControlCmd::PlayPause);
    }

    fn stop(&self) {
        self.core.control(ControlCmd::Stop);
    }

    /// Relative seek in microseconds.
    fn seek(&self, offset: i64) {
        let secs = offset / 1_000_000;
        self.core
            .engine
            .seek(secs.clamp(i32::MIN as i64, i32::MAX as i64) as i32);
    }

    #[zbus(property)]
    fn playback_status(&self) -> &str {
        status_name(self.core.engine.state())
    }

    #[zbus(property)]
    fn position(&self) -> i64 {
        let time = self.core.engine.status().time;
        i64::try_from(time.as_micros()).unwrap_or(i64::MAX)
    }

    #[zbus(property)]
    fn volume(&self) -> f64 {
        f64::from(self.core.engine.mixer().clamp(0, 100)) / 100.0
    }

    #[zbus(property)]
    fn can_control(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_play(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_pause(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_seek(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_go_next(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn can_go_previous(&self) -> bool {
        true
    }

    #[zbus(property)]
    fn metadata(&self) -> HashMap<String, OwnedValue> {
        track_metadata(self.core.now_playing().as_ref())
    }
}

async fn serve(core: Arc<Core>) -> zbus::Result<()> {
    let connection = Connection::session().await?;
    connection.request_name(BUS_NAME).await?;

    let object_server = connection.object_server();
    object_server
        .at(OBJECT_PATH, RootIface { core: Arc::clone(&core) })
        .await?;
    object_server.at(OBJECT_PATH, PlayerIface { core }).await?;
    log::info!("mpris: registered as {BUS_NAME}");

    // Keep the connection, and with it the service, alive.
    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}

/// Publish the service from a background thread.
///
/// A missing session bus is not fatal: the thread logs and exits.
pub fn spawn_mpris(core: Arc<Core>) -> Result<JoinHandle<()>, ServerError> {
    thread::Builder::new()
        .name("mpris".into())
        .spawn(move || {
            if let Err(e) = block_on(serve(core)) {
                log::warn!("mpris: service unavailable: {e}");
            }
        })
        .map_err(|source| ServerError::Spawn {
            what: "mpris",
            source,
        })
}
