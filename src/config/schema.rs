use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level server settings loaded from `config.toml`.
///
/// File format: TOML
/// Default path (Linux/XDG): `$XDG_CONFIG_HOME/prestod/config.toml` or `~/.config/prestod/config.toml`
///
/// Precedence (highest wins):
/// 1) Environment variables (prefix `PRESTOD__`, `__` as nested separator)
/// 2) Config file (if present)
/// 3) Struct defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub audio: AudioSettings,
    pub playback: PlaybackSettings,
    pub library: LibrarySettings,
    pub cache: CacheSettings,
    pub equalizer: EqualizerSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Where the control socket lives.
    pub socket_path: PathBuf,
    /// Publish an MPRIS service on the session bus.
    pub mpris: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            mpris: true,
        }
    }
}

fn default_socket_path() -> PathBuf {
    if let Some(dir) = dirs::runtime_dir() {
        return dir.join("prestod.sock");
    }
    match dirs::home_dir() {
        Some(home) => home.join(".prestod").join("socket"),
        None => std::env::temp_dir().join("prestod.sock"),
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Output backends to try, in order. Known: "rodio", "null".
    pub backends: Vec<String>,
    /// Decoded audio held between the player and the device (milliseconds).
    pub output_buffer_ms: u32,
    /// Whether the software mixer starts enabled.
    pub softmixer: bool,
    /// Initial software mixer level, 0-100.
    pub softmixer_level: i32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            backends: vec!["rodio".into(), "null".into()],
            output_buffer_ms: 500,
            softmixer: false,
            softmixer_level: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PlaybackSettings {
    pub shuffle: bool,
    pub repeat: bool,
    /// Advance to the next song when one ends.
    pub autonext: bool,
    /// Decode the start of the next song while the current one drains.
    pub precache: bool,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            shuffle: false,
            repeat: false,
            autonext: true,
            precache: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LibrarySettings {
    /// File extensions to treat as audio (case-insensitive, without dot).
    pub extensions: Vec<String>,
    /// Whether to include hidden files (dotfiles) in folder listings.
    pub include_hidden: bool,
    /// Whether symlinked files count as songs.
    pub follow_links: bool,
}

impl Default for LibrarySettings {
    fn default() -> Self {
        Self {
            extensions: vec!["mp3".into(), "flac".into(), "wav".into(), "ogg".into()],
            include_hidden: false,
            follow_links: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Directory holding the tag database.
    pub dir: PathBuf,
    /// Keep tags on disk between runs.
    pub enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("prestod")
            .join("tags");
        Self { dir, enabled: true }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EqualizerPreset {
    pub name: String,
    /// Gain applied before anything else, in dB.
    pub preamp_db: f32,
}

impl EqualizerPreset {
    pub fn new(name: &str, preamp_db: f32) -> Self {
        Self {
            name: name.to_string(),
            preamp_db,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EqualizerSettings {
    /// Whether the equalizer starts enabled.
    pub enabled: bool,
    pub presets: Vec<EqualizerPreset>,
}

impl Default for EqualizerSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            presets: vec![
                EqualizerPreset::new("flat", 0.0),
                EqualizerPreset::new("loud", 4.0),
                EqualizerPreset::new("night", -8.0),
            ],
        }
    }
}
