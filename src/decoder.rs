//! Media decoding seam.
//!
//! A [`DecoderPlugin`] knows a family of file formats; it opens per-file
//! [`Decoder`]s and reads or writes their tags. The registry tries plugins
//! in priority order, so tests can slot stub decoders in front of the
//! real one.

mod registry;
mod rodio_plugin;

use std::path::Path;
use std::time::Duration;

use thiserror::Error;

use crate::audio::SoundParams;
use crate::tags::{FileTags, TagEdit};

pub use registry::DecoderRegistry;
pub use rodio_plugin::RodioPlugin;

/// Recoverable media failures. The file is skipped, the server carries on.
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("cannot open {path}: {reason}")]
    Open { path: String, reason: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("cannot seek to {:.1}s: {reason}", to.as_secs_f64())]
    Seek { to: Duration, reason: String },

    #[error("no decoder for {0}")]
    Unsupported(String),

    #[error("tag error on {path}: {reason}")]
    Tags { path: String, reason: String },
}

/// An open media stream producing interleaved `f32` samples.
pub trait Decoder: Send {
    /// Fill `buf` with up to `buf.len()` samples and report their format in
    /// `params`. A chunk never spans a format change. `Ok(0)` is end of
    /// stream.
    fn decode(&mut self, buf: &mut [f32], params: &mut SoundParams) -> Result<usize, DecoderError>;

    /// Seek to `to`; returns the position actually reached.
    fn seek(&mut self, to: Duration) -> Result<Duration, DecoderError>;

    fn duration(&self) -> Option<Duration>;

    /// Current bitrate in kbps.
    fn bitrate(&self) -> Option<i32>;
}

pub trait DecoderPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn handles(&self, path: &Path) -> bool;

    fn open(&self, path: &Path) -> Result<Box<dyn Decoder>, DecoderError>;

    fn read_tags(&self, path: &Path) -> Result<FileTags, DecoderError>;

    fn write_tags(&self, path: &Path, _edit: &TagEdit) -> Result<(), DecoderError> {
        Err(DecoderError::Unsupported(path.display().to_string()))
    }
}

/// True for `scheme://...` locations.
pub fn is_url(location: &str) -> bool {
    location
        .split_once("://")
        .is_some_and(|(scheme, _)| !scheme.is_empty() && scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+'))
}
