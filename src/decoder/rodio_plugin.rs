use std::borrow::Cow;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::tag::Tag;
use rodio::Source;

use crate::audio::SoundParams;
use crate::tags::{FileTags, TagEdit};

use super::{Decoder, DecoderError, DecoderPlugin};

/// Files rodio can decode (symphonia/hound underneath), tagged with lofty.
#[derive(Debug, Clone)]
pub struct RodioPlugin {
    extensions: Vec<String>,
}

impl RodioPlugin {
    pub fn new(extensions: &[String]) -> Self {
        Self {
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
        }
    }
}

fn open_err(path: &Path, err: impl std::fmt::Display) -> DecoderError {
    DecoderError::Open {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn tags_err(path: &Path, err: impl std::fmt::Display) -> DecoderError {
    DecoderError::Tags {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

fn non_empty(value: Option<Cow<'_, str>>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl DecoderPlugin for RodioPlugin {
    fn name(&self) -> &'static str {
        "rodio"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    fn open(&self, path: &Path) -> Result<Box<dyn Decoder>, DecoderError> {
        let file = File::open(path).map_err(|e| open_err(path, e))?;
        let source = rodio::Decoder::new(BufReader::new(file)).map_err(|e| open_err(path, e))?;

        // Container-level numbers; the stream itself rarely knows them.
        let props = lofty::read_from_path(path).ok().map(|tagged| {
            let p = tagged.properties();
            (p.duration(), p.audio_bitrate())
        });
        let duration = source
            .total_duration()
            .or_else(|| props.map(|(d, _)| d))
            .filter(|d| !d.is_zero());
        let bitrate = props.and_then(|(_, b)| b).map(|b| b as i32);

        Ok(Box::new(RodioDecoder {
            source,
            duration,
            bitrate,
        }))
    }

    fn read_tags(&self, path: &Path) -> Result<FileTags, DecoderError> {
        let tagged = lofty::read_from_path(path).map_err(|e| tags_err(path, e))?;
        let mut tags = FileTags {
            duration: Some(tagged.properties().duration().as_secs() as i32),
            ..FileTags::default()
        };

        if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
            tags.title = non_empty(tag.title());
            tags.artist = non_empty(tag.artist());
            tags.album = non_empty(tag.album());
            tags.track = tag.track().map(|t| t as i32);
        }
        Ok(tags)
    }

    fn write_tags(&self, path: &Path, edit: &TagEdit) -> Result<(), DecoderError> {
        let mut tagged = lofty::read_from_path(path).map_err(|e| tags_err(path, e))?;
        if tagged.primary_tag().is_none() {
            let tag_type = tagged.primary_tag_type();
            tagged.insert_tag(Tag::new(tag_type));
        }
        let Some(tag) = tagged.primary_tag_mut() else {
            return Err(tags_err(path, "file format cannot hold tags"));
        };

        if let Some(title) = &edit.title {
            tag.set_title(title.clone());
        }
        if let Some(artist) = &edit.artist {
            tag.set_artist(artist.clone());
        }
        if let Some(album) = &edit.album {
            tag.set_album(album.clone());
        }
        if let Some(track) = edit.track.filter(|t| *t > 0) {
            tag.set_track(track as u32);
        }

        tag.save_to_path(path, WriteOptions::default())
            .map_err(|e| tags_err(path, e))
    }
}

struct RodioDecoder {
    source: rodio::Decoder<BufReader<File>>,
    duration: Option<Duration>,
    bitrate: Option<i32>,
}

/// Samples to read into a buffer of `room`: whole frames, stopping at the end
/// of the current span so one chunk has one format. A span shorter than a
/// frame still yields one frame.
pub(super) fn chunk_len(span: Option<usize>, room: usize, channels: usize) -> usize {
    let whole = |n: usize| n - n % channels;
    let span = match span {
        Some(0) | None => room,
        Some(n) => n.min(room),
    };
    match whole(span) {
        0 => whole(room).min(channels),
        n => n,
    }
}

impl Decoder for RodioDecoder {
    fn decode(&mut self, buf: &mut [f32], params: &mut SoundParams) -> Result<usize, DecoderError> {
        let channels = self.source.channels() as usize;
        if channels == 0 {
            return Err(DecoderError::Decode("stream reports zero channels".into()));
        }
        *params = SoundParams {
            channels: channels as u16,
            rate: self.source.sample_rate(),
        };

        let want = chunk_len(self.source.current_span_len(), buf.len(), channels);

        let mut filled = 0;
        while filled < want {
            match self.source.next() {
                Some(sample) => {
                    buf[filled] = sample;
                    filled += 1;
                }
                None => break,
            }
        }
        Ok(filled)
    }

    fn seek(&mut self, to: Duration) -> Result<Duration, DecoderError> {
        self.source.try_seek(to).map_err(|e| DecoderError::Seek {
            to,
            reason: e.to_string(),
        })?;
        Ok(to)
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn bitrate(&self) -> Option<i32> {
        self.bitrate
    }
}
