use std::time::Duration;

/// Metadata the server knows about one file.
///
/// Every field is optional: files without tags are perfectly playable, and
/// the wire encoding carries a presence flag per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track: Option<i32>,
    /// Length in whole seconds.
    pub duration: Option<i32>,
    /// 0..=5 stars.
    pub rating: Option<i32>,
}

impl FileTags {
    pub fn duration(&self) -> Option<Duration> {
        self.duration
            .filter(|d| *d >= 0)
            .map(|d| Duration::from_secs(d as u64))
    }

    /// `Artist - Title`, falling back to whatever is present.
    pub fn display_title(&self) -> Option<String> {
        let artist = self.artist.as_deref().map(str::trim).filter(|s| !s.is_empty());
        let title = self.title.as_deref().map(str::trim).filter(|s| !s.is_empty());
        match (artist, title) {
            (Some(a), Some(t)) => Some(format!("{a} - {t}")),
            (None, Some(t)) => Some(t.to_string()),
            (Some(a), None) => Some(a.to_string()),
            (None, None) => None,
        }
    }
}

/// A requested change to a file's tags; absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagEdit {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub track: Option<i32>,
}

impl TagEdit {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.artist.is_none() && self.album.is_none() && self.track.is_none()
    }

    /// The tags `base` would have after this edit.
    pub fn apply_to(&self, base: &FileTags) -> FileTags {
        FileTags {
            title: self.title.clone().or_else(|| base.title.clone()),
            artist: self.artist.clone().or_else(|| base.artist.clone()),
            album: self.album.clone().or_else(|| base.album.clone()),
            track: self.track.or(base.track),
            ..base.clone()
        }
    }
}
