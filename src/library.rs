//! Folder listings for songs played by path.

use std::path::Path;

use walkdir::WalkDir;

use crate::config::LibrarySettings;

fn is_audio_file(path: &Path, settings: &LibrarySettings) -> bool {
    let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
        return false;
    };
    settings
        .extensions
        .iter()
        .map(|e| e.trim().trim_start_matches('.'))
        .any(|e| !e.is_empty() && e.eq_ignore_ascii_case(ext))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|s| s.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// The songs in `dir`, not descending into subfolders, sorted by file
/// name without regard to case.
pub fn folder_listing(dir: &Path, settings: &LibrarySettings) -> Vec<String> {
    let mut songs: Vec<String> = WalkDir::new(dir)
        .follow_links(settings.follow_links)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| settings.include_hidden || !is_hidden(p))
        .filter(|p| is_audio_file(p, settings))
        .filter_map(|p| p.to_str().map(str::to_string))
        .collect();

    songs.sort_by_key(|p| p.to_lowercase());
    songs
}

/// The listing for playing `path`: its folder's songs, or just `path` when
/// it has no readable folder (streams, odd paths).
pub fn listing_for(path: &str, settings: &LibrarySettings) -> Vec<String> {
    match Path::new(path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() && dir.is_dir() => {
            folder_listing(dir, settings)
        }
        _ => vec![path.to_string()],
    }
}
