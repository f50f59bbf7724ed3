//! Playlist and shuffle navigation.
//!
//! The navigator owns two song lists: the explicit playlist clients edit,
//! and a transient listing of the folder the last `play(path)` came from.
//! It decides what plays next; it never touches audio or the filesystem.

mod list;
mod navigator;
mod options;
mod shuffle;

pub use list::{Entry, EntryState, SongList};
pub use navigator::{ListKind, Navigator, SongRef};
pub use options::Options;
