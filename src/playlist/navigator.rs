use rand::SeedableRng;
use rand::rngs::StdRng;

use super::list::SongList;
use super::options::Options;
use super::shuffle::ShuffleOrder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// The playlist clients build with `PLIST_*` commands.
    Playlist,
    /// Songs in the folder of the last file played by path.
    DirListing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SongRef {
    pub list: ListKind,
    pub index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// The playlist state machine.
///
/// Shared behind one mutex by the dispatch loop and the playback engine.
/// Every operation is cheap and never blocks.
#[derive(Debug)]
pub struct Navigator {
    playlist: SongList,
    dir_listing: SongList,
    /// Which list `next`/`prev` walk when nothing is current.
    active: ListKind,
    current: Option<SongRef>,
    options: Options,
    shuffle: Option<(ListKind, ShuffleOrder)>,
    rng: StdRng,
}

impl Navigator {
    pub fn new(options: Options) -> Self {
        Self::with_rng(options, StdRng::from_os_rng())
    }

    /// A navigator whose shuffle orders are reproducible.
    pub fn with_seed(options: Options, seed: u64) -> Self {
        Self::with_rng(options, StdRng::seed_from_u64(seed))
    }

    fn with_rng(options: Options, rng: StdRng) -> Self {
        Self {
            playlist: SongList::new(),
            dir_listing: SongList::new(),
            active: ListKind::Playlist,
            current: None,
            options,
            shuffle: None,
            rng,
        }
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn set_options(&mut self, options: Options) {
        if options.shuffle != self.options.shuffle {
            self.shuffle = None;
        }
        self.options = options;
    }

    pub fn toggle_shuffle(&mut self) -> Options {
        self.set_options(Options {
            shuffle: !self.options.shuffle,
            ..self.options
        });
        self.options
    }

    pub fn toggle_repeat(&mut self) -> Options {
        self.options.repeat = !self.options.repeat;
        self.options
    }

    pub fn toggle_autonext(&mut self) -> Options {
        self.options.autonext = !self.options.autonext;
        self.options
    }

    pub fn list(&self, kind: ListKind) -> &SongList {
        match kind {
            ListKind::Playlist => &self.playlist,
            ListKind::DirListing => &self.dir_listing,
        }
    }

    fn list_mut(&mut self, kind: ListKind) -> &mut SongList {
        match kind {
            ListKind::Playlist => &mut self.playlist,
            ListKind::DirListing => &mut self.dir_listing,
        }
    }

    pub fn playlist(&self) -> &SongList {
        &self.playlist
    }

    pub fn current_ref(&self) -> Option<SongRef> {
        self.current
    }

    /// Path of the current song.
    pub fn current(&self) -> Option<String> {
        self.current
            .and_then(|r| self.list(r.list).path(r.index))
            .map(str::to_string)
    }

    /// Make `song` current. Fails (and changes nothing) for a missing or
    /// invalidated entry.
    pub fn play_song(&mut self, song: SongRef) -> Option<String> {
        if !self.list(song.list).is_valid(song.index) {
            return None;
        }
        self.active = song.list;
        self.current = Some(song);
        self.current()
    }

    /// Play a file by path. `listing` is the content of its folder; the
    /// file becomes current within it.
    pub fn play_path(&mut self, path: &str, listing: Vec<String>) -> Option<String> {
        let mut list = SongList::from_paths(listing);
        let index = match list.position(path) {
            Some(i) => i,
            None => {
                let at = list.len();
                list.insert(at, &[path.to_string()]);
                at
            }
        };
        self.dir_listing = list;
        self.drop_shuffle_for(ListKind::DirListing);
        self.play_song(SongRef {
            list: ListKind::DirListing,
            index,
        })
    }

    /// Replace the playlist and start at `index`, or wherever `next` would
    /// start when `index` is out of range.
    pub fn play_list(&mut self, items: Vec<String>, index: Option<usize>) -> Option<String> {
        self.playlist = SongList::from_paths(items);
        self.drop_shuffle_for(ListKind::Playlist);
        self.active = ListKind::Playlist;
        self.current = None;

        if let Some(index) = index.filter(|&i| self.playlist.is_valid(i)) {
            return self.play_song(SongRef {
                list: ListKind::Playlist,
                index,
            });
        }
        self.next(true)
    }

    /// Advance. `force` is set for explicit skips and clear for a song
    /// that ended on its own.
    pub fn next(&mut self, force: bool) -> Option<String> {
        self.current = self.step(Direction::Forward, force);
        self.current()
    }

    pub fn prev(&mut self) -> Option<String> {
        self.current = self.step(Direction::Backward, false);
        self.current()
    }

    /// What a natural end of the current song would play, without moving.
    pub fn peek_next(&mut self) -> Option<String> {
        self.step(Direction::Forward, false)
            .and_then(|r| self.list(r.list).path(r.index))
            .map(str::to_string)
    }

    fn step(&mut self, dir: Direction, force: bool) -> Option<SongRef> {
        let kind = self.current.map_or(self.active, |r| r.list);
        if self.list(kind).valid_count() == 0 {
            return None;
        }
        let cur = self.current.map(|r| r.index);
        let wrap = self.options.repeat || force;

        if self.options.shuffle {
            let index = self.shuffle_step(kind, cur, dir, wrap)?;
            return Some(SongRef { list: kind, index });
        }

        let list = self.list(kind);
        let index = match dir {
            Direction::Forward if !self.options.autonext && !force => {
                if self.options.repeat {
                    cur.filter(|&i| list.is_valid(i))
                } else {
                    None
                }
            }
            Direction::Forward => {
                let after = match cur {
                    Some(i) => list.next_valid_after(i),
                    None => list.first_valid(),
                };
                after.or_else(|| if wrap { list.first_valid() } else { None })
            }
            Direction::Backward => {
                let before = cur.and_then(|i| list.prev_valid_before(i));
                before.or_else(|| {
                    if self.options.repeat {
                        list.last_valid()
                    } else {
                        None
                    }
                })
            }
        }?;
        Some(SongRef { list: kind, index })
    }

    fn shuffle_step(
        &mut self,
        kind: ListKind,
        cur: Option<usize>,
        dir: Direction,
        wrap: bool,
    ) -> Option<usize> {
        let fits = matches!(&self.shuffle, Some((k, order)) if *k == kind && order.fits(self.list(kind)));
        if !fits {
            self.rebuild_shuffle(kind, cur);
        }

        let (_, order) = self.shuffle.as_ref()?;
        let list = self.list(kind);
        let pos = cur.and_then(|i| order.position(i));

        match dir {
            Direction::Forward => {
                let next = match pos {
                    Some(p) => order.valid_after(p, list),
                    None => order.first_valid(list),
                };
                if next.is_some() || !wrap {
                    return next;
                }
                self.rebuild_shuffle(kind, cur);
                let (_, order) = self.shuffle.as_ref()?;
                let list = self.list(kind);
                match cur.and_then(|i| order.position(i)) {
                    Some(p) => order.valid_after(p, list).or_else(|| order.first_valid(list)),
                    None => order.first_valid(list),
                }
            }
            Direction::Backward => {
                let prev = pos.and_then(|p| order.valid_before(p, list));
                if prev.is_none() && self.options.repeat {
                    order.last_valid(list)
                } else {
                    prev
                }
            }
        }
    }

    fn rebuild_shuffle(&mut self, kind: ListKind, anchor: Option<usize>) {
        let order = match kind {
            ListKind::Playlist => ShuffleOrder::build(&self.playlist, anchor, &mut self.rng),
            ListKind::DirListing => ShuffleOrder::build(&self.dir_listing, anchor, &mut self.rng),
        };
        self.shuffle = Some((kind, order));
    }

    fn drop_shuffle_for(&mut self, kind: ListKind) {
        if matches!(self.shuffle, Some((k, _)) if k == kind) {
            self.shuffle = None;
        }
    }

    /// Tombstone a file that failed to decode so navigation skips it.
    pub fn invalidate(&mut self, path: &str) -> bool {
        let mut hit = false;
        if let Some(cur) = self.current
            && self.list(cur.list).path(cur.index) == Some(path)
        {
            hit |= self.list_mut(cur.list).invalidate_at(cur.index);
        }
        hit |= self.playlist.invalidate_path(path);
        hit |= self.dir_listing.invalidate_path(path);
        hit
    }

    /// Insert into the playlist at `index`, or append when `None`. Paths
    /// already present are skipped. Returns what was inserted and where.
    pub fn add(&mut self, items: &[String], index: Option<usize>) -> Option<(Vec<String>, usize)> {
        let at = index
            .filter(|&i| i <= self.playlist.len())
            .unwrap_or(self.playlist.len());
        let added = self.playlist.insert(at, items);
        if added.is_empty() {
            return None;
        }
        self.drop_shuffle_for(ListKind::Playlist);
        if let Some(cur) = self.current.as_mut()
            && cur.list == ListKind::Playlist
            && cur.index >= at
        {
            cur.index += added.len();
        }
        Some((added, at))
    }

    /// Remove one playlist entry. Deleting the current song leaves nothing
    /// current; playback of it is not interrupted.
    pub fn del(&mut self, index: usize) -> Option<String> {
        let entry = self.playlist.remove(index)?;
        self.drop_shuffle_for(ListKind::Playlist);
        if let Some(cur) = self.current
            && cur.list == ListKind::Playlist
        {
            if cur.index == index {
                self.current = None;
            } else if cur.index > index {
                self.current = Some(SongRef {
                    index: cur.index - 1,
                    ..cur
                });
            }
        }
        Some(entry.path)
    }

    pub fn move_entry(&mut self, from: usize, to: usize) -> bool {
        if !self.playlist.move_entry(from, to) {
            return false;
        }
        self.drop_shuffle_for(ListKind::Playlist);
        if let Some(cur) = self.current.as_mut()
            && cur.list == ListKind::Playlist
        {
            cur.index = shifted_by_move(cur.index, from, to);
        }
        true
    }

    pub fn clear(&mut self) {
        self.playlist.clear();
        self.drop_shuffle_for(ListKind::Playlist);
        if self.current.is_some_and(|c| c.list == ListKind::Playlist) {
            self.current = None;
        }
    }
}

/// Where `index` ends up after the entry at `from` moves to `to`.
fn shifted_by_move(index: usize, from: usize, to: usize) -> usize {
    if index == from {
        to
    } else if from < index && index <= to {
        index - 1
    } else if to <= index && index < from {
        index + 1
    } else {
        index
    }
}
