use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Valid,
    /// The file failed to decode. The entry keeps its slot so indices held
    /// by clients stay meaningful, but navigation skips it.
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub path: String,
    pub state: EntryState,
}

impl Entry {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            state: EntryState::Valid,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.state == EntryState::Valid
    }
}

/// An ordered list of songs with tombstoned entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SongList {
    entries: Vec<Entry>,
}

impl SongList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from paths, dropping repeats.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = HashSet::new();
        let entries = paths
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| seen.insert(p.clone()))
            .map(Entry::new)
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Entry> {
        self.entries.get(index)
    }

    pub fn path(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(|e| e.path.as_str())
    }

    pub fn is_valid(&self, index: usize) -> bool {
        self.entries.get(index).is_some_and(Entry::is_valid)
    }

    pub fn valid_count(&self) -> usize {
        self.entries.iter().filter(|e| e.is_valid()).count()
    }

    pub fn valid_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_valid())
            .map(|(i, _)| i)
    }

    pub fn position(&self, path: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.path == path)
    }

    pub fn paths(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    /// First valid index strictly after `index`.
    pub fn next_valid_after(&self, index: usize) -> Option<usize> {
        (index + 1..self.len()).find(|&i| self.is_valid(i))
    }

    /// Last valid index strictly before `index`.
    pub fn prev_valid_before(&self, index: usize) -> Option<usize> {
        (0..index.min(self.len())).rev().find(|&i| self.is_valid(i))
    }

    pub fn first_valid(&self) -> Option<usize> {
        self.valid_indices().next()
    }

    pub fn last_valid(&self) -> Option<usize> {
        (0..self.len()).rev().find(|&i| self.is_valid(i))
    }

    /// Insert `paths` at `at` (clamped to the end), skipping any already in
    /// the list. Returns the paths actually inserted.
    pub fn insert(&mut self, at: usize, paths: &[String]) -> Vec<String> {
        let mut seen: HashSet<&str> = self.entries.iter().map(|e| e.path.as_str()).collect();
        let fresh: Vec<String> = paths
            .iter()
            .filter(|p| seen.insert(p.as_str()))
            .cloned()
            .collect();

        let at = at.min(self.entries.len());
        self.entries
            .splice(at..at, fresh.iter().cloned().map(Entry::new));
        fresh
    }

    pub fn remove(&mut self, index: usize) -> Option<Entry> {
        (index < self.entries.len()).then(|| self.entries.remove(index))
    }

    /// Move the entry at `from` so it ends up at index `to`.
    pub fn move_entry(&mut self, from: usize, to: usize) -> bool {
        if from >= self.entries.len() || to >= self.entries.len() {
            return false;
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn invalidate_at(&mut self, index: usize) -> bool {
        match self.entries.get_mut(index) {
            Some(e) if e.is_valid() => {
                e.state = EntryState::Invalid;
                true
            }
            _ => false,
        }
    }

    /// Tombstone every entry with this path.
    pub fn invalidate_path(&mut self, path: &str) -> bool {
        let mut hit = false;
        for e in self.entries.iter_mut().filter(|e| e.path == path) {
            if e.is_valid() {
                e.state = EntryState::Invalid;
                hit = true;
            }
        }
        hit
    }
}
