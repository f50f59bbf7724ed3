//! Tag cache: answers tag requests from the store when it is fresh and
//! otherwise from the decoders, on one background worker.
//!
//! Each client has its own FIFO of requests. The worker takes one request
//! from each non-empty queue in turn so a client asking for a thousand
//! files does not starve one asking for a single file.

use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::UNIX_EPOCH;

use crate::CLIENTS_MAX;
use crate::decoder::DecoderRegistry;
use crate::error::ServerError;
use crate::protocol::{Event, EventSink};

use super::locks::KeyLocks;
use super::model::{FileTags, TagEdit};
use super::ratings::{read_rating, write_rating};
use super::store::{CacheRecord, TagStore};

#[derive(Debug, Clone, PartialEq, Eq)]
struct TagRequest {
    path: String,
    /// Present for writes.
    edit: Option<TagEdit>,
}

#[derive(Default)]
struct Queues {
    clients: [VecDeque<TagRequest>; CLIENTS_MAX],
    exit: bool,
}

struct Shared {
    /// `None` when caching is disabled: every lookup is a miss.
    store: Option<TagStore>,
    locks: KeyLocks,
    decoders: Arc<DecoderRegistry>,
    events: Arc<dyn EventSink>,
    queues: Mutex<Queues>,
    cond: Condvar,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Modification time of a local file in nanoseconds; `None` for streams
/// and missing files, which are never cached.
fn file_mtime(path: &str) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let since = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since.as_nanos() as i64)
}

impl Shared {
    fn lookup(&self, path: &str) -> Option<CacheRecord> {
        match self.store.as_ref()?.get(path) {
            Ok(record) => record,
            Err(e) => {
                log::warn!("tag cache lookup for {path}: {e}");
                None
            }
        }
    }

    fn store(&self, path: &str, record: &CacheRecord) {
        if let Some(store) = &self.store
            && let Err(e) = store.put(path, record)
        {
            log::warn!("tag cache update for {path}: {e}");
        }
    }

    fn forget(&self, path: &str) {
        if let Some(store) = &self.store
            && let Err(e) = store.remove(path)
        {
            log::warn!("tag cache removal of {path}: {e}");
        }
    }

    /// A fresh cached record, without touching the file's contents.
    fn fresh(&self, path: &str) -> Option<FileTags> {
        let mtime = file_mtime(path)?;
        self.locks.with(path, || {
            self.lookup(path)
                .filter(|rec| rec.mtime == mtime)
                .map(|rec| rec.tags)
        })
    }

    /// The tags of `path`, read from the file when the cache is stale.
    fn read(&self, path: &str) -> FileTags {
        self.locks.with(path, || {
            let mtime = file_mtime(path);
            if let Some(mtime) = mtime
                && let Some(rec) = self.lookup(path)
                && rec.mtime == mtime
            {
                return rec.tags;
            }

            let mut tags = match self.decoders.read_tags(Path::new(path)) {
                Ok(tags) => tags,
                Err(e) => {
                    log::debug!("no tags for {path}: {e}");
                    FileTags::default()
                }
            };
            tags.rating = read_rating(path);

            if let Some(mtime) = mtime {
                self.store(
                    path,
                    &CacheRecord {
                        tags: tags.clone(),
                        mtime,
                    },
                );
            }
            tags
        })
    }

    fn serve(&self, client: usize, req: TagRequest) {
        if let Some(edit) = &req.edit {
            if let Err(e) = self.decoders.write_tags(Path::new(&req.path), edit) {
                log::warn!("cannot write tags to {}: {e}", req.path);
                self.events.send_to(
                    client,
                    &Event::StatusMsg(format!("Cannot write tags: {e}")),
                );
                return;
            }
            // The mtime may not have moved within its resolution.
            self.locks.with(&req.path, || self.forget(&req.path));
        }

        let tags = self.read(&req.path);
        self.events.send_to(
            client,
            &Event::FileTags {
                path: req.path,
                tags,
            },
        );
    }
}

fn worker(shared: &Shared) {
    let mut next = 0;
    loop {
        let (client, req) = {
            let mut queues = lock(&shared.queues);
            let mut empty_in_a_row = 0;
            loop {
                if queues.exit {
                    return;
                }
                let client = next;
                next = (next + 1) % CLIENTS_MAX;
                if let Some(req) = queues.clients[client].pop_front() {
                    break (client, req);
                }
                empty_in_a_row += 1;
                if empty_in_a_row >= CLIENTS_MAX {
                    empty_in_a_row = 0;
                    queues = match shared.cond.wait(queues) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                }
            }
        };
        shared.serve(client, req);
    }
}

pub struct TagCache {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TagCache {
    /// Start the worker. With no store, nothing is remembered between
    /// requests.
    pub fn start(
        store: Option<TagStore>,
        decoders: Arc<DecoderRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self, ServerError> {
        let shared = Arc::new(Shared {
            store,
            locks: KeyLocks::default(),
            decoders,
            events,
            queues: Mutex::new(Queues::default()),
            cond: Condvar::new(),
        });
        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("tags".into())
            .spawn(move || worker(&thread_shared))
            .map_err(|source| ServerError::Spawn {
                what: "tags",
                source,
            })?;
        Ok(Self {
            shared,
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Tags of `path`, read synchronously on a cache miss.
    pub fn get_immediate(&self, path: &str) -> FileTags {
        self.shared.read(path)
    }

    /// Ask for the tags of `path` on behalf of `client`, optionally after
    /// applying `edit`. Fresh reads are answered at once.
    pub fn add_request(&self, path: &str, client: usize, edit: Option<TagEdit>) {
        if client >= CLIENTS_MAX {
            log::warn!("tag request from invalid client {client}");
            return;
        }
        if edit.is_none()
            && let Some(tags) = self.shared.fresh(path)
        {
            self.shared.events.send_to(
                client,
                &Event::FileTags {
                    path: path.to_string(),
                    tags,
                },
            );
            return;
        }

        let mut queues = lock(&self.shared.queues);
        queues.clients[client].push_back(TagRequest {
            path: path.to_string(),
            edit,
        });
        self.shared.cond.notify_all();
    }

    /// Drop everything `client` still has queued.
    pub fn clear_queue(&self, client: usize) {
        if let Some(queue) = lock(&self.shared.queues).clients.get_mut(client) {
            queue.clear();
        }
    }

    /// Record a new rating for a cached file, if it is cached and fresh.
    pub fn ratings_changed(&self, path: &str, rating: i32) {
        let Some(mtime) = file_mtime(path) else {
            return;
        };
        self.shared.locks.with(path, || {
            if let Some(mut rec) = self.shared.lookup(path)
                && rec.mtime == mtime
                && rec.tags.rating != Some(rating)
            {
                rec.tags.rating = Some(rating);
                self.shared.store(path, &rec);
            }
        });
    }

    /// Persist a rating next to the file and update the cache.
    pub fn set_rating(&self, path: &str, rating: i32) -> std::io::Result<()> {
        write_rating(path, rating)?;
        self.ratings_changed(path, rating);
        Ok(())
    }

    pub fn queued(&self, client: usize) -> usize {
        lock(&self.shared.queues)
            .clients
            .get(client)
            .map_or(0, VecDeque::len)
    }

    pub fn shutdown(&self) {
        {
            let mut queues = lock(&self.shared.queues);
            queues.exit = true;
            self.shared.cond.notify_all();
        }
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            log::error!("tag worker panicked");
        }
    }
}

impl Drop for TagCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}
