//! SQLite-backed `path -> (tags, mtime)` store.
//!
//! The cache directory holds the database and a version file. A version
//! mismatch means the layout changed: the database is thrown away and
//! recreated rather than migrated.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

use super::model::FileTags;

/// Bump whenever the table layout changes.
pub const CACHE_VERSION: &str = "prestod-tags 1";

const DB_FILE: &str = "tags.db";
const VERSION_FILE: &str = "version";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("tag database: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("tag cache directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What the store knows about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub tags: FileTags,
    /// Source file modification time, in nanoseconds since the epoch.
    pub mtime: i64,
}

pub struct TagStore {
    conn: Mutex<Connection>,
}

impl TagStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        let io_err = |source: io::Error| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        };
        fs::create_dir_all(dir).map_err(io_err)?;

        let version_path = dir.join(VERSION_FILE);
        let db_path = dir.join(DB_FILE);
        let version = fs::read_to_string(&version_path).unwrap_or_default();
        if version.trim() != CACHE_VERSION {
            if db_path.exists() {
                log::info!("tag cache version changed, recreating {}", db_path.display());
                fs::remove_file(&db_path).map_err(io_err)?;
            }
            for leftover in ["tags.db-wal", "tags.db-shm"] {
                let _ = fs::remove_file(dir.join(leftover));
            }
            fs::write(&version_path, format!("{CACHE_VERSION}\n")).map_err(io_err)?;
        }

        let conn = Connection::open(&db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    /// A store that forgets everything on exit.
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tags (
                path     TEXT PRIMARY KEY,
                mtime    INTEGER NOT NULL,
                title    TEXT,
                artist   TEXT,
                album    TEXT,
                track    INTEGER,
                duration INTEGER,
                rating   INTEGER
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, path: &str) -> Result<Option<CacheRecord>, StoreError> {
        let record = self
            .conn()
            .query_row(
                "SELECT mtime, title, artist, album, track, duration, rating
                 FROM tags WHERE path = ?1",
                params![path],
                |row| {
                    Ok(CacheRecord {
                        mtime: row.get(0)?,
                        tags: FileTags {
                            title: row.get(1)?,
                            artist: row.get(2)?,
                            album: row.get(3)?,
                            track: row.get(4)?,
                            duration: row.get(5)?,
                            rating: row.get(6)?,
                        },
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    pub fn put(&self, path: &str, record: &CacheRecord) -> Result<(), StoreError> {
        let tags = &record.tags;
        self.conn().execute(
            "INSERT OR REPLACE INTO tags
                (path, mtime, title, artist, album, track, duration, rating)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                path,
                record.mtime,
                tags.title,
                tags.artist,
                tags.album,
                tags.track,
                tags.duration,
                tags.rating
            ],
        )?;
        Ok(())
    }

    pub fn remove(&self, path: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM tags WHERE path = ?1", params![path])?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}
