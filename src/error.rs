//! Infrastructure errors.
//!
//! These are the failures that can take the whole server down: the socket
//! cannot be bound, no audio output works, a thread cannot be spawned.
//! Media problems are [`crate::decoder::DecoderError`] and never end up here.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::tags::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("cannot bind socket {}: {source}", path.display())]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("a server is already listening on {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("no usable audio backend (tried: {0})")]
    NoAudioBackend(String),

    #[error("audio backend `{backend}` failed: {reason}")]
    AudioBackend {
        backend: String,
        reason: String,
    },

    #[error("tag store error: {0}")]
    Store(#[from] StoreError),

    #[error("cannot spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ServerError>;
