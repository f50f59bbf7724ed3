//! prestod: the presto music server.
//!
//! A long-lived process that owns the audio output, a playlist and a tag
//! cache, and is driven by clients over a local Unix socket.

pub mod audio;
pub mod client;
pub mod config;
pub mod decoder;
pub mod error;
pub mod library;
pub mod logging;
pub mod mpris;
pub mod playlist;
pub mod poll;
pub mod protocol;
pub mod server;
pub mod tags;

pub use error::ServerError;

/// Maximum number of simultaneously connected clients.
pub const CLIENTS_MAX: usize = 10;
