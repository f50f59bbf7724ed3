use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use crate::decoder::{Decoder, DecoderRegistry};

use super::player::DECODE_CHUNK;
use super::types::SoundParams;

/// The start of a song decoded ahead of time.
pub(super) struct Precached {
    pub path: String,
    pub decoder: Box<dyn Decoder>,
    pub samples: Vec<f32>,
    pub params: SoundParams,
}

/// At most one precache thread at a time; a new one joins the old first.
#[derive(Default)]
pub(super) struct Precache {
    worker: Mutex<Option<JoinHandle<Option<Precached>>>>,
}

impl Precache {
    pub(super) fn start(&self, path: String, decoders: Arc<DecoderRegistry>, buffer_ms: u32) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(prev) = worker.take() {
            let _ = prev.join();
        }

        log::debug!("precaching {path}");
        let spawned = thread::Builder::new()
            .name("precache".into())
            .spawn(move || precache(&decoders, path, buffer_ms));
        match spawned {
            Ok(handle) => *worker = Some(handle),
            Err(e) => log::warn!("cannot start precache thread: {e}"),
        }
    }

    /// Collect the precached state if it is for `path`.
    pub(super) fn take(&self, path: &str) -> Option<Precached> {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        match handle.join() {
            Ok(Some(pre)) if pre.path == path => Some(pre),
            Ok(Some(pre)) => {
                log::debug!("precached {} not used", pre.path);
                None
            }
            Ok(None) => None,
            Err(_) => {
                log::error!("precache thread panicked");
                None
            }
        }
    }

    pub(super) fn discard(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn precache(decoders: &DecoderRegistry, path: String, buffer_ms: u32) -> Option<Precached> {
    let mut decoder = match decoders.open(Path::new(&path)) {
        Ok(d) => d,
        Err(e) => {
            log::debug!("precache of {path} failed: {e}");
            return None;
        }
    };

    let mut buf = vec![0.0f32; DECODE_CHUNK];
    let mut samples = Vec::new();
    let mut params = SoundParams::default();

    loop {
        let mut chunk_params = SoundParams::default();
        let n = match decoder.decode(&mut buf, &mut chunk_params) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::debug!("precache of {path} stopped: {e}");
                return None;
            }
        };

        if samples.is_empty() {
            // Nothing sensible to hold on to without a format.
            if !chunk_params.is_known() {
                return None;
            }
            params = chunk_params;
        } else if chunk_params != params {
            log::debug!("precache of {path} aborted: format changed");
            return None;
        }

        samples.extend_from_slice(&buf[..n]);
        if samples.len() >= params.samples_for_ms(buffer_ms) {
            break;
        }
    }

    Some(Precached {
        path,
        decoder,
        samples,
        params,
    })
}
