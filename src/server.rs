//! The socket server: accepts clients and runs the dispatch loop.
//!
//! Everything here runs on one thread. Commands are read and handled one at
//! a time; events produced anywhere in the process are queued on the client
//! slots and delivered by this loop when the sockets are writable.

mod dispatch;
mod registry;

use std::fs;
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use dispatch::{ControlCmd, Core, Flow, NowPlaying};
pub use registry::{COMMAND_STALL, ClientRegistry, Refused};

use crate::audio::{Engine, EngineOptions, SinkFactory};
use crate::config::Settings;
use crate::decoder::DecoderRegistry;
use crate::error::ServerError;
use crate::playlist::{Navigator, Options};
use crate::poll::{Interest, PollSet};
use crate::protocol::{Channel, Event, EventSink};
use crate::tags::{TagCache, TagStore};

/// How long queued events (`EV_EXIT` above all) get to reach clients on
/// shutdown.
const EXIT_FLUSH: Duration = Duration::from_secs(1);

pub struct Server {
    listener: UnixListener,
    socket_path: PathBuf,
    core: Arc<Core>,
    poll: PollSet,
}

impl Server {
    /// Bind the socket and bring up the tag worker and the playback engine.
    pub fn start(
        settings: &Settings,
        decoders: DecoderRegistry,
        sink: SinkFactory,
    ) -> Result<Self, ServerError> {
        let socket_path = settings.server.socket_path.clone();
        let listener = bind(&socket_path)?;

        match build_core(settings, decoders, sink) {
            Ok(core) => {
                log::info!("listening on {}", socket_path.display());
                Ok(Self {
                    listener,
                    socket_path,
                    core: Arc::new(core),
                    poll: PollSet::new(),
                })
            }
            Err(e) => {
                let _ = fs::remove_file(&socket_path);
                Err(e)
            }
        }
    }

    pub fn core(&self) -> Arc<Core> {
        Arc::clone(&self.core)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Serve clients until one sends `CMD_QUIT` or the MPRIS bridge asks
    /// to quit.
    pub fn run(&mut self) -> Result<(), ServerError> {
        let registry = Arc::clone(&self.core.registry);
        loop {
            if self.core.quit_requested() {
                break;
            }

            self.poll.clear();
            let listener_tok = self.poll.register(self.listener.as_raw_fd(), Interest::Read);
            let wake_tok = self.poll.register(registry.wake_fd(), Interest::Read);
            let clients: Vec<(usize, usize)> = registry
                .connected()
                .into_iter()
                .filter_map(|client| {
                    let fd = registry.raw_fd(client)?;
                    let interest = if registry.has_pending(client) {
                        Interest::ReadWrite
                    } else {
                        Interest::Read
                    };
                    Some((client, self.poll.register(fd, interest)))
                })
                .collect();

            if self.poll.wait(None)? == 0 {
                continue;
            }

            if self.poll.readiness(wake_tok).readable {
                registry.clear_wake();
            }

            let mut quit = false;
            for (client, tok) in clients {
                let ready = self.poll.readiness(tok);
                if ready.writable {
                    self.flush_client(client);
                }
                if ready.readable || ready.failed {
                    match self.handle_client(client) {
                        Flow::Continue => {}
                        Flow::Disconnect => self.drop_client(client),
                        Flow::Quit => {
                            quit = true;
                            break;
                        }
                    }
                }
            }
            if quit {
                log::info!("quit requested by a client");
                break;
            }

            if self.poll.readiness(listener_tok).readable {
                self.accept_clients();
            }

            // Deliver what the handlers just queued without waiting for
            // another round through poll.
            for client in registry.connected() {
                if registry.has_pending(client) {
                    self.flush_client(client);
                }
            }
        }

        self.shutdown();
        Ok(())
    }

    fn accept_clients(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => self.admit(stream),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    return;
                }
            }
        }
    }

    fn admit(&self, stream: UnixStream) {
        if let Err(e) = stream.set_nonblocking(true) {
            log::warn!("cannot set up a new client: {e}");
            return;
        }
        match self.core.registry.add(stream) {
            Ok(client) => log::debug!("client {client} connected"),
            Err(Refused::Io(e)) => log::warn!("cannot set up a new client: {e}"),
            Err(Refused::Full(stream)) => {
                log::info!("refusing a client: all {} slots taken", crate::CLIENTS_MAX);
                let mut ch = Channel::new(stream);
                if let Err(e) = Event::Busy.write(&mut ch) {
                    log::debug!("cannot tell a refused client it is busy: {e}");
                }
            }
        }
    }

    fn handle_client(&self, client: usize) -> Flow {
        match self.core.registry.read_command(client) {
            Ok(cmd) => self.core.dispatch(client, cmd),
            Err(e) => {
                if e.is_disconnect() {
                    log::debug!("client {client} went away");
                } else {
                    log::warn!("dropping client {client}: {e}");
                }
                Flow::Disconnect
            }
        }
    }

    fn flush_client(&self, client: usize) {
        if let Err(e) = self.core.registry.flush(client) {
            log::debug!("dropping client {client}: {e}");
            self.drop_client(client);
        }
    }

    fn drop_client(&self, client: usize) {
        self.core.registry.remove(client);
        self.core.tags.clear_queue(client);
        log::debug!("client {client} disconnected");
    }

    fn shutdown(&mut self) {
        log::info!("shutting down");
        let registry = Arc::clone(&self.core.registry);
        registry.broadcast(&Event::Exit);
        self.flush_before_exit(&registry);

        self.core.engine.shutdown();
        self.core.tags.shutdown();
        registry.remove_all();
        let _ = fs::remove_file(&self.socket_path);
    }

    fn flush_before_exit(&mut self, registry: &ClientRegistry) {
        let deadline = Instant::now() + EXIT_FLUSH;
        loop {
            let pending: Vec<(usize, usize)> = {
                self.poll.clear();
                registry
                    .connected()
                    .into_iter()
                    .filter(|&c| registry.has_pending(c))
                    .filter_map(|c| {
                        let fd = registry.raw_fd(c)?;
                        Some((c, self.poll.register(fd, Interest::Write)))
                    })
                    .collect()
            };
            let now = Instant::now();
            if pending.is_empty() || now >= deadline {
                return;
            }
            match self.poll.wait(Some(deadline - now)) {
                Ok(_) => {}
                Err(e) => {
                    log::warn!("poll failed while flushing: {e}");
                    return;
                }
            }
            for (client, tok) in pending {
                let ready = self.poll.readiness(tok);
                if ready.failed {
                    registry.remove(client);
                } else if ready.writable && registry.flush(client).is_err() {
                    registry.remove(client);
                }
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.socket_path);
    }
}

/// Bind the control socket, clearing a stale one left by a dead server.
fn bind(path: &Path) -> Result<UnixListener, ServerError> {
    if path.exists() {
        if UnixStream::connect(path).is_ok() {
            return Err(ServerError::AlreadyRunning(path.to_path_buf()));
        }
        log::info!("removing stale socket {}", path.display());
        fs::remove_file(path).map_err(|source| ServerError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
    }
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)?;
    }

    let listener = UnixListener::bind(path).map_err(|source| ServerError::Bind {
        path: path.to_path_buf(),
        source,
    })?;
    listener.set_nonblocking(true)?;
    Ok(listener)
}

fn open_store(settings: &Settings) -> Option<TagStore> {
    if !settings.cache.enabled {
        return None;
    }
    match TagStore::open(&settings.cache.dir) {
        Ok(store) => Some(store),
        Err(e) => {
            log::warn!(
                "tag cache at {} unavailable, running without it: {e}",
                settings.cache.dir.display()
            );
            None
        }
    }
}

fn build_core(
    settings: &Settings,
    decoders: DecoderRegistry,
    sink: SinkFactory,
) -> Result<Core, ServerError> {
    let registry = Arc::new(ClientRegistry::new()?);
    let events: Arc<dyn EventSink> = registry.clone();
    let decoders = Arc::new(decoders);

    let tags = Arc::new(TagCache::start(
        open_store(settings),
        Arc::clone(&decoders),
        Arc::clone(&events),
    )?);

    let playback = &settings.playback;
    let nav = Arc::new(Mutex::new(Navigator::new(Options {
        shuffle: playback.shuffle,
        repeat: playback.repeat,
        autonext: playback.autonext,
    })));

    let engine = Engine::start(
        EngineOptions::from_settings(settings),
        sink,
        Arc::clone(&nav),
        decoders,
        Arc::clone(&tags),
        events,
    )?;

    Ok(Core::new(
        registry,
        nav,
        engine,
        tags,
        settings.library.clone(),
    ))
}

#[cfg(test)]
mod tests;
