//! Connected clients and their outgoing event queues.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::CLIENTS_MAX;
use crate::protocol::{Channel, Command, Event, EventSink, ProtocolError};

/// How long a client may go quiet in the middle of a command before it is
/// dropped.
pub const COMMAND_STALL: Duration = Duration::from_secs(2);

type Half = Mutex<Option<Channel<UnixStream>>>;

/// One client connection, split by direction.
///
/// `inbound` is only ever touched by the dispatch loop. Other threads lock
/// `outbound` alone, and only to queue packets, so a client that is slow to
/// finish a command cannot hold up a broadcast.
#[derive(Default)]
struct Slot {
    inbound: Half,
    outbound: Half,
}

/// Why [`ClientRegistry::add`] turned a connection away.
#[derive(Debug)]
pub enum Refused {
    /// Every slot is taken; the stream is handed back so it can be told.
    Full(UnixStream),
    Io(io::Error),
}

/// Fixed table of client slots.
///
/// Each slot has its own locks so a broadcast from the player thread only
/// contends with the dispatch loop on one client at a time. Enqueueing
/// never touches the socket; the dispatch loop delivers queued packets when
/// the socket is writable, and a byte on the wake pipe tells it there is
/// something new to deliver.
pub struct ClientRegistry {
    slots: Vec<Slot>,
    wake_tx: UnixStream,
    wake_rx: UnixStream,
}

fn lock(half: &Half) -> MutexGuard<'_, Option<Channel<UnixStream>>> {
    half.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ClientRegistry {
    pub fn new() -> io::Result<Self> {
        let (wake_tx, wake_rx) = UnixStream::pair()?;
        wake_tx.set_nonblocking(true)?;
        wake_rx.set_nonblocking(true)?;
        Ok(Self {
            slots: (0..CLIENTS_MAX).map(|_| Slot::default()).collect(),
            wake_tx,
            wake_rx,
        })
    }

    fn outbound(&self, client: usize) -> Option<MutexGuard<'_, Option<Channel<UnixStream>>>> {
        self.slots.get(client).map(|s| lock(&s.outbound))
    }

    /// Take a free slot for `stream`.
    pub fn add(&self, stream: UnixStream) -> Result<usize, Refused> {
        for (client, slot) in self.slots.iter().enumerate() {
            let mut outbound = lock(&slot.outbound);
            if outbound.is_some() {
                continue;
            }
            let mut reader = Channel::new(stream.try_clone().map_err(Refused::Io)?);
            reader.set_read_stall(COMMAND_STALL);
            *lock(&slot.inbound) = Some(reader);
            *outbound = Some(Channel::new(stream));
            return Ok(client);
        }
        Err(Refused::Full(stream))
    }

    pub fn remove(&self, client: usize) {
        if let Some(slot) = self.slots.get(client) {
            *lock(&slot.outbound) = None;
            *lock(&slot.inbound) = None;
        }
    }

    pub fn remove_all(&self) {
        for client in 0..self.slots.len() {
            self.remove(client);
        }
    }

    pub fn is_connected(&self, client: usize) -> bool {
        self.outbound(client).is_some_and(|s| s.is_some())
    }

    pub fn connected(&self) -> Vec<usize> {
        (0..self.slots.len())
            .filter(|&c| self.is_connected(c))
            .collect()
    }

    pub fn raw_fd(&self, client: usize) -> Option<RawFd> {
        self.outbound(client)?
            .as_ref()
            .map(|ch| ch.get_ref().as_raw_fd())
    }

    pub fn has_pending(&self, client: usize) -> bool {
        self.outbound(client)
            .is_some_and(|s| s.as_ref().is_some_and(Channel::has_packets))
    }

    /// Read one whole command from `client`.
    ///
    /// Only the receive side is locked while reading, so events keep queueing
    /// for this client even if the rest of the command is slow to arrive. A
    /// client that stalls for [`COMMAND_STALL`] mid-command gets an error.
    pub fn read_command(&self, client: usize) -> Result<Command, ProtocolError> {
        let slot = self.slots.get(client).ok_or_else(gone)?;
        let mut inbound = lock(&slot.inbound);
        let ch = inbound.as_mut().ok_or_else(gone)?;
        Command::read(ch)
    }

    /// Deliver whatever fits into `client`'s socket right now.
    pub fn flush(&self, client: usize) -> io::Result<usize> {
        match self.outbound(client) {
            Some(mut slot) => match slot.as_mut() {
                Some(ch) => ch.drain_packets(),
                None => Ok(0),
            },
            None => Ok(0),
        }
    }

    pub fn wake_fd(&self) -> RawFd {
        self.wake_rx.as_raw_fd()
    }

    /// Swallow pending wake-ups.
    pub fn clear_wake(&self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = (&self.wake_rx).read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }

    /// Make the dispatch loop go round once.
    pub fn wake(&self) {
        // A full pipe already guarantees a wake-up.
        let _ = (&self.wake_tx).write(&[1]);
    }

    fn enqueue(&self, client: usize, event: &Event) -> bool {
        let Some(mut slot) = self.outbound(client) else {
            return false;
        };
        let Some(ch) = slot.as_mut() else {
            return false;
        };
        if let Err(e) = event.enqueue(ch) {
            log::warn!("cannot queue event for client {client}: {e}");
        }
        true
    }
}

fn gone() -> ProtocolError {
    ProtocolError::Io(io::Error::new(
        io::ErrorKind::NotConnected,
        "client slot is empty",
    ))
}

impl EventSink for ClientRegistry {
    fn broadcast(&self, event: &Event) {
        let mut any = false;
        for client in 0..self.slots.len() {
            any |= self.enqueue(client, event);
        }
        if any {
            self.wake();
        }
    }

    fn send_to(&self, client: usize, event: &Event) {
        if self.enqueue(client, event) {
            self.wake();
        }
    }
}
