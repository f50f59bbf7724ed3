//! Blocking client side of the socket protocol.
//!
//! Used by `prestoctl` and the end-to-end tests. Events that arrive while a
//! request waits for its reply are kept and handed out later by
//! [`Connection::next_event`], in arrival order.

use std::collections::{BTreeMap, VecDeque};
use std::io;
use std::os::unix::net::UnixStream;
use std::path::Path;

use thiserror::Error;

use crate::playlist::Options;
use crate::protocol::{Channel, Command, Event, Field, ProtocolError, ev_op};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to {path}: {source}")]
    Connect {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("server is busy: too many clients")]
    Busy,
    #[error("server exited")]
    Exited,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl From<io::Error> for ClientError {
    fn from(e: io::Error) -> Self {
        ClientError::Protocol(ProtocolError::Io(e))
    }
}

pub struct Connection {
    ch: Channel<UnixStream>,
    backlog: VecDeque<Event>,
}

impl Connection {
    pub fn connect(path: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(path).map_err(|source| ClientError::Connect {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self {
            ch: Channel::new(stream),
            backlog: VecDeque::new(),
        }
    }

    pub fn send(&mut self, cmd: &Command) -> Result<(), ClientError> {
        cmd.write(&mut self.ch)?;
        Ok(())
    }

    /// The next event, waiting for one if none is pending.
    pub fn next_event(&mut self) -> Result<Event, ClientError> {
        if let Some(ev) = self.backlog.pop_front() {
            return Ok(ev);
        }
        let opcode: i32 = self.ch.get()?;
        self.read_event(opcode)
    }

    /// An event if one has fully announced itself; never blocks on an
    /// opcode that has not arrived yet.
    pub fn poll_event(&mut self) -> Result<Option<Event>, ClientError> {
        if let Some(ev) = self.backlog.pop_front() {
            return Ok(Some(ev));
        }
        match self.ch.try_get_int_nonblocking()? {
            Some(opcode) => self.read_event(opcode).map(Some),
            None => Ok(None),
        }
    }

    fn read_event(&mut self, opcode: i32) -> Result<Event, ClientError> {
        match Event::read_body(opcode, &mut self.ch)? {
            Event::Busy => Err(ClientError::Busy),
            ev => Ok(ev),
        }
    }

    /// Send `cmd` and wait for its `EV_DATA` reply, typed as `V`.
    fn request<V: Field>(&mut self, cmd: &Command) -> Result<V, ClientError> {
        self.send(cmd)?;
        self.reply()
    }

    /// Wait for the next `EV_DATA` reply and read it as `V`.
    pub fn reply<V: Field>(&mut self) -> Result<V, ClientError> {
        loop {
            let opcode: i32 = self.ch.get()?;
            if opcode == ev_op::DATA {
                return Ok(self.ch.get()?);
            }
            match self.read_event(opcode)? {
                Event::Exit => return Err(ClientError::Exited),
                ev => self.backlog.push_back(ev),
            }
        }
    }

    /// Send `cmd` and wait for the first event `pick` accepts.
    fn await_event<R>(
        &mut self,
        cmd: &Command,
        pick: impl Fn(&Event) -> Option<R>,
    ) -> Result<R, ClientError> {
        self.send(cmd)?;
        loop {
            let opcode: i32 = self.ch.get()?;
            let ev = self.read_event(opcode)?;
            if let Some(found) = pick(&ev) {
                return Ok(found);
            }
            if ev == Event::Exit {
                return Err(ClientError::Exited);
            }
            self.backlog.push_back(ev);
        }
    }

    pub fn ping(&mut self) -> Result<(), ClientError> {
        self.await_event(&Command::Ping, |ev| (*ev == Event::Pong).then_some(()))
    }

    pub fn get_int(&mut self, cmd: &Command) -> Result<i32, ClientError> {
        self.request(cmd)
    }

    pub fn get_str(&mut self, cmd: &Command) -> Result<String, ClientError> {
        self.request(cmd)
    }

    pub fn playlist(&mut self) -> Result<Vec<String>, ClientError> {
        self.request(&Command::PlistGet)
    }

    pub fn status(&mut self) -> Result<BTreeMap<String, String>, ClientError> {
        self.request(&Command::GetStatus)
    }

    pub fn options(&mut self) -> Result<Options, ClientError> {
        self.await_event(&Command::GetOptions, |ev| match ev {
            Event::Options(o) => Some(*o),
            _ => None,
        })
    }

    /// Politely end the session.
    pub fn disconnect(mut self) -> Result<(), ClientError> {
        self.send(&Command::Disconnect)
    }
}
