use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use crate::poll::{Interest, wait_fd};

use super::field::Field;

/// The byte stream under a [`Channel`].
///
/// Implemented for `UnixStream`; tests substitute in-memory transports to
/// script partial writes and short reads.
pub trait Transport: Read + Write {
    /// Block until a read would make progress (data, EOF or error), or
    /// until `timeout` passes. Returns whether the stream became readable.
    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool>;
    /// Block until a write would make progress.
    fn wait_writable(&self) -> io::Result<()>;
    /// Bytes that can be read right now without blocking.
    fn available(&self) -> io::Result<usize>;
    /// Whether a read would return immediately (data pending or peer gone).
    fn readable_now(&self) -> io::Result<bool>;
}

impl Transport for UnixStream {
    fn wait_readable(&self, timeout: Option<Duration>) -> io::Result<bool> {
        wait_fd(self.as_raw_fd(), Interest::Read, timeout)
    }

    fn wait_writable(&self) -> io::Result<()> {
        wait_fd(self.as_raw_fd(), Interest::Write, None).map(|_| ())
    }

    fn available(&self) -> io::Result<usize> {
        let mut n: libc::c_int = 0;
        let rc = unsafe { libc::ioctl(self.as_raw_fd(), libc::FIONREAD, &mut n) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n.max(0) as usize)
    }

    fn readable_now(&self) -> io::Result<bool> {
        wait_fd(self.as_raw_fd(), Interest::Read, Some(Duration::ZERO))
    }
}

/// Result of one non-blocking delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainStatus {
    /// The front packet reached the peer in full and was popped.
    Sent,
    /// The socket is full; the front packet stays queued.
    WouldBlock,
    /// Nothing is queued.
    Idle,
}

#[derive(Debug)]
struct Packet {
    bytes: Vec<u8>,
    /// Bytes of `bytes` already accepted by the socket.
    written: usize,
}

/// Typed, framed access to one client connection.
///
/// Writes go straight to the socket unless a coalesce region is open, in
/// which case they accumulate and leave as one transmission (or one queued
/// packet). Reads always block until the whole field has arrived.
#[derive(Debug)]
pub struct Channel<T> {
    stream: T,
    coalesce_depth: u32,
    coalesce_buf: Vec<u8>,
    packets: VecDeque<Packet>,
    /// Longest wait for the next byte of a message already begun.
    read_stall: Option<Duration>,
}

impl<T: Transport> Channel<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            coalesce_depth: 0,
            coalesce_buf: Vec::new(),
            packets: VecDeque::new(),
            read_stall: None,
        }
    }

    /// Give up on a read once the peer has sent nothing for `limit`; the
    /// read then fails with `TimedOut`.
    pub fn set_read_stall(&mut self, limit: Duration) {
        self.read_stall = Some(limit);
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    /// Write one field.
    pub fn send<V: Field>(&mut self, value: &V) -> io::Result<()> {
        value.put(self)
    }

    /// Write a string field without first owning it.
    pub fn send_str(&mut self, s: &str) -> io::Result<()> {
        self.write_bytes(&s.len().to_ne_bytes())?;
        self.write_bytes(s.as_bytes())
    }

    /// Read one field, blocking until it has fully arrived.
    pub fn get<V: Field>(&mut self) -> io::Result<V> {
        V::take(self)
    }

    pub fn begin_coalesce(&mut self) {
        self.coalesce_depth += 1;
    }

    /// Close a coalesce region; the outermost close transmits everything
    /// buffered since the matching `begin_coalesce` in one write.
    pub fn end_coalesce(&mut self) -> io::Result<()> {
        debug_assert!(self.coalesce_depth > 0, "end_coalesce without begin");
        self.coalesce_depth = self.coalesce_depth.saturating_sub(1);
        if self.coalesce_depth == 0 && !self.coalesce_buf.is_empty() {
            let bytes = std::mem::take(&mut self.coalesce_buf);
            self.write_all_blocking(&bytes)?;
        }
        Ok(())
    }

    /// Close a coalesce region by queueing its bytes as one packet instead of
    /// transmitting them.
    pub fn enqueue_as_packet(&mut self) {
        debug_assert!(self.coalesce_depth > 0, "enqueue_as_packet without begin");
        self.coalesce_depth = self.coalesce_depth.saturating_sub(1);
        if self.coalesce_depth == 0 && !self.coalesce_buf.is_empty() {
            let bytes = std::mem::take(&mut self.coalesce_buf);
            self.packets.push_back(Packet { bytes, written: 0 });
        }
    }

    pub fn has_packets(&self) -> bool {
        !self.packets.is_empty()
    }

    pub fn queued_packets(&self) -> usize {
        self.packets.len()
    }

    /// One non-blocking write attempt of the front packet.
    ///
    /// A short write keeps the packet at the front with its progress
    /// recorded, so the next attempt continues it: the peer never sees a
    /// packet's bytes twice or interleaved with another packet.
    pub fn try_drain_one_packet(&mut self) -> io::Result<DrainStatus> {
        let Some(packet) = self.packets.front_mut() else {
            return Ok(DrainStatus::Idle);
        };

        let rest = &packet.bytes[packet.written..];
        match self.stream.write(rest) {
            Ok(0) => Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "client socket accepted no bytes",
            )),
            Ok(n) if n == rest.len() => {
                self.packets.pop_front();
                Ok(DrainStatus::Sent)
            }
            Ok(n) => {
                packet.written += n;
                Ok(DrainStatus::WouldBlock)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(DrainStatus::WouldBlock),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => Ok(DrainStatus::WouldBlock),
            Err(e) => Err(e),
        }
    }

    /// Send queued packets until the queue empties or the socket fills up.
    /// Returns how many packets went out.
    pub fn drain_packets(&mut self) -> io::Result<usize> {
        let mut sent = 0;
        loop {
            match self.try_drain_one_packet()? {
                DrainStatus::Sent => sent += 1,
                DrainStatus::WouldBlock | DrainStatus::Idle => return Ok(sent),
            }
        }
    }

    /// Poll for an `i32` without blocking.
    ///
    /// Nothing is consumed unless all four bytes are already available.
    /// A peer that hung up with nothing pending reports `UnexpectedEof`.
    pub fn try_get_int_nonblocking(&mut self) -> io::Result<Option<i32>> {
        let pending = self.stream.available()?;
        if pending >= size_of::<i32>() {
            return self.get::<i32>().map(Some);
        }
        if pending == 0 && self.stream.readable_now()? {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "peer closed the connection",
            ));
        }
        Ok(None)
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.coalesce_depth > 0 {
            self.coalesce_buf.extend_from_slice(bytes);
            Ok(())
        } else {
            self.write_all_blocking(bytes)
        }
    }

    pub(crate) fn read_bytes(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed mid-message",
                    ));
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if !self.stream.wait_readable(self.read_stall)? {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "peer stalled mid-message",
                        ));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn write_all_blocking(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            match self.stream.write(&bytes[written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "client socket accepted no bytes",
                    ));
                }
                Ok(n) => written += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => self.stream.wait_writable()?,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
