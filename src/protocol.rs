//! Client/server wire protocol.
//!
//! A message is an `i32` opcode followed by a fixed, opcode-specific list of
//! fields. There is no message length and no schema on the wire; both ends
//! are built from these definitions. Commands and events use disjoint opcode
//! ranges so a stray byte run is never mistaken for the other direction.

mod channel;
mod command;
mod event;
mod field;

use std::io;

use thiserror::Error;

pub use channel::{Channel, DrainStatus, Transport};
pub use command::{Command, op as cmd_op};
pub use event::{Event, Reply, op as ev_op};
pub use field::{Field, INT_SET_END};

/// Anything that makes a connection unusable.
///
/// The server does not distinguish a malformed message from a broken socket:
/// either way the client is dropped.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown command opcode {0:#x}")]
    UnknownCommand(i32),
    #[error("unknown event opcode {0:#x}")]
    UnknownEvent(i32),
    #[error("invalid {field} value {value}")]
    BadValue { field: &'static str, value: i32 },
    #[error("data reply read without knowing its type")]
    UntypedReply,
}

impl ProtocolError {
    /// True when the peer simply went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ProtocolError::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
            )
        )
    }
}

/// Where the server's events go.
///
/// Implemented by the client registry; the playback engine and the tag
/// worker only ever see this trait.
pub trait EventSink: Send + Sync {
    /// Queue `event` for every connected client.
    fn broadcast(&self, event: &Event);

    /// Queue `event` for one client only. Unknown or departed clients are
    /// ignored.
    fn send_to(&self, client: usize, event: &Event);
}

#[cfg(test)]
mod tests;
